use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::{LlmError, LlmResult, TextCompletion};
use crate::config::LlmConfig;

/// Client for the Hugging Face hosted inference text-generation task.
pub struct HuggingFaceCompletion {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    max_new_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct GenerationRequest<'a> {
    inputs: &'a str,
    parameters: GenerationParameters,
}

#[derive(Debug, Serialize)]
struct GenerationParameters {
    max_new_tokens: u32,
    temperature: f32,
    return_full_text: bool,
}

#[derive(Debug, Deserialize)]
struct GeneratedText {
    generated_text: String,
}

impl HuggingFaceCompletion {
    pub fn new(config: &LlmConfig) -> LlmResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Request(e.to_string()))?;

        if config.api_key.is_empty() {
            tracing::warn!("No completion API key configured; requests may be rejected");
        }

        Ok(Self {
            http,
            endpoint: format!("{}/{}", config.url.trim_end_matches('/'), config.model),
            api_key: config.api_key.clone(),
            max_new_tokens: config.max_new_tokens,
            temperature: config.temperature,
        })
    }

    fn request_body<'a>(&self, prompt: &'a str) -> GenerationRequest<'a> {
        GenerationRequest {
            inputs: prompt,
            parameters: GenerationParameters {
                max_new_tokens: self.max_new_tokens,
                temperature: self.temperature,
                return_full_text: false,
            },
        }
    }
}

#[async_trait]
impl TextCompletion for HuggingFaceCompletion {
    #[instrument(skip(self, prompt), err)]
    async fn complete(&self, prompt: &str) -> LlmResult<String> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let generations: Vec<GeneratedText> = response
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;

        let text = generations
            .into_iter()
            .next()
            .map(|g| g.generated_text)
            .ok_or_else(|| LlmError::Decode("empty generation list".to_string()))?;

        tracing::debug!("Generated text: {}", text);
        Ok(text)
    }
}
