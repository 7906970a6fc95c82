pub mod huggingface;

use async_trait::async_trait;
pub use huggingface::HuggingFaceCompletion;
use thiserror::Error;

pub(crate) type LlmResult<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("Request to completion service failed: {0}")]
    Request(String),

    #[error("Completion service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected completion response: {0}")]
    Decode(String),
}

/// An opaque hosted text-completion service.
///
/// Sampling is not deterministic, so identical prompts may yield different text.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn complete(&self, prompt: &str) -> LlmResult<String>;
}
