use std::{fs, path::Path};

use alloy::primitives::{Address, B256};
use anyhow::Context;
use dotenv::dotenv;
use envsubst::substitute;
use serde::Deserialize;

/// Environment variable prefixes that may be interpolated into the YAML file.
const ENV_PREFIXES: [&str; 4] = ["SERVER_", "WALLET_", "RPC_", "LLM_"];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub rpc: RpcConfig,
    pub wallet: WalletConfig,
    pub llm: LlmConfig,
    pub uniswap: UniswapConfig,
    pub swap: SwapConfig,
}

impl Config {
    pub async fn from_yaml(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        dotenv().ok();

        let path = path.as_ref();
        let file_content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file from path: {}", path.display()))?;

        let env_vars: std::collections::HashMap<String, String> = std::env::vars()
            .filter(|(key, _)| ENV_PREFIXES.iter().any(|prefix| key.starts_with(prefix)))
            .collect();

        let interpolated = substitute(&file_content, &env_vars)
            .context("failed to substitute environment variables in YAML")?;

        let config: Config =
            serde_yaml::from_str(&interpolated).context("failed to parse YAML configuration")?;

        Ok(config)
    }

    pub fn server_uri(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub private_key: String,
}

/// Hosted text-generation endpoint used to extract trade instructions.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub url: String,
    pub model: String,
    pub api_key: String,
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

/// Uniswap V3 deployment the pipeline trades against.
#[derive(Debug, Clone, Deserialize)]
pub struct UniswapConfig {
    pub chain_id: u64,
    pub factory: Address,
    pub quoter: Address,
    pub quoter_v2: Address,
    pub swap_router: Address,
    pub pool_init_code_hash: B256,
    /// Default fee tier in hundredths of a basis point (3000 = 0.3%).
    pub fee_tier: u32,
    pub quote_method: QuoteMethod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteMethod {
    /// Static call against the V1 quoter with typed parameters.
    Quoter,
    /// Raw `eth_call` of encoded QuoterV2 calldata.
    QuoterV2,
    /// Offline estimate from the pool snapshot.
    Local,
}

impl QuoteMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteMethod::Quoter => "quoter",
            QuoteMethod::QuoterV2 => "quoter_v2",
            QuoteMethod::Local => "local",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwapConfig {
    pub slippage_bps: u32,
    pub deadline_secs: u64,
    /// Allowance granted to the router, in human units of the input token.
    pub approval_buffer: String,
    pub gas_headroom_bps: u32,
    pub receipt: ReceiptConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReceiptConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub timeout_secs: u64,
}
