use std::sync::Arc;
use std::time::Duration;

use alloy::providers::ProviderBuilder;
use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use rmcp::transport::SseServer;
use rmcp::transport::sse_server::SseServerConfig;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::llm::HuggingFaceCompletion;
use crate::middleware::trace::http_trace_layer;
use crate::repository::{AlloyChainRepository, ChainRepository};
use crate::service::{SwapPipeline, SwapService};
use crate::wallet::{WalletConnector, connect_local_wallet};

pub fn build_app(cancellation_token: CancellationToken, config: Config) -> anyhow::Result<Router> {
    let addr = config.server_uri().parse()?;

    let provider = ProviderBuilder::new().connect_http(config.rpc.url.parse()?);
    let repository: Arc<dyn ChainRepository> = Arc::new(AlloyChainRepository::new(Arc::new(provider)));
    let completion = Arc::new(HuggingFaceCompletion::new(&config.llm)?);
    let pipeline = Arc::new(SwapPipeline::new(&config, repository, completion));
    let wallet = build_wallet(&config);

    let sse_config = SseServerConfig {
        bind: addr,
        sse_path: "/sse".to_string(),
        post_path: "/message".to_string(),
        ct: cancellation_token.clone(),
        sse_keep_alive: Some(Duration::from_secs(15)),
    };

    let (sse_server, sse_router) = SseServer::new(sse_config);

    // Each SSE connection gets its own session, cancelled along with the server.
    let swap_service =
        move || SwapService::new(pipeline.clone(), wallet.clone(), cancellation_token.clone());

    sse_server.with_service(swap_service);

    let app = Router::new()
        .route("/health", get(|| async move { StatusCode::OK }))
        .nest("/swap", sse_router)
        .layer(http_trace_layer());

    Ok(app)
}

/// Signing wallet from `wallet.private_key`; without one the service runs read-only.
fn build_wallet(config: &Config) -> Option<Arc<dyn WalletConnector>> {
    if config.wallet.private_key.is_empty() {
        tracing::info!("No private key provided. Running in read-only mode.");
        return None;
    }

    match connect_local_wallet(&config.wallet.private_key, &config.rpc.url) {
        Ok(wallet) => {
            tracing::info!("Initialized with wallet address: {}", wallet.address());
            let wallet: Arc<dyn WalletConnector> = Arc::new(wallet);
            Some(wallet)
        }
        Err(e) => {
            tracing::warn!("Failed to initialize wallet: {e}. Using read-only mode.");
            None
        }
    }
}
