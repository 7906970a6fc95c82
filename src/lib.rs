pub mod app;
pub mod config;
pub mod llm;
pub mod middleware;
pub mod repository;
pub mod service;
pub mod wallet;

pub use app::build_app;

// Re-export commonly used types for tests
pub use service::{
    ParseInstructionRequest, ParseInstructionResponse, ResolvePoolRequest, ResolvePoolResponse,
    ServiceError, StageResult, SwapPipeline, SwapService,
};
