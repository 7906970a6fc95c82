pub mod approval;
pub mod error;
pub mod instruction;
pub mod pipeline;
pub mod pool;
pub mod quote;
pub mod receipt;
pub mod session;
pub mod submit;
pub mod swap;
pub mod swap_math;
pub mod token_registry;
pub mod trade;
pub mod types;
pub mod utils;


use std::future::Future;

pub use error::{ParseCause, ServiceError};
pub use pipeline::SwapPipeline;
pub use swap::SwapService;
pub use token_registry::TokenRegistry;
pub use types::*;

pub(crate) type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Runs `fut` unless `ct` fires first.
pub(crate) async fn cancellable<T>(
    ct: &tokio_util::sync::CancellationToken,
    fut: impl Future<Output = ServiceResult<T>>,
) -> ServiceResult<T> {
    tokio::select! {
        biased;
        _ = ct.cancelled() => Err(ServiceError::Cancelled),
        result = fut => result,
    }
}
