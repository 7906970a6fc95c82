use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum RepositoryError {
    #[error("RPC error: {0}")]
    RpcError(String),

    /// The node executed the call and it reverted.
    #[error("Execution reverted: {0}")]
    Reverted(String),

    #[error("Contract call error: {0}")]
    ContractError(String),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("{0}")]
    Other(String),
}

impl RepositoryError {
    /// Classifies a contract-call failure, separating reverts from transport errors.
    pub(crate) fn from_call(context: &str, err: impl std::fmt::Display) -> Self {
        let message = err.to_string();
        if message.contains("revert") {
            RepositoryError::Reverted(format!("{context}: {message}"))
        } else if message.contains("429") || message.contains("error sending request") {
            RepositoryError::RpcError(format!("{context}: {message}"))
        } else {
            RepositoryError::ContractError(format!("{context}: {message}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revert_is_classified() {
        let err = RepositoryError::from_call("quote", "server returned an error response: execution reverted: SPL");
        assert!(matches!(err, RepositoryError::Reverted(msg) if msg.starts_with("quote: ")));
    }

    #[test]
    fn test_rate_limit_is_rpc_error() {
        let err = RepositoryError::from_call("slot0", "HTTP error 429 with body: too many requests");
        assert!(matches!(err, RepositoryError::RpcError(_)));
    }

    #[test]
    fn test_other_failures_are_contract_errors() {
        let err = RepositoryError::from_call("token0", "buffer overrun while deserializing");
        assert!(matches!(err, RepositoryError::ContractError(_)));
    }
}
