use rmcp::schemars::{self, JsonSchema};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::repository::RepositoryError;
use crate::wallet::WalletError;

/// Why a natural-language instruction could not be turned into a trade intent.
#[derive(Debug, Clone, PartialEq, Eq, Error, JsonSchema, Serialize, Deserialize)]
#[serde(tag = "cause", content = "detail", rename_all = "snake_case")]
pub enum ParseCause {
    #[error("empty instruction text")]
    EmptyInput,

    #[error("completion service failed: {0}")]
    CompletionFailed(String),

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("empty field: {0}")]
    EmptyField(String),
}

#[derive(Debug, Clone, Error, JsonSchema, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum ServiceError {
    // Input validation errors
    /// The requested amount is invalid (e.g., negative, zero, or malformed).
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// The token was not found or is not supported by the service.
    #[error("Token not found or not supported: {0}")]
    TokenNotFound(String),

    /// The wallet has insufficient balance for the requested operation.
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: String, available: String },

    // Pipeline stage errors
    /// The instruction text could not be extracted into a trade intent.
    #[error("Failed to parse instruction: {0}")]
    Parse(ParseCause),

    /// The pool address could not be derived or its state could not be read.
    #[error("Pool resolution failed: {0}")]
    PoolResolution(String),

    /// The quote call reverted or its result could not be decoded.
    #[error("Quote failed: {0}")]
    Quote(String),

    /// The route does not match the requested input/output tokens.
    #[error("Trade construction failed: {0}")]
    TradeConstruction(String),

    /// The approval transaction could not be sent or was not confirmed.
    #[error("Approval failed: {0}")]
    Approval(String),

    /// The swap transaction could not be encoded, priced or sent.
    #[error("Submission failed: {0}")]
    Submission(String),

    /// The signer refused to sign the transaction.
    #[error("Transaction rejected: {0}")]
    TransactionRejected(String),

    /// No receipt showed up within the polling budget.
    #[error("No receipt for transaction {tx_hash} after {attempts} attempts")]
    ReceiptTimeout { tx_hash: String, attempts: u32 },

    /// Polling ended on an RPC failure.
    #[error("Receipt polling failed: {0}")]
    ReceiptPolling(String),

    // Session errors
    /// A stage was triggered before the stage it depends on produced a result.
    #[error("Stage not ready: {0}")]
    StageNotReady(String),

    #[error("No wallet account connected")]
    WalletNotConnected,

    #[error("Operation cancelled")]
    Cancelled,

    // Infrastructure errors (abstracted from repository layer)
    /// An error occurred while communicating with the blockchain.
    #[error("Blockchain connection error: {0}")]
    BlockchainError(String),

    /// An unexpected internal error occurred.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::RpcError(msg)
            | RepositoryError::Reverted(msg)
            | RepositoryError::ContractError(msg)
            | RepositoryError::DecodeError(msg) => {
                ServiceError::BlockchainError(format!("Failed to interact with blockchain: {msg}"))
            }
            RepositoryError::Other(msg) => ServiceError::InternalError(msg),
        }
    }
}

impl From<WalletError> for ServiceError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::NotConnected => ServiceError::WalletNotConnected,
            WalletError::Rejected(msg) => ServiceError::TransactionRejected(msg),
            WalletError::SendFailed(msg) => ServiceError::Submission(msg),
            WalletError::InvalidKey(msg) => ServiceError::InternalError(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_serializes_with_cause() {
        let err = ServiceError::Parse(ParseCause::InvalidJson("expected value".to_string()));
        let value = serde_json::to_value(&err).unwrap();

        assert_eq!(value["type"], "Parse");
        assert_eq!(value["message"]["cause"], "invalid_json");
        assert_eq!(err.to_string(), "Failed to parse instruction: invalid JSON: expected value");
    }

    #[test]
    fn test_receipt_timeout_message() {
        let err = ServiceError::ReceiptTimeout {
            tx_hash: "0xabc".to_string(),
            attempts: 4,
        };
        assert_eq!(err.to_string(), "No receipt for transaction 0xabc after 4 attempts");
    }

    #[test]
    fn test_wallet_rejection_maps_to_rejected() {
        let err: ServiceError = WalletError::Rejected("user denied".to_string()).into();
        assert!(matches!(err, ServiceError::TransactionRejected(_)));

        let err: ServiceError = WalletError::NotConnected.into();
        assert!(matches!(err, ServiceError::WalletNotConnected));
    }
}
