pub mod local;

use alloy::primitives::{Address, TxHash};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
pub use local::{LocalWalletConnector, connect_local_wallet};
use thiserror::Error;
use tokio::sync::watch;

pub(crate) type WalletResult<T> = std::result::Result<T, WalletError>;

#[derive(Debug, Clone, Error)]
pub enum WalletError {
    #[error("No account connected")]
    NotConnected,

    /// The signer refused to sign (e.g. the user dismissed the prompt).
    #[error("Transaction rejected by signer: {0}")]
    Rejected(String),

    #[error("Failed to send transaction: {0}")]
    SendFailed(String),

    #[error("Invalid wallet configuration: {0}")]
    InvalidKey(String),
}

/// Supplies the connected account and a transaction signer.
///
/// Connect/disconnect bookkeeping lives behind this trait; the swap pipeline only asks
/// for the current account and hands over transactions to sign and broadcast.
#[async_trait]
pub trait WalletConnector: Send + Sync {
    /// Asks the wallet for its accounts. The first entry is the active account.
    async fn request_accounts(&self) -> WalletResult<Vec<Address>>;

    /// Subscribes to account switches. `None` means disconnected.
    fn accounts_changed(&self) -> watch::Receiver<Option<Address>>;

    /// Signs and broadcasts `tx`, returning its hash once the node accepted it.
    async fn send_transaction(&self, tx: TransactionRequest) -> WalletResult<TxHash>;

    /// The active account, asking the wallet only if no account is known yet.
    async fn connected_account(&self) -> WalletResult<Address> {
        let current = *self.accounts_changed().borrow();
        if let Some(address) = current {
            return Ok(address);
        }

        self.request_accounts()
            .await?
            .first()
            .copied()
            .ok_or(WalletError::NotConnected)
    }
}

/// Phrases signers use for a dismissed prompt, plus the EIP-1193 code 4001.
const USER_REJECTION_MARKERS: [&str; 6] = [
    "user rejected",
    "user denied",
    "rejected by user",
    "code: 4001",
    "code 4001",
    "\"code\":4001",
];

/// Maps a signer/node error message onto a wallet error, keeping user rejections apart.
///
/// Node-side refusals ("transaction rejected: nonce too low") are send failures.
pub(crate) fn classify_send_error(message: String) -> WalletError {
    let lowered = message.to_lowercase();
    if USER_REJECTION_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        WalletError::Rejected(message)
    } else {
        WalletError::SendFailed(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_denial_is_rejection() {
        let err = classify_send_error("User denied transaction signature".to_string());
        assert!(matches!(err, WalletError::Rejected(_)));

        let err = classify_send_error("code 4001: request rejected".to_string());
        assert!(matches!(err, WalletError::Rejected(_)));
    }

    #[test]
    fn test_other_send_errors_are_failures() {
        let err = classify_send_error("nonce too low".to_string());
        assert!(matches!(err, WalletError::SendFailed(_)));

        let err = classify_send_error("transaction rejected: nonce too low".to_string());
        assert!(matches!(err, WalletError::SendFailed(_)));

        let err = classify_send_error("server returned an error response: error code -32000: replacement transaction underpriced, tx denied".to_string());
        assert!(matches!(err, WalletError::SendFailed(_)));
    }

    #[test]
    fn test_json_rpc_code_4001_is_rejection() {
        let err = classify_send_error(r#"{"code":4001,"message":"The request was refused"}"#.to_string());
        assert!(matches!(err, WalletError::Rejected(_)));
    }
}
