use std::str::FromStr;
use std::sync::Arc;

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, TxHash};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::instrument;

use super::{WalletConnector, WalletError, WalletResult, classify_send_error};

/// Wallet backed by a locally held private key.
///
/// The provider must carry a wallet filler for `address`, so that requests handed to
/// `send_transaction` are signed before broadcast.
pub struct LocalWalletConnector<P> {
    provider: Arc<P>,
    address: Address,
    accounts: watch::Sender<Option<Address>>,
}

impl<P: Provider + Clone + 'static> LocalWalletConnector<P> {
    pub fn new(provider: Arc<P>, address: Address) -> Self {
        let (accounts, _) = watch::channel(Some(address));
        Self {
            provider,
            address,
            accounts,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }
}

/// Builds a signing connector from a hex private key and an RPC url.
pub fn connect_local_wallet(
    private_key: &str,
    rpc_url: &str,
) -> WalletResult<LocalWalletConnector<impl Provider + Clone + 'static>> {
    let signer = PrivateKeySigner::from_str(private_key)
        .map_err(|e| WalletError::InvalidKey(format!("Invalid private key: {e}")))?;
    let address = signer.address();

    let url = rpc_url
        .parse()
        .map_err(|e| WalletError::InvalidKey(format!("Invalid RPC URL: {e}")))?;

    let provider = ProviderBuilder::new()
        .wallet(EthereumWallet::from(signer))
        .connect_http(url);

    Ok(LocalWalletConnector::new(Arc::new(provider), address))
}

#[async_trait]
impl<P: Provider + Clone + Send + Sync + 'static> WalletConnector for LocalWalletConnector<P> {
    async fn request_accounts(&self) -> WalletResult<Vec<Address>> {
        let current = *self.accounts.borrow();
        match current {
            Some(address) => Ok(vec![address]),
            None => Err(WalletError::NotConnected),
        }
    }

    fn accounts_changed(&self) -> watch::Receiver<Option<Address>> {
        self.accounts.subscribe()
    }

    #[instrument(skip(self, tx), err)]
    async fn send_transaction(&self, mut tx: TransactionRequest) -> WalletResult<TxHash> {
        let current = *self.accounts.borrow();
        let from = current.ok_or(WalletError::NotConnected)?;
        tx.from = Some(from);

        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(|e| classify_send_error(e.to_string()))?;

        let tx_hash = *pending.tx_hash();
        tracing::info!("Transaction {} broadcast from {}", tx_hash, from);
        Ok(tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Anvil's first development key (DO NOT use in production!)
    const TEST_PRIVATE_KEY: &str =
        "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const RPC_URL: &str = "https://eth.llamarpc.com";

    #[tokio::test]
    async fn test_wallet_initialization_with_valid_key() {
        let wallet = connect_local_wallet(TEST_PRIVATE_KEY, RPC_URL).expect("valid key");

        let expected_address = Address::from_str("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266")
            .expect("Invalid expected address");

        assert_eq!(wallet.request_accounts().await.unwrap(), vec![expected_address]);
        assert_eq!(wallet.connected_account().await.unwrap(), expected_address);
    }

    #[tokio::test]
    async fn test_wallet_initialization_with_invalid_key() {
        let result = connect_local_wallet("not_a_valid_private_key", RPC_URL);

        match result {
            Err(WalletError::InvalidKey(msg)) => assert!(msg.contains("Invalid private key")),
            Err(e) => panic!("Expected InvalidKey, got: {:?}", e),
            Ok(_) => panic!("Should fail with invalid private key"),
        }
    }
}
