//! Bounded receipt polling with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::TxHash;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::ServiceResult;
use super::error::ServiceError;
use crate::config::ReceiptConfig;
use crate::repository::{ChainRepository, ReceiptSummary, RepositoryError};

pub struct ReceiptPoller {
    repository: Arc<dyn ChainRepository>,
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_factor: f64,
    timeout: Duration,
}

impl ReceiptPoller {
    pub fn new(repository: Arc<dyn ChainRepository>, config: &ReceiptConfig) -> Self {
        Self {
            repository,
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_factor: config.backoff_factor.max(1.0),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Waits for `tx_hash` to be mined.
    ///
    /// Gives up after `max_attempts` lookups or once the overall timeout elapses,
    /// whichever comes first. A lookup that errors counts as an attempt; if the last
    /// attempt errored the failure is reported as [`ServiceError::ReceiptPolling`].
    #[instrument(skip(self, ct), err)]
    pub async fn await_receipt(
        &self,
        tx_hash: TxHash,
        ct: &CancellationToken,
    ) -> ServiceResult<ReceiptSummary> {
        let mut attempts = 0u32;

        let outcome = tokio::select! {
            biased;
            _ = ct.cancelled() => return Err(ServiceError::Cancelled),
            outcome = tokio::time::timeout(self.timeout, self.poll(tx_hash, &mut attempts)) => outcome,
        };

        match outcome {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    "Receipt for {} not found within {:?} ({} attempts)",
                    tx_hash,
                    self.timeout,
                    attempts
                );
                Err(ServiceError::ReceiptTimeout {
                    tx_hash: tx_hash.to_string(),
                    attempts,
                })
            }
        }
    }

    /// Grows `delay` by the backoff factor, saturating at `max_delay`.
    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::try_from_secs_f64(delay.as_secs_f64() * self.backoff_factor)
            .map_or(self.max_delay, |next| next.min(self.max_delay))
    }

    async fn poll(&self, tx_hash: TxHash, attempts: &mut u32) -> ServiceResult<ReceiptSummary> {
        let mut delay = self.initial_delay;
        let mut last_error: Option<RepositoryError> = None;

        while *attempts < self.max_attempts {
            *attempts += 1;

            match self.repository.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    tracing::info!(
                        "Receipt for {} after {} attempts: success={}, block={:?}",
                        tx_hash,
                        attempts,
                        receipt.success,
                        receipt.block_number
                    );
                    return Ok(receipt);
                }
                Ok(None) => {
                    tracing::debug!("Attempt {}/{}: {} not mined yet", attempts, self.max_attempts, tx_hash);
                    last_error = None;
                }
                Err(e) => {
                    tracing::warn!(
                        "Attempt {}/{} failed for receipt {}: {}. Retrying in {:?}...",
                        attempts,
                        self.max_attempts,
                        tx_hash,
                        e,
                        delay
                    );
                    last_error = Some(e);
                }
            }

            if *attempts < self.max_attempts {
                tokio::time::sleep(delay).await;
                delay = self.next_delay(delay);
            }
        }

        match last_error {
            Some(e) => Err(ServiceError::ReceiptPolling(e.to_string())),
            None => Err(ServiceError::ReceiptTimeout {
                tx_hash: tx_hash.to_string(),
                attempts: *attempts,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use alloy::primitives::{Address, Bytes, U256};
    use alloy::rpc::types::TransactionRequest;
    use async_trait::async_trait;

    use super::*;
    use crate::repository::{FeeEstimate, PoolSnapshot, RepoResult};

    /// Serves scripted receipt lookups; once the script runs out every lookup is pending.
    struct Scripted(Mutex<VecDeque<RepoResult<Option<ReceiptSummary>>>>);

    impl Scripted {
        fn new(script: Vec<RepoResult<Option<ReceiptSummary>>>) -> Arc<Self> {
            Arc::new(Self(Mutex::new(script.into())))
        }
    }

    #[async_trait]
    impl ChainRepository for Scripted {
        async fn block_number(&self) -> RepoResult<u64> {
            unreachable!()
        }

        async fn pool_snapshot(&self, _: Address, _: u64) -> RepoResult<PoolSnapshot> {
            unreachable!()
        }

        async fn quote_exact_output_single(
            &self,
            _: Address,
            _: Address,
            _: Address,
            _: u32,
            _: U256,
        ) -> RepoResult<U256> {
            unreachable!()
        }

        async fn quote_exact_input_single(
            &self,
            _: Address,
            _: Address,
            _: Address,
            _: u32,
            _: U256,
        ) -> RepoResult<U256> {
            unreachable!()
        }

        async fn call(&self, _: Address, _: Bytes) -> RepoResult<Bytes> {
            unreachable!()
        }

        async fn token_balance(&self, _: Address, _: Address) -> RepoResult<U256> {
            unreachable!()
        }

        async fn allowance(&self, _: Address, _: Address, _: Address) -> RepoResult<U256> {
            unreachable!()
        }

        async fn estimate_fees(&self) -> RepoResult<FeeEstimate> {
            unreachable!()
        }

        async fn estimate_gas(&self, _: TransactionRequest) -> RepoResult<u64> {
            unreachable!()
        }

        async fn transaction_receipt(&self, _: TxHash) -> RepoResult<Option<ReceiptSummary>> {
            self.0.lock().unwrap().pop_front().unwrap_or(Ok(None))
        }
    }

    fn config(max_attempts: u32, timeout_secs: u64) -> ReceiptConfig {
        ReceiptConfig {
            max_attempts,
            initial_delay_ms: 10,
            max_delay_ms: 40,
            backoff_factor: 2.0,
            timeout_secs,
        }
    }

    fn mined(success: bool) -> ReceiptSummary {
        ReceiptSummary {
            tx_hash: TxHash::repeat_byte(0x11),
            success,
            block_number: Some(100),
            gas_used: 120_000,
        }
    }

    #[tokio::test]
    async fn test_receipt_found_after_retries() {
        let repo = Scripted::new(vec![
            Ok(None),
            Err(RepositoryError::RpcError("connection reset".to_string())),
            Ok(Some(mined(true))),
        ]);
        let poller = ReceiptPoller::new(repo, &config(5, 10));

        let receipt = poller
            .await_receipt(TxHash::repeat_byte(0x11), &CancellationToken::new())
            .await
            .unwrap();
        assert!(receipt.success);
    }

    #[tokio::test]
    async fn test_reverted_receipt_is_returned() {
        let repo = Scripted::new(vec![Ok(Some(mined(false)))]);
        let poller = ReceiptPoller::new(repo, &config(3, 10));

        let receipt = poller
            .await_receipt(TxHash::repeat_byte(0x11), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!receipt.success);
    }

    #[test]
    fn test_backoff_saturates_at_max_delay() {
        let poller = ReceiptPoller::new(Scripted::new(vec![]), &config(3, 10));
        assert_eq!(poller.next_delay(Duration::from_millis(10)), Duration::from_millis(20));
        assert_eq!(poller.next_delay(Duration::from_millis(30)), Duration::from_millis(40));

        let huge = ReceiptConfig {
            backoff_factor: f64::MAX,
            ..config(3, 10)
        };
        let poller = ReceiptPoller::new(Scripted::new(vec![]), &huge);
        assert_eq!(poller.next_delay(Duration::from_secs(1)), Duration::from_millis(40));

        let infinite = ReceiptConfig {
            backoff_factor: f64::INFINITY,
            ..config(3, 10)
        };
        let poller = ReceiptPoller::new(Scripted::new(vec![]), &infinite);
        assert_eq!(poller.next_delay(Duration::from_millis(10)), Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_attempt_budget_exhausted_is_timeout() {
        let poller = ReceiptPoller::new(Scripted::new(vec![]), &config(3, 10));

        let result = poller
            .await_receipt(TxHash::repeat_byte(0x22), &CancellationToken::new())
            .await;
        assert!(matches!(
            result,
            Err(ServiceError::ReceiptTimeout { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_rpc_error_on_last_attempt_is_reported() {
        let repo = Scripted::new(vec![
            Ok(None),
            Err(RepositoryError::RpcError("HTTP error 503".to_string())),
        ]);
        let poller = ReceiptPoller::new(repo, &config(2, 10));

        let result = poller
            .await_receipt(TxHash::repeat_byte(0x33), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ServiceError::ReceiptPolling(msg)) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_overall_timeout_bounds_polling() {
        let mut slow = config(1_000, 0);
        slow.initial_delay_ms = 50;
        let poller = ReceiptPoller::new(Scripted::new(vec![]), &slow);

        let result = poller
            .await_receipt(TxHash::repeat_byte(0x44), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ServiceError::ReceiptTimeout { .. })));
    }

    #[tokio::test]
    async fn test_cancellation_stops_polling() {
        let ct = CancellationToken::new();
        ct.cancel();
        let poller = ReceiptPoller::new(Scripted::new(vec![]), &config(3, 10));

        let result = poller.await_receipt(TxHash::repeat_byte(0x55), &ct).await;
        assert!(matches!(result, Err(ServiceError::Cancelled)));
    }
}
