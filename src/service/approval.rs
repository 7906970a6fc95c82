use std::sync::Arc;

use alloy::primitives::{Address, TxHash, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::sol_types::SolCall;
use rmcp::schemars::{self, JsonSchema};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::error::ServiceError;
use super::receipt::ReceiptPoller;
use super::token_registry::TokenInfo;
use super::utils::{format_balance, to_raw_amount};
use super::{ServiceResult, cancellable};
use crate::repository::{ChainRepository, ReceiptSummary};
use crate::repository::contract::IERC20;
use crate::wallet::{WalletConnector, WalletError};

/// Where the router's spending allowance stands for the current trade.
///
/// Only a mined, successful `approve` (or an allowance that already covers the buffer)
/// reaches `Approved`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ApprovalState {
    NotRequested,
    Pending {
        tx_hash: String,
    },
    Approved {
        /// `None` when the existing allowance was already sufficient.
        tx_hash: Option<String>,
    },
    Failed {
        reason: String,
    },
}

/// An approval attempt for one token/owner/spender triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approval {
    pub token: TokenInfo,
    pub owner: Address,
    pub spender: Address,
    pub amount: U256,
    pub state: ApprovalState,
}

impl Approval {
    pub fn is_approved(&self) -> bool {
        matches!(self.state, ApprovalState::Approved { .. })
    }

    /// Whether this approval lets `owner` spend `required` of `token` through `spender`.
    pub fn covers(&self, token: Address, owner: Address, spender: Address, required: U256) -> bool {
        self.is_approved()
            && self.token.address == token
            && self.owner == owner
            && self.spender == spender
            && self.amount >= required
    }

    pub fn pending_tx(&self) -> Option<TxHash> {
        match &self.state {
            ApprovalState::Pending { tx_hash } => tx_hash.parse().ok(),
            _ => None,
        }
    }
}

/// Grants the swap router a fixed allowance on the input token.
///
/// The allowance is a configured buffer in human units rather than the exact trade
/// input, so one approval can serve several swaps.
pub struct ApprovalManager {
    repository: Arc<dyn ChainRepository>,
    poller: ReceiptPoller,
    buffer: String,
}

impl ApprovalManager {
    pub fn new(repository: Arc<dyn ChainRepository>, poller: ReceiptPoller, buffer: String) -> Self {
        Self {
            repository,
            poller,
            buffer,
        }
    }

    /// Checks the allowance and sends `approve(spender, buffer)` if it falls short. A
    /// partial allowance is cleared with a confirmed `approve(spender, 0)` first.
    ///
    /// Returns either an `Approved` record (nothing to send) or a `Pending` one holding
    /// the approval transaction hash, to be settled by [`ApprovalManager::confirm`].
    #[instrument(skip(self, token, wallet, ct), fields(token = token.symbol), err)]
    pub async fn ensure_approval(
        &self,
        token: &TokenInfo,
        spender: Address,
        owner: Address,
        required: U256,
        wallet: &dyn WalletConnector,
        ct: &CancellationToken,
    ) -> ServiceResult<Approval> {
        let amount = to_raw_amount(&self.buffer, token.decimals).map_err(|e| {
            ServiceError::Approval(format!("invalid approval buffer '{}': {e}", self.buffer))
        })?;

        if required > amount {
            return Err(ServiceError::Approval(format!(
                "trade needs {} {} but the approval buffer is {} {}",
                format_balance(required, token.decimals),
                token.symbol,
                self.buffer,
                token.symbol
            )));
        }

        let allowance = cancellable(ct, async {
            self.repository
                .allowance(token.address, owner, spender)
                .await
                .map_err(|e| ServiceError::Approval(format!("allowance lookup failed: {e}")))
        })
        .await?;

        let mut approval = Approval {
            token: *token,
            owner,
            spender,
            amount,
            state: ApprovalState::NotRequested,
        };

        if allowance >= amount {
            tracing::info!(
                "Existing allowance {} {} already covers the buffer",
                format_balance(allowance, token.decimals),
                token.symbol
            );
            approval.state = ApprovalState::Approved { tx_hash: None };
            return Ok(approval);
        }

        // USDT-style tokens revert when an allowance goes from nonzero to nonzero.
        if !allowance.is_zero() {
            tracing::info!(
                "Resetting partial allowance of {} {} before approving",
                format_balance(allowance, token.decimals),
                token.symbol
            );
            let reset = self.send_approve(token, spender, owner, U256::ZERO, wallet, ct).await?;
            self.await_success(reset, ct).await?;
        }

        let tx_hash = self.send_approve(token, spender, owner, amount, wallet, ct).await?;

        tracing::info!(
            "Approval of {} {} for {} sent: {}",
            self.buffer,
            token.symbol,
            spender,
            tx_hash
        );

        approval.state = ApprovalState::Pending {
            tx_hash: tx_hash.to_string(),
        };
        Ok(approval)
    }

    /// Waits for a pending approval to be mined; only status 1 yields `Approved`.
    #[instrument(skip(self, approval, ct), err)]
    pub async fn confirm(&self, approval: &Approval, ct: &CancellationToken) -> ServiceResult<Approval> {
        let Some(tx_hash) = approval.pending_tx() else {
            return Ok(approval.clone());
        };

        let receipt = self.await_success(tx_hash, ct).await?;
        tracing::info!("Approval {} confirmed in block {:?}", tx_hash, receipt.block_number);

        Ok(Approval {
            state: ApprovalState::Approved {
                tx_hash: Some(tx_hash.to_string()),
            },
            ..approval.clone()
        })
    }

    async fn send_approve(
        &self,
        token: &TokenInfo,
        spender: Address,
        owner: Address,
        amount: U256,
        wallet: &dyn WalletConnector,
        ct: &CancellationToken,
    ) -> ServiceResult<TxHash> {
        let call = IERC20::approveCall { spender, amount };
        let tx = TransactionRequest::default()
            .from(owner)
            .to(token.address)
            .input(call.abi_encode().into());

        // Not cancellable once started: a pending hash has to reach the session.
        if ct.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }
        wallet.send_transaction(tx).await.map_err(|e| match e {
            WalletError::NotConnected => ServiceError::WalletNotConnected,
            other => ServiceError::Approval(other.to_string()),
        })
    }

    async fn await_success(&self, tx_hash: TxHash, ct: &CancellationToken) -> ServiceResult<ReceiptSummary> {
        let receipt = self.poller.await_receipt(tx_hash, ct).await.map_err(|e| match e {
            ServiceError::Cancelled => ServiceError::Cancelled,
            other => ServiceError::Approval(other.to_string()),
        })?;

        if !receipt.success {
            return Err(ServiceError::Approval(format!(
                "approval transaction {tx_hash} reverted"
            )));
        }
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::token_registry::TokenRegistry;

    const OWNER: Address = Address::repeat_byte(0x0a);
    const ROUTER: Address = Address::repeat_byte(0x0b);

    fn approval(state: ApprovalState) -> Approval {
        let weth = *TokenRegistry::global().lookup("WETH").unwrap();
        Approval {
            token: weth,
            owner: OWNER,
            spender: ROUTER,
            amount: U256::from(2000u64) * U256::from(10u64).pow(U256::from(18u64)),
            state,
        }
    }

    #[test]
    fn test_covers_requires_confirmation() {
        let required = U256::from(10u64).pow(U256::from(18u64));
        let token = approval(ApprovalState::NotRequested).token.address;

        let pending = approval(ApprovalState::Pending {
            tx_hash: TxHash::repeat_byte(0x01).to_string(),
        });
        assert!(!pending.covers(token, OWNER, ROUTER, required));

        let failed = approval(ApprovalState::Failed {
            reason: "reverted".to_string(),
        });
        assert!(!failed.covers(token, OWNER, ROUTER, required));

        let approved = approval(ApprovalState::Approved { tx_hash: None });
        assert!(approved.covers(token, OWNER, ROUTER, required));
    }

    #[test]
    fn test_covers_checks_owner_spender_and_amount() {
        let approved = approval(ApprovalState::Approved { tx_hash: None });
        let token = approved.token.address;
        let required = U256::from(1u64);

        assert!(!approved.covers(token, Address::repeat_byte(0x0c), ROUTER, required));
        assert!(!approved.covers(token, OWNER, Address::repeat_byte(0x0c), required));
        assert!(!approved.covers(Address::ZERO, OWNER, ROUTER, required));
        assert!(!approved.covers(token, OWNER, ROUTER, approved.amount + U256::from(1u64)));
        assert!(approved.covers(token, OWNER, ROUTER, approved.amount));
    }

    #[test]
    fn test_pending_tx_only_for_pending_state() {
        let hash = TxHash::repeat_byte(0x42);
        let pending = approval(ApprovalState::Pending {
            tx_hash: hash.to_string(),
        });
        assert_eq!(pending.pending_tx(), Some(hash));

        let approved = approval(ApprovalState::Approved {
            tx_hash: Some(hash.to_string()),
        });
        assert_eq!(approved.pending_tx(), None);
    }

    #[test]
    fn test_state_serializes_tagged() {
        let json = serde_json::to_value(ApprovalState::Approved { tx_hash: None }).unwrap();
        assert_eq!(json["state"], "approved");
    }
}
