//! Per-session results, threaded from one stage to the next.

use alloy::primitives::{Address, TxHash, U256};
use rmcp::schemars::{self, JsonSchema};
use serde::Serialize;

use super::ServiceResult;
use super::approval::{Approval, ApprovalState};
use super::error::ServiceError;
use super::instruction::{ParsedInstruction, SwapIntent};
use super::pool::PoolState;
use super::quote::Quote;
use super::submit::TransactionState;
use super::trade::UncheckedTrade;

/// The user-triggered stages, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ParseInstruction,
    ResolvePool,
    QuoteSwap,
    BuildTrade,
    ApproveToken,
    SubmitSwap,
    AwaitReceipt,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: ServiceError,
}

/// The swap transaction as far as this session knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub state: TransactionState,
    pub from: Address,
    pub tx_hash: Option<TxHash>,
    /// Slippage bound the calldata was encoded with.
    pub limit: Option<U256>,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
}

impl TransactionRecord {
    pub fn sending(from: Address) -> Self {
        Self {
            state: TransactionState::Sending,
            from,
            tx_hash: None,
            limit: None,
            block_number: None,
            gas_used: None,
        }
    }

    /// Whether a mined receipt has been seen for the broadcast swap.
    pub fn has_receipt(&self) -> bool {
        self.tx_hash.is_some() && self.gas_used.is_some()
    }

    /// Whether sending another swap could duplicate this one.
    ///
    /// A broadcast swap blocks until its receipt shows it reverted, even after the
    /// receipt wait gave up: it may still be mined.
    pub fn blocks_resubmission(&self) -> bool {
        self.tx_hash.is_some() && (!self.has_receipt() || self.state == TransactionState::Sent)
    }
}

/// Validated results of the stages run so far.
///
/// A context is never edited in place: each stage takes the current one and returns its
/// successor. Producing a result drops everything derived from the result it replaces.
#[derive(Debug, Clone, Default)]
pub struct SwapContext {
    instruction: Option<ParsedInstruction>,
    intent: Option<SwapIntent>,
    pool: Option<PoolState>,
    quote: Option<Quote>,
    trade: Option<UncheckedTrade>,
    approval: Option<Approval>,
    transaction: Option<TransactionRecord>,
    last_error: Option<StageFailure>,
}

impl SwapContext {
    /// Starts a new session from a freshly parsed instruction.
    pub fn parsed(instruction: ParsedInstruction, intent: SwapIntent) -> Self {
        Self {
            instruction: Some(instruction),
            intent: Some(intent),
            ..Self::default()
        }
    }

    pub fn with_pool(self, pool: PoolState) -> Self {
        Self {
            pool: Some(pool),
            quote: None,
            trade: None,
            approval: None,
            transaction: None,
            last_error: None,
            ..self
        }
    }

    pub fn with_quote(self, quote: Quote) -> Self {
        Self {
            quote: Some(quote),
            trade: None,
            approval: None,
            transaction: None,
            last_error: None,
            ..self
        }
    }

    pub fn with_trade(self, trade: UncheckedTrade) -> Self {
        Self {
            trade: Some(trade),
            approval: None,
            transaction: None,
            last_error: None,
            ..self
        }
    }

    pub fn with_approval(self, approval: Approval) -> Self {
        Self {
            approval: Some(approval),
            last_error: None,
            ..self
        }
    }

    pub fn with_transaction(self, transaction: TransactionRecord) -> Self {
        Self {
            transaction: Some(transaction),
            last_error: None,
            ..self
        }
    }

    /// Folds a stage failure into the context.
    pub fn record_failure(mut self, stage: Stage, error: &ServiceError) -> Self {
        match error {
            ServiceError::Approval(reason) => {
                if let Some(approval) = self.approval.as_mut() {
                    approval.state = ApprovalState::Failed {
                        reason: reason.clone(),
                    };
                }
            }
            ServiceError::TransactionRejected(_) => {
                self.set_transaction_state(TransactionState::Rejected);
            }
            ServiceError::Submission(_)
            | ServiceError::ReceiptTimeout { .. }
            | ServiceError::ReceiptPolling(_) => {
                self.set_transaction_state(TransactionState::Failed);
            }
            _ => {}
        }

        // Any other error before broadcast still ends the send attempt.
        if stage == Stage::SubmitSwap {
            if let Some(transaction) = self.transaction.as_mut() {
                if transaction.tx_hash.is_none() && transaction.state == TransactionState::Sending {
                    transaction.state = TransactionState::Failed;
                }
            }
        }

        self.last_error = Some(StageFailure {
            stage,
            error: error.clone(),
        });
        self
    }

    fn set_transaction_state(&mut self, state: TransactionState) {
        if let Some(transaction) = self.transaction.as_mut() {
            transaction.state = state;
        }
    }

    pub fn instruction(&self) -> Option<&ParsedInstruction> {
        self.instruction.as_ref()
    }

    pub fn pool(&self) -> Option<&PoolState> {
        self.pool.as_ref()
    }

    pub fn quote(&self) -> Option<&Quote> {
        self.quote.as_ref()
    }

    pub fn trade(&self) -> Option<&UncheckedTrade> {
        self.trade.as_ref()
    }

    pub fn approval(&self) -> Option<&Approval> {
        self.approval.as_ref()
    }

    pub fn transaction(&self) -> Option<&TransactionRecord> {
        self.transaction.as_ref()
    }

    pub fn last_error(&self) -> Option<&StageFailure> {
        self.last_error.as_ref()
    }

    pub fn require_intent(&self) -> ServiceResult<&SwapIntent> {
        self.intent.as_ref().ok_or_else(|| not_ready("parse an instruction first"))
    }

    pub fn require_pool(&self) -> ServiceResult<&PoolState> {
        self.pool.as_ref().ok_or_else(|| not_ready("resolve the pool first"))
    }

    pub fn require_quote(&self) -> ServiceResult<&Quote> {
        self.quote.as_ref().ok_or_else(|| not_ready("quote the swap first"))
    }

    pub fn require_trade(&self) -> ServiceResult<&UncheckedTrade> {
        self.trade.as_ref().ok_or_else(|| not_ready("build the trade first"))
    }

    pub fn require_approval(&self) -> ServiceResult<&Approval> {
        self.approval.as_ref().ok_or_else(|| not_ready("approve the input token first"))
    }

    pub fn require_transaction(&self) -> ServiceResult<&TransactionRecord> {
        self.transaction.as_ref().ok_or_else(|| not_ready("submit the swap first"))
    }

    /// The next stage the user is expected to trigger.
    pub fn next_stage(&self) -> Stage {
        if self.intent.is_none() {
            return Stage::ParseInstruction;
        }
        if self.pool.is_none() {
            return Stage::ResolvePool;
        }
        if self.quote.is_none() {
            return Stage::QuoteSwap;
        }
        if self.trade.is_none() {
            return Stage::BuildTrade;
        }
        if !self.approval.as_ref().is_some_and(Approval::is_approved) {
            return Stage::ApproveToken;
        }
        match &self.transaction {
            Some(tx) if tx.blocks_resubmission() => Stage::AwaitReceipt,
            _ => Stage::SubmitSwap,
        }
    }
}

fn not_ready(message: &str) -> ServiceError {
    ServiceError::StageNotReady(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuoteMethod;
    use crate::service::token_registry::TokenRegistry;
    use crate::service::trade::TradeType;
    use crate::service::instruction::TradeAction;

    fn parsed() -> SwapContext {
        let registry = TokenRegistry::global();
        let instruction = ParsedInstruction {
            action: TradeAction::Buy,
            amount: "5".to_string(),
            token: "USDC".to_string(),
            using: "WETH".to_string(),
        };
        let intent = instruction.to_intent(registry).unwrap();
        SwapContext::parsed(instruction, intent)
    }

    fn pool() -> PoolState {
        PoolState {
            address: Address::repeat_byte(0x88),
            token0: Address::repeat_byte(0x01),
            token1: Address::repeat_byte(0x02),
            fee: 3000,
            liquidity: 1,
            sqrt_price_x96: U256::from(1u64) << 96,
            tick: 0,
            block_number: 7,
        }
    }

    fn quote() -> Quote {
        Quote {
            trade_type: TradeType::ExactOutput,
            amount_in: U256::from(10u64),
            amount_out: U256::from(5u64),
            method: QuoteMethod::Local,
            block_number: 7,
        }
    }

    #[test]
    fn test_stages_require_their_predecessor() {
        let empty = SwapContext::default();
        assert!(matches!(empty.require_intent(), Err(ServiceError::StageNotReady(_))));
        assert_eq!(empty.next_stage(), Stage::ParseInstruction);

        let ctx = parsed();
        assert!(ctx.require_intent().is_ok());
        assert!(matches!(ctx.require_pool(), Err(ServiceError::StageNotReady(_))));
        assert_eq!(ctx.next_stage(), Stage::ResolvePool);
    }

    #[test]
    fn test_new_pool_invalidates_downstream_results() {
        let ctx = parsed().with_pool(pool()).with_quote(quote());
        assert!(ctx.quote().is_some());
        assert_eq!(ctx.next_stage(), Stage::BuildTrade);

        let mut other = pool();
        other.address = Address::repeat_byte(0x77);
        let ctx = ctx.with_pool(other);

        assert!(ctx.quote().is_none());
        assert_eq!(ctx.pool().unwrap().address, Address::repeat_byte(0x77));
        assert_eq!(ctx.next_stage(), Stage::QuoteSwap);
    }

    #[test]
    fn test_failure_is_recorded_and_cleared_by_success() {
        let ctx = parsed()
            .with_pool(pool())
            .record_failure(Stage::QuoteSwap, &ServiceError::Quote("reverted".to_string()));

        let failure = ctx.last_error().unwrap();
        assert_eq!(failure.stage, Stage::QuoteSwap);
        assert!(matches!(failure.error, ServiceError::Quote(_)));
        assert!(ctx.pool().is_some());

        let ctx = ctx.with_quote(quote());
        assert!(ctx.last_error().is_none());
    }

    #[test]
    fn test_transaction_failures_move_state() {
        let from = Address::repeat_byte(0x42);
        let ctx = parsed().with_transaction(TransactionRecord::sending(from));

        let rejected = ctx
            .clone()
            .record_failure(Stage::SubmitSwap, &ServiceError::TransactionRejected("denied".to_string()));
        assert_eq!(rejected.transaction().unwrap().state, TransactionState::Rejected);

        let timed_out = ctx.record_failure(
            Stage::AwaitReceipt,
            &ServiceError::ReceiptTimeout {
                tx_hash: "0x01".to_string(),
                attempts: 3,
            },
        );
        assert_eq!(timed_out.transaction().unwrap().state, TransactionState::Failed);
    }

    #[test]
    fn test_unsent_transaction_fails_on_any_submit_error() {
        let from = Address::repeat_byte(0x42);
        let ctx = parsed().with_transaction(TransactionRecord::sending(from));

        let ctx = ctx.record_failure(
            Stage::SubmitSwap,
            &ServiceError::InsufficientBalance {
                required: "1 WETH".to_string(),
                available: "0 WETH".to_string(),
            },
        );
        let record = ctx.transaction().unwrap();
        assert_eq!(record.state, TransactionState::Failed);
        assert_eq!(record.tx_hash, None);

        let cancelled = parsed()
            .with_transaction(TransactionRecord::sending(from))
            .record_failure(Stage::SubmitSwap, &ServiceError::Cancelled);
        assert_eq!(cancelled.transaction().unwrap().state, TransactionState::Failed);
    }

    #[test]
    fn test_broadcast_transaction_survives_cancelled_receipt_wait() {
        let record = TransactionRecord {
            tx_hash: Some(TxHash::repeat_byte(0x01)),
            ..TransactionRecord::sending(Address::ZERO)
        };
        let ctx = parsed()
            .with_transaction(record)
            .record_failure(Stage::AwaitReceipt, &ServiceError::Cancelled);

        let record = ctx.transaction().unwrap();
        assert_eq!(record.state, TransactionState::Sending);
        assert_eq!(record.tx_hash, Some(TxHash::repeat_byte(0x01)));
    }

    #[test]
    fn test_resubmission_blocked_until_receipt_shows_revert() {
        let mut record = TransactionRecord::sending(Address::ZERO);
        assert!(!record.blocks_resubmission());

        record.tx_hash = Some(TxHash::repeat_byte(0x01));
        assert!(record.blocks_resubmission());

        // Receipt wait gave up: the swap may still be mined.
        record.state = TransactionState::Failed;
        assert!(record.blocks_resubmission());

        record.gas_used = Some(21_000);
        record.block_number = Some(100);
        assert!(record.has_receipt());
        assert!(!record.blocks_resubmission());

        record.state = TransactionState::Sent;
        assert!(record.blocks_resubmission());
    }
}
