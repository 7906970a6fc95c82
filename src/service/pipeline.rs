use std::sync::Arc;

use alloy::primitives::Address;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::approval::{ApprovalManager, ApprovalState};
use super::error::ServiceError;
use super::instruction::InstructionParser;
use super::pool::PoolResolver;
use super::quote::QuoteEngine;
use super::receipt::ReceiptPoller;
use super::session::{SwapContext, TransactionRecord};
use super::submit::{TransactionState, TransactionSubmitter, build_swap_options, max_input_amount};
use super::token_registry::TokenRegistry;
use super::trade::{Route, TradeType, build_unchecked_exact_input_trade, build_unchecked_trade};
use super::{ServiceResult, cancellable};
use crate::config::{Config, SwapConfig};
use crate::llm::TextCompletion;
use crate::repository::ChainRepository;
use crate::wallet::WalletConnector;

/// The stage implementations, shared by every session.
///
/// Each stage reads the results it needs from a [`SwapContext`] and returns the
/// successor context; none of them touch session state directly.
pub struct SwapPipeline {
    registry: &'static TokenRegistry,
    parser: InstructionParser,
    resolver: PoolResolver,
    quotes: QuoteEngine,
    approvals: ApprovalManager,
    submitter: TransactionSubmitter,
    receipts: ReceiptPoller,
    swap: SwapConfig,
    router: Address,
    default_fee_tier: u32,
}

impl SwapPipeline {
    pub fn new(
        config: &Config,
        repository: Arc<dyn ChainRepository>,
        completion: Arc<dyn TextCompletion>,
    ) -> Self {
        let uniswap = &config.uniswap;
        let swap = config.swap.clone();

        Self {
            registry: TokenRegistry::global(),
            parser: InstructionParser::new(completion),
            resolver: PoolResolver::new(
                repository.clone(),
                uniswap.factory,
                uniswap.pool_init_code_hash,
            ),
            quotes: QuoteEngine::new(
                repository.clone(),
                uniswap.quoter,
                uniswap.quoter_v2,
                uniswap.quote_method,
            ),
            approvals: ApprovalManager::new(
                repository.clone(),
                ReceiptPoller::new(repository.clone(), &swap.receipt),
                swap.approval_buffer.clone(),
            ),
            submitter: TransactionSubmitter::new(
                repository.clone(),
                uniswap.swap_router,
                swap.gas_headroom_bps,
            ),
            receipts: ReceiptPoller::new(repository, &swap.receipt),
            router: uniswap.swap_router,
            default_fee_tier: uniswap.fee_tier,
            swap,
        }
    }

    pub fn registry(&self) -> &'static TokenRegistry {
        self.registry
    }

    /// Extracts an instruction from `text` and starts a new context from it.
    pub async fn parse_instruction(&self, text: &str, ct: &CancellationToken) -> ServiceResult<SwapContext> {
        let instruction = self.parser.parse(text, ct).await?;
        let intent = instruction.to_intent(self.registry)?;

        tracing::info!(
            "Parsed {:?} {} {}: {} -> {} ({:?})",
            instruction.action,
            instruction.amount,
            intent.amount_token().symbol,
            intent.token_in.symbol,
            intent.token_out.symbol,
            intent.trade_type
        );

        Ok(SwapContext::parsed(instruction, intent))
    }

    pub async fn resolve_pool(
        &self,
        ctx: SwapContext,
        fee_tier: Option<u32>,
        ct: &CancellationToken,
    ) -> ServiceResult<SwapContext> {
        let intent = ctx.require_intent()?;
        let fee = fee_tier.unwrap_or(self.default_fee_tier);

        let pool = self
            .resolver
            .resolve(&intent.token_in, &intent.token_out, fee, ct)
            .await?;

        tracing::info!(
            "Pool {} at block {}: liquidity {}, tick {}",
            pool.address,
            pool.block_number,
            pool.liquidity,
            pool.tick
        );

        Ok(ctx.with_pool(pool))
    }

    pub async fn quote_swap(&self, ctx: SwapContext, ct: &CancellationToken) -> ServiceResult<SwapContext> {
        let intent = ctx.require_intent()?;
        let pool = ctx.require_pool()?;

        let quote = self.quotes.quote(pool, intent, ct).await?;
        Ok(ctx.with_quote(quote))
    }

    pub fn build_trade(&self, ctx: SwapContext) -> ServiceResult<SwapContext> {
        let intent = ctx.require_intent()?;
        let pool = ctx.require_pool()?;
        let quote = ctx.require_quote()?;

        if quote.trade_type != intent.trade_type {
            return Err(ServiceError::StageNotReady(
                "quote does not match the instruction, quote the swap again".to_string(),
            ));
        }

        let route = Route::single(pool.clone(), intent.token_in, intent.token_out)?;
        let build = match intent.trade_type {
            TradeType::ExactOutput => build_unchecked_trade,
            TradeType::ExactInput => build_unchecked_exact_input_trade,
        };
        let trade = build(
            route,
            &intent.token_in,
            &intent.token_out,
            &intent.amount,
            quote.quoted_amount(),
        )?;

        tracing::info!(
            "Built {:?} trade: {} {} -> {} {}",
            trade.trade_type,
            trade.input_amount.formatted(),
            trade.input_amount.token.symbol,
            trade.output_amount.formatted(),
            trade.output_amount.token.symbol
        );

        Ok(ctx.with_trade(trade))
    }

    /// Sends the approval if one is needed. The returned context may hold a `Pending`
    /// approval that [`SwapPipeline::confirm_approval`] settles.
    #[instrument(skip(self, ctx, wallet, ct), err)]
    pub async fn request_approval(
        &self,
        ctx: SwapContext,
        account: Address,
        wallet: &dyn WalletConnector,
        ct: &CancellationToken,
    ) -> ServiceResult<SwapContext> {
        let trade = ctx.require_trade()?;
        let token = trade.input_amount.token;
        let required = max_input_amount(trade, self.swap.slippage_bps);

        if let Some(approval) = ctx.approval() {
            if approval.covers(token.address, account, self.router, required) {
                return Ok(ctx);
            }
            if matches!(approval.state, ApprovalState::Pending { .. }) && approval.owner == account {
                tracing::info!("Resuming pending approval {:?}", approval.pending_tx());
                return Ok(ctx);
            }
        }

        let approval = self
            .approvals
            .ensure_approval(&token, self.router, account, required, wallet, ct)
            .await?;

        Ok(ctx.with_approval(approval))
    }

    pub async fn confirm_approval(&self, ctx: SwapContext, ct: &CancellationToken) -> ServiceResult<SwapContext> {
        let approval = ctx.require_approval()?;
        if approval.pending_tx().is_none() {
            return Ok(ctx);
        }

        let confirmed = self.approvals.confirm(approval, ct).await?;
        Ok(ctx.with_approval(confirmed))
    }

    /// Checks that the session may send a swap from `account` and marks it `Sending`.
    pub fn prepare_submission(&self, ctx: SwapContext, account: Address) -> ServiceResult<SwapContext> {
        let trade = ctx.require_trade()?;
        let approval = ctx.require_approval()?;

        if let Some(tx) = ctx.transaction().filter(|tx| tx.blocks_resubmission()) {
            let hash = tx.tx_hash.map(|h| h.to_string()).unwrap_or_default();
            return Err(ServiceError::StageNotReady(if tx.has_receipt() {
                format!("swap {hash} already succeeded, parse a new instruction for another swap")
            } else {
                format!("swap {hash} was broadcast and has no receipt yet, await its receipt before sending again")
            }));
        }

        let token = trade.input_amount.token.address;
        let required = max_input_amount(trade, self.swap.slippage_bps);
        if !approval.covers(token, account, self.router, required) {
            return Err(ServiceError::StageNotReady(if approval.owner != account {
                format!(
                    "approval was granted by {} but the connected account is {account}, approve again",
                    approval.owner
                )
            } else {
                "approval is not confirmed for this trade, approve the input token first".to_string()
            }));
        }

        Ok(ctx.with_transaction(TransactionRecord::sending(account)))
    }

    #[instrument(skip(self, ctx, wallet, ct), err)]
    pub async fn submit_swap(
        &self,
        ctx: SwapContext,
        wallet: &dyn WalletConnector,
        ct: &CancellationToken,
    ) -> ServiceResult<SwapContext> {
        let trade = ctx.require_trade()?;
        let record = ctx.require_transaction()?;
        let from = record.from;

        let options = build_swap_options(from, &self.swap);
        let pending = self.submitter.submit(trade, &options, from, wallet, ct).await?;

        Ok(ctx.with_transaction(TransactionRecord {
            state: TransactionState::Sending,
            from,
            tx_hash: Some(pending.tx_hash),
            limit: Some(pending.limit),
            block_number: None,
            gas_used: None,
        }))
    }

    pub async fn await_receipt(&self, ctx: SwapContext, ct: &CancellationToken) -> ServiceResult<SwapContext> {
        let record = ctx.require_transaction()?;
        let Some(tx_hash) = record.tx_hash else {
            return Err(ServiceError::StageNotReady(
                "swap has not been broadcast yet".to_string(),
            ));
        };
        if record.has_receipt() && record.state.is_terminal() {
            return Ok(ctx);
        }

        let receipt = self.receipts.await_receipt(tx_hash, ct).await?;
        let state = if receipt.success {
            TransactionState::Sent
        } else {
            TransactionState::Failed
        };

        if state == TransactionState::Failed {
            tracing::error!("Swap {} reverted in block {:?}", tx_hash, receipt.block_number);
        }

        let record = TransactionRecord {
            state,
            block_number: receipt.block_number,
            gas_used: Some(receipt.gas_used),
            ..record.clone()
        };
        Ok(ctx.with_transaction(record))
    }
}

/// Resolves the wallet's active account, observing cancellation.
pub async fn connected_account(
    wallet: Option<&dyn WalletConnector>,
    ct: &CancellationToken,
) -> ServiceResult<Address> {
    let wallet = wallet.ok_or(ServiceError::WalletNotConnected)?;
    cancellable(ct, async { wallet.connected_account().await.map_err(ServiceError::from) }).await
}
