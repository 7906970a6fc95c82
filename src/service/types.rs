use rmcp::schemars::{self, JsonSchema};
use serde::{Deserialize, Serialize};

use crate::service::ServiceError;
use crate::service::approval::{Approval, ApprovalState};
use crate::service::instruction::{ParsedInstruction, SwapIntent};
use crate::service::pool::PoolSummary;
use crate::service::quote::Quote;
use crate::service::session::{Stage, StageFailure, SwapContext, TransactionRecord};
use crate::service::submit::TransactionState;
use crate::service::token_registry::TokenInfo;
use crate::service::trade::{TradeType, UncheckedTrade};
use crate::service::utils::format_balance;

/// Outcome of a stage tool: the stage's response, or the error that halted the pipeline.
#[derive(Debug, JsonSchema, Serialize)]
#[serde(untagged)]
pub enum StageResult<T> {
    Success(T),
    Error { error: ServiceError },
}

impl<T> From<Result<T, ServiceError>> for StageResult<T> {
    fn from(result: Result<T, ServiceError>) -> Self {
        match result {
            Ok(response) => StageResult::Success(response),
            Err(error) => StageResult::Error { error },
        }
    }
}

#[derive(Debug, JsonSchema, Serialize, Deserialize)]
pub struct ParseInstructionRequest {
    /// Free-form trade instruction (e.g., "Buy 5 USDC using WETH")
    pub text: String,
}

#[derive(Debug, JsonSchema, Serialize)]
pub struct ParseInstructionResponse {
    /// Fields extracted from the text
    pub instruction: ParsedInstruction,
    /// Token paid into the pool
    pub token_in: String,
    /// Token received from the pool
    pub token_out: String,
    /// Human-readable amount as given in the instruction
    pub amount: String,
    /// Token the amount is denominated in
    pub amount_token: String,
    pub trade_type: TradeType,
}

impl ParseInstructionResponse {
    pub fn new(instruction: &ParsedInstruction, intent: &SwapIntent) -> Self {
        Self {
            instruction: instruction.clone(),
            token_in: intent.token_in.symbol.to_string(),
            token_out: intent.token_out.symbol.to_string(),
            amount: intent.amount.clone(),
            amount_token: intent.amount_token().symbol.to_string(),
            trade_type: intent.trade_type,
        }
    }
}

#[derive(Debug, Default, JsonSchema, Serialize, Deserialize)]
pub struct ResolvePoolRequest {
    /// Optional fee tier in hundredths of a basis point (100, 500, 3000 or 10000).
    /// Defaults to the configured tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_tier: Option<u32>,
}

#[derive(Debug, JsonSchema, Serialize)]
pub struct ResolvePoolResponse {
    pub pool: PoolSummary,
}

#[derive(Debug, Clone, JsonSchema, Serialize)]
pub struct QuoteSwapResponse {
    pub trade_type: TradeType,
    pub token_in: String,
    pub token_out: String,
    /// Input amount formatted with decimals
    pub amount_in: String,
    /// Input amount in the token's smallest unit
    pub amount_in_raw: String,
    /// Output amount formatted with decimals
    pub amount_out: String,
    /// Output amount in the token's smallest unit
    pub amount_out_raw: String,
    /// Quote source ("quoter", "quoter_v2" or "local")
    pub method: String,
    /// Block of the pool state the quote was taken against
    pub block_number: u64,
}

impl QuoteSwapResponse {
    pub fn new(quote: &Quote, token_in: &TokenInfo, token_out: &TokenInfo) -> Self {
        Self {
            trade_type: quote.trade_type,
            token_in: token_in.symbol.to_string(),
            token_out: token_out.symbol.to_string(),
            amount_in: format_balance(quote.amount_in, token_in.decimals),
            amount_in_raw: quote.amount_in.to_string(),
            amount_out: format_balance(quote.amount_out, token_out.decimals),
            amount_out_raw: quote.amount_out.to_string(),
            method: quote.method.as_str().to_string(),
            block_number: quote.block_number,
        }
    }
}

#[derive(Debug, Clone, JsonSchema, Serialize)]
pub struct BuildTradeResponse {
    pub trade_type: TradeType,
    /// Token symbols from input to output
    pub route: Vec<String>,
    /// Pool addresses in hop order
    pub pools: Vec<String>,
    pub input_amount: String,
    pub input_amount_raw: String,
    pub output_amount: String,
    pub output_amount_raw: String,
}

impl From<&UncheckedTrade> for BuildTradeResponse {
    fn from(trade: &UncheckedTrade) -> Self {
        Self {
            trade_type: trade.trade_type,
            route: trade.route.path().iter().map(|t| t.symbol.to_string()).collect(),
            pools: trade
                .route
                .pools()
                .iter()
                .map(|p| p.address.to_string())
                .collect(),
            input_amount: trade.input_amount.formatted(),
            input_amount_raw: trade.input_amount.raw.to_string(),
            output_amount: trade.output_amount.formatted(),
            output_amount_raw: trade.output_amount.raw.to_string(),
        }
    }
}

#[derive(Debug, Clone, JsonSchema, Serialize)]
pub struct ApproveTokenResponse {
    pub token: String,
    pub owner: String,
    pub spender: String,
    /// Allowance granted, formatted with decimals
    pub amount: String,
    pub approval: ApprovalState,
}

impl From<&Approval> for ApproveTokenResponse {
    fn from(approval: &Approval) -> Self {
        Self {
            token: approval.token.symbol.to_string(),
            owner: approval.owner.to_string(),
            spender: approval.spender.to_string(),
            amount: format_balance(approval.amount, approval.token.decimals),
            approval: approval.state.clone(),
        }
    }
}

#[derive(Debug, Clone, JsonSchema, Serialize)]
pub struct TransactionResponse {
    pub state: TransactionState,
    pub from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// `amountInMaximum` (buys) or `amountOutMinimum` (sells), raw
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slippage_limit_raw: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<u64>,
}

impl From<&TransactionRecord> for TransactionResponse {
    fn from(record: &TransactionRecord) -> Self {
        Self {
            state: record.state,
            from: record.from.to_string(),
            tx_hash: record.tx_hash.map(|h| h.to_string()),
            slippage_limit_raw: record.limit.map(|l| l.to_string()),
            block_number: record.block_number,
            gas_used: record.gas_used,
        }
    }
}

/// Everything the session has produced so far.
#[derive(Debug, JsonSchema, Serialize)]
pub struct SessionStatusResponse {
    pub next_stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<ParseInstructionResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote: Option<QuoteSwapResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade: Option<BuildTradeResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApproveTokenResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<StageFailure>,
}

impl From<&SwapContext> for SessionStatusResponse {
    fn from(ctx: &SwapContext) -> Self {
        let intent = ctx.require_intent().ok();
        Self {
            next_stage: ctx.next_stage(),
            instruction: ctx
                .instruction()
                .zip(intent)
                .map(|(instruction, intent)| ParseInstructionResponse::new(instruction, intent)),
            pool: ctx.pool().map(PoolSummary::from),
            quote: ctx
                .quote()
                .zip(intent)
                .map(|(quote, intent)| QuoteSwapResponse::new(quote, &intent.token_in, &intent.token_out)),
            trade: ctx.trade().map(BuildTradeResponse::from),
            approval: ctx.approval().map(ApproveTokenResponse::from),
            transaction: ctx.transaction().map(TransactionResponse::from),
            last_error: ctx.last_error().cloned(),
        }
    }
}

#[derive(Debug, JsonSchema, Serialize)]
pub struct CancelSessionResponse {
    /// Whether a stage was running when the session was cancelled
    pub interrupted: bool,
}

#[derive(Debug, JsonSchema, Serialize)]
pub struct ResetSessionResponse {
    pub next_stage: Stage,
}

#[derive(Debug, JsonSchema, Serialize)]
pub struct TokenSummary {
    pub symbol: String,
    pub name: String,
    pub address: String,
    pub decimals: u8,
}

impl From<&TokenInfo> for TokenSummary {
    fn from(token: &TokenInfo) -> Self {
        Self {
            symbol: token.symbol.to_string(),
            name: token.name.to_string(),
            address: token.address.to_string(),
            decimals: token.decimals,
        }
    }
}

#[derive(Debug, JsonSchema, Serialize)]
pub struct ListTokensResponse {
    pub tokens: Vec<TokenSummary>,
}
