use std::sync::Arc;

use alloy::primitives::{
    Address, U256,
    aliases::{U24, U160},
};
use alloy::sol_types::SolCall;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::error::ServiceError;
use super::instruction::SwapIntent;
use super::pool::PoolState;
use super::swap_math::{exact_input_amount_out, exact_output_amount_in};
use super::token_registry::TokenInfo;
use super::trade::{Route, TradeType};
use super::utils::{format_balance, to_raw_amount};
use super::{ServiceResult, cancellable};
use crate::config::QuoteMethod;
use crate::repository::contract::IQuoterV2;
use crate::repository::{ChainRepository, RepositoryError};

/// Amounts on both sides of a quoted swap, in raw units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub trade_type: TradeType,
    pub amount_in: U256,
    pub amount_out: U256,
    pub method: QuoteMethod,
    /// Block of the pool state the quote was taken against.
    pub block_number: u64,
}

impl Quote {
    /// The side the quote computed, as opposed to the side the user fixed.
    pub fn quoted_amount(&self) -> U256 {
        match self.trade_type {
            TradeType::ExactOutput => self.amount_in,
            TradeType::ExactInput => self.amount_out,
        }
    }
}

pub struct QuoteEngine {
    repository: Arc<dyn ChainRepository>,
    quoter: Address,
    quoter_v2: Address,
    method: QuoteMethod,
}

impl QuoteEngine {
    pub fn new(
        repository: Arc<dyn ChainRepository>,
        quoter: Address,
        quoter_v2: Address,
        method: QuoteMethod,
    ) -> Self {
        Self {
            repository,
            quoter,
            quoter_v2,
            method,
        }
    }

    /// Quotes the intent against `pool` in whichever direction its trade type fixes.
    pub async fn quote(
        &self,
        pool: &PoolState,
        intent: &SwapIntent,
        ct: &CancellationToken,
    ) -> ServiceResult<Quote> {
        match intent.trade_type {
            TradeType::ExactOutput => {
                self.quote_exact_output(pool, &intent.token_in, &intent.token_out, &intent.amount, ct)
                    .await
            }
            TradeType::ExactInput => {
                self.quote_exact_input(pool, &intent.token_in, &intent.token_out, &intent.amount, ct)
                    .await
            }
        }
    }

    /// Input of `token_in` needed to receive `human_output_amount` of `token_out`.
    #[instrument(skip(self, pool, token_in, token_out, ct), fields(pool = %pool.address, token_in = token_in.symbol, token_out = token_out.symbol), err)]
    pub async fn quote_exact_output(
        &self,
        pool: &PoolState,
        token_in: &TokenInfo,
        token_out: &TokenInfo,
        human_output_amount: &str,
        ct: &CancellationToken,
    ) -> ServiceResult<Quote> {
        let zero_for_one = direction(pool, token_in, token_out)?;
        let amount_out = to_raw_amount(human_output_amount, token_out.decimals)?;

        let amount_in = match self.method {
            QuoteMethod::Quoter => {
                cancellable(ct, async {
                    self.repository
                        .quote_exact_output_single(
                            self.quoter,
                            token_in.address,
                            token_out.address,
                            pool.fee,
                            amount_out,
                        )
                        .await
                        .map_err(quote_error)
                })
                .await?
            }
            QuoteMethod::QuoterV2 => {
                let route = Route::single(pool.clone(), *token_in, *token_out)?;
                let call = IQuoterV2::quoteExactOutputSingleCall {
                    params: IQuoterV2::QuoteExactOutputSingleParams {
                        tokenIn: route.input().address,
                        tokenOut: route.output().address,
                        amount: amount_out,
                        fee: U24::from(pool.fee),
                        sqrtPriceLimitX96: U160::ZERO,
                    },
                };
                self.quote_v2(call.abi_encode(), ct).await?
            }
            QuoteMethod::Local => exact_output_amount_in(
                pool.sqrt_price_x96,
                pool.liquidity,
                pool.fee,
                amount_out,
                zero_for_one,
            )
            .map_err(ServiceError::Quote)?,
        };

        if amount_in.is_zero() {
            return Err(ServiceError::Quote(format!(
                "quoted zero {} for {} {}",
                token_in.symbol, human_output_amount, token_out.symbol
            )));
        }

        tracing::info!(
            "Quote ({:?}): {} {} buys {} {}",
            self.method,
            format_balance(amount_in, token_in.decimals),
            token_in.symbol,
            human_output_amount,
            token_out.symbol
        );

        Ok(Quote {
            trade_type: TradeType::ExactOutput,
            amount_in,
            amount_out,
            method: self.method,
            block_number: pool.block_number,
        })
    }

    /// Output of `token_out` received for exactly `human_input_amount` of `token_in`.
    #[instrument(skip(self, pool, token_in, token_out, ct), fields(pool = %pool.address, token_in = token_in.symbol, token_out = token_out.symbol), err)]
    pub async fn quote_exact_input(
        &self,
        pool: &PoolState,
        token_in: &TokenInfo,
        token_out: &TokenInfo,
        human_input_amount: &str,
        ct: &CancellationToken,
    ) -> ServiceResult<Quote> {
        let zero_for_one = direction(pool, token_in, token_out)?;
        let amount_in = to_raw_amount(human_input_amount, token_in.decimals)?;

        let amount_out = match self.method {
            QuoteMethod::Quoter => {
                cancellable(ct, async {
                    self.repository
                        .quote_exact_input_single(
                            self.quoter,
                            token_in.address,
                            token_out.address,
                            pool.fee,
                            amount_in,
                        )
                        .await
                        .map_err(quote_error)
                })
                .await?
            }
            QuoteMethod::QuoterV2 => {
                let route = Route::single(pool.clone(), *token_in, *token_out)?;
                let call = IQuoterV2::quoteExactInputSingleCall {
                    params: IQuoterV2::QuoteExactInputSingleParams {
                        tokenIn: route.input().address,
                        tokenOut: route.output().address,
                        amountIn: amount_in,
                        fee: U24::from(pool.fee),
                        sqrtPriceLimitX96: U160::ZERO,
                    },
                };
                self.quote_v2(call.abi_encode(), ct).await?
            }
            QuoteMethod::Local => exact_input_amount_out(
                pool.sqrt_price_x96,
                pool.liquidity,
                pool.fee,
                amount_in,
                zero_for_one,
            )
            .map_err(ServiceError::Quote)?,
        };

        if amount_out.is_zero() {
            return Err(ServiceError::Quote(format!(
                "{} {} buys zero {}",
                human_input_amount, token_in.symbol, token_out.symbol
            )));
        }

        tracing::info!(
            "Quote ({:?}): {} {} sells for {} {}",
            self.method,
            human_input_amount,
            token_in.symbol,
            format_balance(amount_out, token_out.decimals),
            token_out.symbol
        );

        Ok(Quote {
            trade_type: TradeType::ExactInput,
            amount_in,
            amount_out,
            method: self.method,
            block_number: pool.block_number,
        })
    }

    /// Runs encoded QuoterV2 calldata through `eth_call` and decodes the leading word.
    async fn quote_v2(&self, calldata: Vec<u8>, ct: &CancellationToken) -> ServiceResult<U256> {
        let output = cancellable(ct, async {
            self.repository
                .call(self.quoter_v2, calldata.into())
                .await
                .map_err(quote_error)
        })
        .await?;

        if output.len() < 32 {
            return Err(ServiceError::Quote(format!(
                "quoter returned {} bytes, expected at least 32",
                output.len()
            )));
        }

        Ok(U256::from_be_slice(&output[..32]))
    }
}

/// Derives the swap direction from the resolved tokens, never from a fixed order.
fn direction(pool: &PoolState, token_in: &TokenInfo, token_out: &TokenInfo) -> ServiceResult<bool> {
    pool.zero_for_one(token_in.address, token_out.address)
        .ok_or_else(|| {
            ServiceError::Quote(format!(
                "pool {} trades {}/{}, not {}/{}",
                pool.address, pool.token0, pool.token1, token_in.symbol, token_out.symbol
            ))
        })
}

fn quote_error(err: RepositoryError) -> ServiceError {
    match err {
        RepositoryError::RpcError(msg) => {
            ServiceError::BlockchainError(format!("Failed to interact with blockchain: {msg}"))
        }
        other => ServiceError::Quote(other.to_string()),
    }
}
