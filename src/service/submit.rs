use std::sync::Arc;

use alloy::primitives::{Address, Bytes, TxHash, U256, aliases::{U24, U160}};
use alloy::rpc::types::TransactionRequest;
use alloy::sol_types::SolCall;
use rmcp::schemars::{self, JsonSchema};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::error::ServiceError;
use super::trade::{TradeType, UncheckedTrade};
use super::utils::{add_bps, format_balance, sub_bps};
use super::{ServiceResult, cancellable};
use crate::config::SwapConfig;
use crate::repository::contract::ISwapRouter;
use crate::repository::{ChainRepository, FeeEstimate};
use crate::wallet::{WalletConnector, WalletError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    New,
    Sending,
    Sent,
    Rejected,
    Failed,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Rejected | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapOptions {
    pub slippage_tolerance_bps: u32,
    pub deadline: u64,
    pub recipient: Address,
}

pub fn build_swap_options(recipient: Address, config: &SwapConfig) -> SwapOptions {
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    SwapOptions {
        slippage_tolerance_bps: config.slippage_bps,
        deadline: now + config.deadline_secs,
        recipient,
    }
}

/// Router calldata plus the slippage-adjusted bound it encodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapCalldata {
    pub data: Bytes,
    /// `amountInMaximum` for exact output, `amountOutMinimum` for exact input.
    pub limit: U256,
}

/// Most of the input token the router may pull for `trade`.
pub fn max_input_amount(trade: &UncheckedTrade, slippage_bps: u32) -> U256 {
    match trade.trade_type {
        TradeType::ExactOutput => add_bps(trade.input_amount.raw, slippage_bps),
        TradeType::ExactInput => trade.input_amount.raw,
    }
}

/// Encodes the SwapRouter call for `trade`.
pub fn encode_swap_calldata(trade: &UncheckedTrade, options: &SwapOptions) -> SwapCalldata {
    let route = &trade.route;
    let deadline = U256::from(options.deadline);

    match trade.trade_type {
        TradeType::ExactOutput => {
            let limit = add_bps(trade.input_amount.raw, options.slippage_tolerance_bps);
            let data = if route.is_single_hop() {
                ISwapRouter::exactOutputSingleCall {
                    params: ISwapRouter::ExactOutputSingleParams {
                        tokenIn: route.input().address,
                        tokenOut: route.output().address,
                        fee: U24::from(route.pools()[0].fee),
                        recipient: options.recipient,
                        deadline,
                        amountOut: trade.output_amount.raw,
                        amountInMaximum: limit,
                        sqrtPriceLimitX96: U160::ZERO,
                    },
                }
                .abi_encode()
            } else {
                ISwapRouter::exactOutputCall {
                    params: ISwapRouter::ExactOutputParams {
                        path: route.encode_path(TradeType::ExactOutput),
                        recipient: options.recipient,
                        deadline,
                        amountOut: trade.output_amount.raw,
                        amountInMaximum: limit,
                    },
                }
                .abi_encode()
            };
            SwapCalldata {
                data: data.into(),
                limit,
            }
        }
        TradeType::ExactInput => {
            let limit = sub_bps(trade.output_amount.raw, options.slippage_tolerance_bps);
            let data = if route.is_single_hop() {
                ISwapRouter::exactInputSingleCall {
                    params: ISwapRouter::ExactInputSingleParams {
                        tokenIn: route.input().address,
                        tokenOut: route.output().address,
                        fee: U24::from(route.pools()[0].fee),
                        recipient: options.recipient,
                        deadline,
                        amountIn: trade.input_amount.raw,
                        amountOutMinimum: limit,
                        sqrtPriceLimitX96: U160::ZERO,
                    },
                }
                .abi_encode()
            } else {
                ISwapRouter::exactInputCall {
                    params: ISwapRouter::ExactInputParams {
                        path: route.encode_path(TradeType::ExactInput),
                        recipient: options.recipient,
                        deadline,
                        amountIn: trade.input_amount.raw,
                        amountOutMinimum: limit,
                    },
                }
                .abi_encode()
            };
            SwapCalldata {
                data: data.into(),
                limit,
            }
        }
    }
}

/// A swap the node accepted, not yet mined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSwap {
    pub tx_hash: TxHash,
    pub from: Address,
    pub limit: U256,
    pub gas_limit: u64,
    pub fees: FeeEstimate,
}

pub struct TransactionSubmitter {
    repository: Arc<dyn ChainRepository>,
    router: Address,
    gas_headroom_bps: u32,
}

impl TransactionSubmitter {
    pub fn new(repository: Arc<dyn ChainRepository>, router: Address, gas_headroom_bps: u32) -> Self {
        Self {
            repository,
            router,
            gas_headroom_bps,
        }
    }

    /// Prices, signs and broadcasts the swap from `from`.
    ///
    /// Fees come from the node's EIP-1559 estimate and the gas limit is the estimate
    /// plus the configured headroom.
    #[instrument(skip(self, trade, wallet, ct), err)]
    pub async fn submit(
        &self,
        trade: &UncheckedTrade,
        options: &SwapOptions,
        from: Address,
        wallet: &dyn WalletConnector,
        ct: &CancellationToken,
    ) -> ServiceResult<PendingSwap> {
        let calldata = encode_swap_calldata(trade, options);
        let input = &trade.input_amount;
        let required = max_input_amount(trade, options.slippage_tolerance_bps);

        let balance = cancellable(ct, async {
            self.repository
                .token_balance(input.token.address, from)
                .await
                .map_err(ServiceError::from)
        })
        .await?;

        if balance < required {
            return Err(ServiceError::InsufficientBalance {
                required: format!("{} {}", format_balance(required, input.token.decimals), input.token.symbol),
                available: format!("{} {}", format_balance(balance, input.token.decimals), input.token.symbol),
            });
        }

        let fees = cancellable(ct, async {
            self.repository
                .estimate_fees()
                .await
                .map_err(|e| ServiceError::Submission(format!("fee estimation failed: {e}")))
        })
        .await?;

        let tx = TransactionRequest::default()
            .from(from)
            .to(self.router)
            .input(calldata.data.into())
            .value(U256::ZERO)
            .max_fee_per_gas(fees.max_fee_per_gas)
            .max_priority_fee_per_gas(fees.max_priority_fee_per_gas);

        let estimated = cancellable(ct, async {
            self.repository
                .estimate_gas(tx.clone())
                .await
                .map_err(|e| ServiceError::Submission(format!("gas estimation failed: {e}")))
        })
        .await?;

        let gas_limit = add_bps(U256::from(estimated), self.gas_headroom_bps).saturating_to::<u64>();
        let tx = tx.gas_limit(gas_limit);

        tracing::info!(
            "Sending swap: {} {} -> {} {} (limit {}, gas {}, max fee {} wei)",
            input.formatted(),
            input.token.symbol,
            trade.output_amount.formatted(),
            trade.output_amount.token.symbol,
            calldata.limit,
            gas_limit,
            fees.max_fee_per_gas
        );

        // Not cancellable once started: the hash has to reach the session.
        if ct.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }
        let tx_hash = wallet.send_transaction(tx).await.map_err(|e| match e {
            WalletError::Rejected(msg) => ServiceError::TransactionRejected(msg),
            WalletError::NotConnected => ServiceError::WalletNotConnected,
            other => ServiceError::Submission(other.to_string()),
        })?;

        tracing::info!("Swap transaction sent: {}", tx_hash);

        Ok(PendingSwap {
            tx_hash,
            from,
            limit: calldata.limit,
            gas_limit,
            fees,
        })
    }
}

#[cfg(test)]
mod tests {
    use alloy::sol_types::SolCall;

    use super::*;
    use crate::service::pool::{PoolKey, PoolState};
    use crate::service::token_registry::{TokenInfo, TokenRegistry};
    use crate::service::trade::{Route, build_unchecked_exact_input_trade, build_unchecked_trade};

    fn token(symbol: &str) -> TokenInfo {
        *TokenRegistry::global().lookup(symbol).unwrap()
    }

    fn pool(a: &TokenInfo, b: &TokenInfo, fee: u32) -> PoolState {
        let key = PoolKey::new(a.address, b.address, fee);
        PoolState {
            address: Address::repeat_byte(0x99),
            token0: key.token0,
            token1: key.token1,
            fee,
            liquidity: 1,
            sqrt_price_x96: U256::from(1u64) << 96,
            tick: 0,
            block_number: 1,
        }
    }

    fn options() -> SwapOptions {
        SwapOptions {
            slippage_tolerance_bps: 50,
            deadline: 1_700_000_000,
            recipient: Address::repeat_byte(0x42),
        }
    }

    #[test]
    fn test_swap_options_from_config() {
        let config = SwapConfig {
            slippage_bps: 50,
            deadline_secs: 1200,
            approval_buffer: "2000".to_string(),
            gas_headroom_bps: 2000,
            receipt: crate::config::ReceiptConfig {
                max_attempts: 1,
                initial_delay_ms: 1,
                max_delay_ms: 1,
                backoff_factor: 2.0,
                timeout_secs: 1,
            },
        };
        let recipient = Address::repeat_byte(0x42);
        let before = chrono::Utc::now().timestamp() as u64;

        let options = build_swap_options(recipient, &config);

        assert_eq!(options.slippage_tolerance_bps, 50);
        assert_eq!(options.recipient, recipient);
        assert!(options.deadline >= before + 1200);
        assert!(options.deadline <= chrono::Utc::now().timestamp() as u64 + 1200);
    }

    #[test]
    fn test_exact_output_single_calldata() {
        let (weth, usdc) = (token("WETH"), token("USDC"));
        let route = Route::single(pool(&weth, &usdc, 3000), weth, usdc).unwrap();
        let trade = build_unchecked_trade(route, &weth, &usdc, "5", U256::from(10_000u64)).unwrap();

        let calldata = encode_swap_calldata(&trade, &options());
        assert_eq!(calldata.limit, U256::from(10_050u64));
        assert_eq!(max_input_amount(&trade, 50), U256::from(10_050u64));

        let decoded = ISwapRouter::exactOutputSingleCall::abi_decode(&calldata.data).unwrap();
        assert_eq!(decoded.params.tokenIn, weth.address);
        assert_eq!(decoded.params.tokenOut, usdc.address);
        assert_eq!(decoded.params.amountOut, U256::from(5_000_000u64));
        assert_eq!(decoded.params.amountInMaximum, U256::from(10_050u64));
        assert_eq!(decoded.params.recipient, Address::repeat_byte(0x42));
        assert_eq!(decoded.params.deadline, U256::from(1_700_000_000u64));
    }

    #[test]
    fn test_exact_input_single_calldata() {
        let (weth, usdc) = (token("WETH"), token("USDC"));
        let route = Route::single(pool(&weth, &usdc, 500), weth, usdc).unwrap();
        let trade =
            build_unchecked_exact_input_trade(route, &weth, &usdc, "1", U256::from(3_000_000_000u64))
                .unwrap();

        let calldata = encode_swap_calldata(&trade, &options());
        assert_eq!(calldata.limit, U256::from(2_985_000_000u64));
        assert_eq!(max_input_amount(&trade, 50), trade.input_amount.raw);

        let decoded = ISwapRouter::exactInputSingleCall::abi_decode(&calldata.data).unwrap();
        assert_eq!(decoded.params.amountIn, U256::from(1_000_000_000_000_000_000u64));
        assert_eq!(decoded.params.amountOutMinimum, U256::from(2_985_000_000u64));
        assert_eq!(decoded.params.fee, U24::from(500u32));
    }

    #[test]
    fn test_multi_hop_exact_output_uses_reversed_path() {
        let (weth, usdc, dai) = (token("WETH"), token("USDC"), token("DAI"));
        let route = Route::new(
            vec![pool(&weth, &usdc, 500), pool(&usdc, &dai, 100)],
            vec![weth, usdc, dai],
        )
        .unwrap();
        let trade = build_unchecked_trade(route, &weth, &dai, "10", U256::from(4_000_000u64)).unwrap();

        let calldata = encode_swap_calldata(&trade, &options());
        let decoded = ISwapRouter::exactOutputCall::abi_decode(&calldata.data).unwrap();

        assert_eq!(&decoded.params.path[..20], dai.address.as_slice());
        assert_eq!(&decoded.params.path[decoded.params.path.len() - 20..], weth.address.as_slice());
        assert_eq!(decoded.params.amountInMaximum, U256::from(4_020_000u64));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TransactionState::New.is_terminal());
        assert!(!TransactionState::Sending.is_terminal());
        assert!(TransactionState::Sent.is_terminal());
        assert!(TransactionState::Rejected.is_terminal());
        assert!(TransactionState::Failed.is_terminal());
    }
}
