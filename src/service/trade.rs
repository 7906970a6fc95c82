use alloy::primitives::{Bytes, U256};
use rmcp::schemars::{self, JsonSchema};
use serde::{Deserialize, Serialize};

use super::ServiceResult;
use super::error::ServiceError;
use super::pool::PoolState;
use super::token_registry::TokenInfo;
use super::utils::{format_balance, to_raw_amount};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TradeType {
    /// The input amount is fixed; the output is quoted.
    ExactInput,
    /// The output amount is fixed; the input is quoted.
    ExactOutput,
}

/// A raw amount of a specific token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenAmount {
    pub token: TokenInfo,
    pub raw: U256,
}

impl TokenAmount {
    pub fn new(token: TokenInfo, raw: U256) -> Self {
        Self { token, raw }
    }

    pub fn formatted(&self) -> String {
        format_balance(self.raw, self.token.decimals)
    }
}

/// Ordered pool hops with the token path they connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pools: Vec<PoolState>,
    path: Vec<TokenInfo>,
}

impl Route {
    /// Checks that `path` has one more token than there are pools and that each pool
    /// trades exactly the two tokens around it.
    pub fn new(pools: Vec<PoolState>, path: Vec<TokenInfo>) -> ServiceResult<Self> {
        if pools.is_empty() {
            return Err(ServiceError::TradeConstruction(
                "route needs at least one pool".to_string(),
            ));
        }
        if path.len() != pools.len() + 1 {
            return Err(ServiceError::TradeConstruction(format!(
                "route over {} pools needs {} tokens, got {}",
                pools.len(),
                pools.len() + 1,
                path.len()
            )));
        }

        for (hop, pool) in pools.iter().enumerate() {
            let (from, to) = (&path[hop], &path[hop + 1]);
            if pool.zero_for_one(from.address, to.address).is_none() {
                return Err(ServiceError::TradeConstruction(format!(
                    "pool {} does not trade {} for {}",
                    pool.address, from.symbol, to.symbol
                )));
            }
        }

        Ok(Self { pools, path })
    }

    pub fn single(pool: PoolState, token_in: TokenInfo, token_out: TokenInfo) -> ServiceResult<Self> {
        Self::new(vec![pool], vec![token_in, token_out])
    }

    pub fn pools(&self) -> &[PoolState] {
        &self.pools
    }

    pub fn path(&self) -> &[TokenInfo] {
        &self.path
    }

    pub fn input(&self) -> &TokenInfo {
        &self.path[0]
    }

    pub fn output(&self) -> &TokenInfo {
        &self.path[self.path.len() - 1]
    }

    pub fn is_single_hop(&self) -> bool {
        self.pools.len() == 1
    }

    /// Router path bytes: `token | fee(3 bytes) | token | ...`.
    ///
    /// Exact-input paths run input to output. Exact-output paths are reversed, starting
    /// at the output token.
    pub fn encode_path(&self, trade_type: TradeType) -> Bytes {
        let mut encoded = Vec::with_capacity(20 + self.pools.len() * 23);
        let mut push_hop = |token: &TokenInfo, fee: Option<u32>| {
            encoded.extend_from_slice(token.address.as_slice());
            if let Some(fee) = fee {
                encoded.extend_from_slice(&fee.to_be_bytes()[1..]);
            }
        };

        match trade_type {
            TradeType::ExactInput => {
                for (hop, pool) in self.pools.iter().enumerate() {
                    push_hop(&self.path[hop], Some(pool.fee));
                }
                push_hop(self.output(), None);
            }
            TradeType::ExactOutput => {
                for (hop, pool) in self.pools.iter().enumerate().rev() {
                    push_hop(&self.path[hop + 1], Some(pool.fee));
                }
                push_hop(self.input(), None);
            }
        }

        Bytes::from(encoded)
    }
}

/// A trade assembled from a quote without re-checking it against the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UncheckedTrade {
    pub route: Route,
    pub input_amount: TokenAmount,
    pub output_amount: TokenAmount,
    pub trade_type: TradeType,
}

fn check_route(route: &Route, token_in: &TokenInfo, token_out: &TokenInfo) -> ServiceResult<()> {
    if route.input().address != token_in.address {
        return Err(ServiceError::TradeConstruction(format!(
            "route starts at {} but the input token is {}",
            route.input().symbol,
            token_in.symbol
        )));
    }
    if route.output().address != token_out.address {
        return Err(ServiceError::TradeConstruction(format!(
            "route ends at {} but the output token is {}",
            route.output().symbol,
            token_out.symbol
        )));
    }
    Ok(())
}

/// Builds an exact-output trade: `human_output_amount` of `token_out` for
/// `quoted_input_raw` of `token_in`.
pub fn build_unchecked_trade(
    route: Route,
    token_in: &TokenInfo,
    token_out: &TokenInfo,
    human_output_amount: &str,
    quoted_input_raw: U256,
) -> ServiceResult<UncheckedTrade> {
    check_route(&route, token_in, token_out)?;
    if quoted_input_raw.is_zero() {
        return Err(ServiceError::TradeConstruction(
            "quoted input amount is zero".to_string(),
        ));
    }

    let output_raw = to_raw_amount(human_output_amount, token_out.decimals)?;

    Ok(UncheckedTrade {
        route,
        input_amount: TokenAmount::new(*token_in, quoted_input_raw),
        output_amount: TokenAmount::new(*token_out, output_raw),
        trade_type: TradeType::ExactOutput,
    })
}

/// Builds an exact-input trade: `human_input_amount` of `token_in` for
/// `quoted_output_raw` of `token_out`.
pub fn build_unchecked_exact_input_trade(
    route: Route,
    token_in: &TokenInfo,
    token_out: &TokenInfo,
    human_input_amount: &str,
    quoted_output_raw: U256,
) -> ServiceResult<UncheckedTrade> {
    check_route(&route, token_in, token_out)?;
    if quoted_output_raw.is_zero() {
        return Err(ServiceError::TradeConstruction(
            "quoted output amount is zero".to_string(),
        ));
    }

    let input_raw = to_raw_amount(human_input_amount, token_in.decimals)?;

    Ok(UncheckedTrade {
        route,
        input_amount: TokenAmount::new(*token_in, input_raw),
        output_amount: TokenAmount::new(*token_out, quoted_output_raw),
        trade_type: TradeType::ExactInput,
    })
}

#[cfg(test)]
mod tests {
    use alloy::primitives::Address;

    use super::*;
    use crate::service::pool::PoolKey;
    use crate::service::token_registry::TokenRegistry;

    fn token(symbol: &str) -> TokenInfo {
        *TokenRegistry::global().lookup(symbol).unwrap()
    }

    fn pool(a: &TokenInfo, b: &TokenInfo, fee: u32) -> PoolState {
        let key = PoolKey::new(a.address, b.address, fee);
        PoolState {
            address: Address::repeat_byte(fee as u8),
            token0: key.token0,
            token1: key.token1,
            fee,
            liquidity: 1_000_000,
            sqrt_price_x96: U256::from(1u64) << 96,
            tick: 0,
            block_number: 1,
        }
    }

    #[test]
    fn test_exact_output_trade_should_work() {
        let (weth, usdc) = (token("WETH"), token("USDC"));
        let route = Route::single(pool(&weth, &usdc, 3000), weth, usdc).unwrap();

        let trade =
            build_unchecked_trade(route, &weth, &usdc, "5", U256::from(1_671_681_788_103_559u64))
                .unwrap();

        assert_eq!(trade.trade_type, TradeType::ExactOutput);
        assert_eq!(trade.output_amount.raw, U256::from(5_000_000u64));
        assert_eq!(trade.output_amount.token.symbol, "USDC");
        assert_eq!(trade.input_amount.token.symbol, "WETH");
        assert_eq!(trade.input_amount.formatted(), "0.001671681788103559");
    }

    #[test]
    fn test_mismatched_output_token_fails() {
        let (weth, usdc, dai) = (token("WETH"), token("USDC"), token("DAI"));
        let route = Route::single(pool(&weth, &usdc, 3000), weth, usdc).unwrap();

        let result = build_unchecked_trade(route, &weth, &dai, "5", U256::from(1u64));
        assert!(matches!(
            result,
            Err(ServiceError::TradeConstruction(msg)) if msg.contains("DAI")
        ));
    }

    #[test]
    fn test_mismatched_input_token_fails() {
        let (weth, usdc, usdt) = (token("WETH"), token("USDC"), token("USDT"));
        let route = Route::single(pool(&weth, &usdc, 3000), weth, usdc).unwrap();

        let result = build_unchecked_exact_input_trade(route, &usdt, &usdc, "5", U256::from(1u64));
        assert!(matches!(result, Err(ServiceError::TradeConstruction(_))));
    }

    #[test]
    fn test_zero_quote_fails() {
        let (weth, usdc) = (token("WETH"), token("USDC"));
        let route = Route::single(pool(&weth, &usdc, 3000), weth, usdc).unwrap();

        let result = build_unchecked_trade(route, &weth, &usdc, "5", U256::ZERO);
        assert!(matches!(result, Err(ServiceError::TradeConstruction(_))));
    }

    #[test]
    fn test_route_rejects_pool_outside_path() {
        let (weth, usdc, dai) = (token("WETH"), token("USDC"), token("DAI"));

        assert!(Route::single(pool(&weth, &dai, 3000), weth, usdc).is_err());
        assert!(Route::new(vec![pool(&weth, &usdc, 3000)], vec![weth]).is_err());
        assert!(Route::new(vec![], vec![weth, usdc]).is_err());
    }

    #[test]
    fn test_encode_path_orders_hops() {
        let (weth, usdc, dai) = (token("WETH"), token("USDC"), token("DAI"));
        let route = Route::new(
            vec![pool(&dai, &usdc, 100), pool(&usdc, &weth, 500)],
            vec![dai, usdc, weth],
        )
        .unwrap();

        let forward = route.encode_path(TradeType::ExactInput);
        assert_eq!(forward.len(), 20 * 3 + 3 * 2);
        assert_eq!(&forward[..20], dai.address.as_slice());
        assert_eq!(&forward[20..23], &[0x00, 0x00, 0x64]);
        assert_eq!(&forward[43..46], &[0x00, 0x01, 0xf4]);
        assert_eq!(&forward[46..], weth.address.as_slice());

        let reversed = route.encode_path(TradeType::ExactOutput);
        assert_eq!(&reversed[..20], weth.address.as_slice());
        assert_eq!(&reversed[20..23], &[0x00, 0x01, 0xf4]);
        assert_eq!(&reversed[23..43], usdc.address.as_slice());
        assert_eq!(&reversed[43..46], &[0x00, 0x00, 0x64]);
        assert_eq!(&reversed[46..], dai.address.as_slice());
    }
}
