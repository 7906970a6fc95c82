use std::sync::Arc;

use alloy::primitives::{Address, B256, U256, keccak256};
use rmcp::schemars::{self, JsonSchema};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::error::ServiceError;
use super::token_registry::TokenInfo;
use super::{ServiceResult, cancellable};
use crate::repository::{ChainRepository, PoolSnapshot};

/// Fee tiers enabled on the V3 factory, in hundredths of a basis point.
pub const FEE_TIERS: [u32; 4] = [100, 500, 3000, 10_000];

/// Identifies a pool: its two tokens in address order plus the fee tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub token0: Address,
    pub token1: Address,
    pub fee: u32,
}

impl PoolKey {
    /// Orders the pair by address, whichever way round it was given.
    pub fn new(token_a: Address, token_b: Address, fee: u32) -> Self {
        let (token0, token1) = if token_a < token_b {
            (token_a, token_b)
        } else {
            (token_b, token_a)
        };
        Self {
            token0,
            token1,
            fee,
        }
    }

    /// CREATE2 address of the pool the factory deploys for this key.
    ///
    /// The salt is `keccak256(abi.encode(token0, token1, fee))`.
    pub fn pool_address(&self, factory: Address, init_code_hash: B256) -> Address {
        let mut encoded = [0u8; 96];
        encoded[12..32].copy_from_slice(self.token0.as_slice());
        encoded[44..64].copy_from_slice(self.token1.as_slice());
        encoded[92..96].copy_from_slice(&self.fee.to_be_bytes());

        factory.create2(keccak256(encoded), init_code_hash)
    }
}

/// A pool read at a single block.
///
/// Goes stale as soon as the pool trades; nothing downstream re-reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolState {
    pub address: Address,
    pub token0: Address,
    pub token1: Address,
    pub fee: u32,
    pub liquidity: u128,
    pub sqrt_price_x96: U256,
    pub tick: i32,
    pub block_number: u64,
}

impl PoolState {
    fn from_snapshot(address: Address, snapshot: PoolSnapshot) -> Self {
        Self {
            address,
            token0: snapshot.token0,
            token1: snapshot.token1,
            fee: snapshot.fee,
            liquidity: snapshot.liquidity,
            sqrt_price_x96: snapshot.sqrt_price_x96,
            tick: snapshot.tick,
            block_number: snapshot.block_number,
        }
    }

    /// Whether swapping `token_in` for `token_out` moves token0 into the pool.
    ///
    /// `None` if the two tokens are not exactly this pool's pair.
    pub fn zero_for_one(&self, token_in: Address, token_out: Address) -> Option<bool> {
        if token_in == self.token0 && token_out == self.token1 {
            Some(true)
        } else if token_in == self.token1 && token_out == self.token0 {
            Some(false)
        } else {
            None
        }
    }
}

/// Summary of a resolved pool as returned to MCP clients.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct PoolSummary {
    pub address: String,
    pub token0: String,
    pub token1: String,
    pub fee: u32,
    pub liquidity: String,
    pub sqrt_price_x96: String,
    pub tick: i32,
    pub block_number: u64,
}

impl From<&PoolState> for PoolSummary {
    fn from(state: &PoolState) -> Self {
        Self {
            address: state.address.to_string(),
            token0: state.token0.to_string(),
            token1: state.token1.to_string(),
            fee: state.fee,
            liquidity: state.liquidity.to_string(),
            sqrt_price_x96: state.sqrt_price_x96.to_string(),
            tick: state.tick,
            block_number: state.block_number,
        }
    }
}

pub struct PoolResolver {
    repository: Arc<dyn ChainRepository>,
    factory: Address,
    init_code_hash: B256,
}

impl PoolResolver {
    pub fn new(repository: Arc<dyn ChainRepository>, factory: Address, init_code_hash: B256) -> Self {
        Self {
            repository,
            factory,
            init_code_hash,
        }
    }

    /// Derives the pool address for a pair; argument order does not matter.
    pub fn resolve_address(
        &self,
        token_a: &TokenInfo,
        token_b: &TokenInfo,
        fee: u32,
    ) -> ServiceResult<Address> {
        if !FEE_TIERS.contains(&fee) {
            return Err(ServiceError::PoolResolution(format!(
                "unsupported fee tier {fee} (expected one of {FEE_TIERS:?})"
            )));
        }
        if token_a.address == token_b.address {
            return Err(ServiceError::PoolResolution(format!(
                "{} cannot be paired with itself",
                token_a.symbol
            )));
        }

        let key = PoolKey::new(token_a.address, token_b.address, fee);
        Ok(key.pool_address(self.factory, self.init_code_hash))
    }

    /// Reads the pool's state with every read pinned to the current block.
    #[instrument(skip(self, ct), err)]
    pub async fn fetch_state(&self, pool: Address, ct: &CancellationToken) -> ServiceResult<PoolState> {
        let block = cancellable(ct, async {
            self.repository
                .block_number()
                .await
                .map_err(|e| ServiceError::PoolResolution(e.to_string()))
        })
        .await?;

        let snapshot = cancellable(ct, async {
            self.repository
                .pool_snapshot(pool, block)
                .await
                .map_err(|e| ServiceError::PoolResolution(format!("pool {pool}: {e}")))
        })
        .await?;

        if snapshot.token0 >= snapshot.token1 {
            return Err(ServiceError::PoolResolution(format!(
                "pool {pool} reports unordered tokens {} / {}",
                snapshot.token0, snapshot.token1
            )));
        }

        Ok(PoolState::from_snapshot(pool, snapshot))
    }

    /// Derives the pool for a pair and reads it, checking the contract really is that pair.
    #[instrument(skip(self, token_a, token_b, ct), fields(a = token_a.symbol, b = token_b.symbol), err)]
    pub async fn resolve(
        &self,
        token_a: &TokenInfo,
        token_b: &TokenInfo,
        fee: u32,
        ct: &CancellationToken,
    ) -> ServiceResult<PoolState> {
        let address = self.resolve_address(token_a, token_b, fee)?;
        tracing::info!(
            "Resolved {}/{} fee {} to pool {}",
            token_a.symbol,
            token_b.symbol,
            fee,
            address
        );

        let state = self.fetch_state(address, ct).await?;

        let key = PoolKey::new(token_a.address, token_b.address, fee);
        if state.token0 != key.token0 || state.token1 != key.token1 || state.fee != fee {
            return Err(ServiceError::PoolResolution(format!(
                "pool {address} does not hold {}/{} at fee {fee}",
                token_a.symbol, token_b.symbol
            )));
        }

        Ok(state)
    }
}
