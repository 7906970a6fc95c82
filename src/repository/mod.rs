pub mod alloy;
pub mod contract;
pub mod error;

use ::alloy::primitives::{Address, Bytes, TxHash, U256};
use ::alloy::rpc::types::TransactionRequest;
pub use alloy::AlloyChainRepository;
use async_trait::async_trait;
pub use error::RepositoryError;

pub(crate) type RepoResult<T> = std::result::Result<T, RepositoryError>;

/// Raw Uniswap V3 pool state, every field read at `block_number`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub token0: Address,
    pub token1: Address,
    pub fee: u32,
    pub liquidity: u128,
    pub sqrt_price_x96: U256,
    pub tick: i32,
    pub block_number: u64,
}

/// EIP-1559 fee suggestion in wei.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimate {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// The parts of a mined transaction receipt the pipeline cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptSummary {
    pub tx_hash: TxHash,
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: u64,
}

/// Read-only access to the chain the pool lives on.
///
/// Implementations talk to a JSON-RPC endpoint and convert transport and contract
/// failures into [`RepositoryError`]. Nothing here signs or broadcasts; writes go
/// through the wallet connector.
#[async_trait]
pub trait ChainRepository: Send + Sync {
    /// Returns the latest block number.
    async fn block_number(&self) -> RepoResult<u64>;

    /// Reads `token0`, `token1`, `fee`, `liquidity` and `slot0` of a pool.
    ///
    /// # Arguments
    ///
    /// * `pool` - The pool contract address
    /// * `block` - Block number every read is pinned to
    ///
    /// # Returns
    ///
    /// * `Ok(PoolSnapshot)` - A consistent view of the pool at `block`
    /// * `Err(RepositoryError)` - If any of the reads fails or the address is not a pool
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let block = repository.block_number().await?;
    /// let snapshot = repository.pool_snapshot(pool_address, block).await?;
    /// println!("tick {} at block {}", snapshot.tick, snapshot.block_number);
    /// ```
    async fn pool_snapshot(&self, pool: Address, block: u64) -> RepoResult<PoolSnapshot>;

    /// Simulates `quoteExactOutputSingle` on the V1 quoter and returns the input
    /// amount required to receive `amount_out` of `token_out`.
    ///
    /// # Returns
    ///
    /// * `Ok(U256)` - Required input in the smallest unit of `token_in`
    /// * `Err(RepositoryError::Reverted)` - If the quoter reverts (e.g. no liquidity)
    async fn quote_exact_output_single(
        &self,
        quoter: Address,
        token_in: Address,
        token_out: Address,
        fee: u32,
        amount_out: U256,
    ) -> RepoResult<U256>;

    /// Simulates `quoteExactInputSingle` on the V1 quoter and returns the output
    /// amount received for exactly `amount_in` of `token_in`.
    async fn quote_exact_input_single(
        &self,
        quoter: Address,
        token_in: Address,
        token_out: Address,
        fee: u32,
        amount_in: U256,
    ) -> RepoResult<U256>;

    /// Executes a raw `eth_call` and returns the undecoded result.
    async fn call(&self, to: Address, data: Bytes) -> RepoResult<Bytes>;

    /// ERC20 `balanceOf`.
    async fn token_balance(&self, token: Address, owner: Address) -> RepoResult<U256>;

    /// ERC20 `allowance`.
    async fn allowance(&self, token: Address, owner: Address, spender: Address)
    -> RepoResult<U256>;

    /// Suggests EIP-1559 fee parameters from recent blocks.
    async fn estimate_fees(&self) -> RepoResult<FeeEstimate>;

    /// Estimates the gas a transaction would consume.
    async fn estimate_gas(&self, tx: TransactionRequest) -> RepoResult<u64>;

    /// Looks up a receipt. `Ok(None)` means the transaction is not mined yet.
    async fn transaction_receipt(&self, tx_hash: TxHash) -> RepoResult<Option<ReceiptSummary>>;
}
