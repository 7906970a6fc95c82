use std::sync::Arc;

use alloy::eips::BlockId;
use alloy::primitives::{
    Address, Bytes, TxHash, U256,
    aliases::{U24, U160},
};
use alloy::providers::Provider;
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use tracing::instrument;

use super::error::RepositoryError;
use crate::repository::contract::{IERC20, IQuoter, IUniswapV3Pool};
use crate::repository::{ChainRepository, FeeEstimate, PoolSnapshot, ReceiptSummary, RepoResult};

pub struct AlloyChainRepository<P> {
    provider: Arc<P>,
}

impl<P: Provider + Clone + 'static> AlloyChainRepository<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P: Provider + Clone + Send + Sync + 'static> ChainRepository for AlloyChainRepository<P> {
    #[instrument(skip(self), err)]
    async fn block_number(&self) -> RepoResult<u64> {
        self.provider.get_block_number().await.map_err(|e| {
            if e.to_string().contains("429") {
                tracing::warn!("Rate limited while getting block number");
            }
            RepositoryError::RpcError(e.to_string())
        })
    }

    #[instrument(skip(self), err)]
    async fn pool_snapshot(&self, pool: Address, block: u64) -> RepoResult<PoolSnapshot> {
        let contract = IUniswapV3Pool::new(pool, self.provider.clone());
        let at = BlockId::number(block);

        // All five reads observe the same block, so the snapshot is internally consistent.
        let (token0, token1, fee, liquidity, slot0) = tokio::try_join!(
            async {
                contract
                    .token0()
                    .block(at)
                    .call()
                    .await
                    .map_err(|e| RepositoryError::from_call("token0", e))
            },
            async {
                contract
                    .token1()
                    .block(at)
                    .call()
                    .await
                    .map_err(|e| RepositoryError::from_call("token1", e))
            },
            async {
                contract
                    .fee()
                    .block(at)
                    .call()
                    .await
                    .map_err(|e| RepositoryError::from_call("fee", e))
            },
            async {
                contract
                    .liquidity()
                    .block(at)
                    .call()
                    .await
                    .map_err(|e| RepositoryError::from_call("liquidity", e))
            },
            async {
                contract
                    .slot0()
                    .block(at)
                    .call()
                    .await
                    .map_err(|e| RepositoryError::from_call("slot0", e))
            },
        )?;

        let tick = i32::try_from(slot0.tick)
            .map_err(|e| RepositoryError::DecodeError(format!("tick out of range: {e}")))?;

        tracing::debug!(
            "Pool {} at block {}: liquidity={}, sqrtPriceX96={}, tick={}",
            pool,
            block,
            liquidity,
            slot0.sqrtPriceX96,
            tick
        );

        Ok(PoolSnapshot {
            token0,
            token1,
            fee: fee.to::<u32>(),
            liquidity,
            sqrt_price_x96: U256::from(slot0.sqrtPriceX96),
            tick,
            block_number: block,
        })
    }

    #[instrument(skip(self), err)]
    async fn quote_exact_output_single(
        &self,
        quoter: Address,
        token_in: Address,
        token_out: Address,
        fee: u32,
        amount_out: U256,
    ) -> RepoResult<U256> {
        let quoter = IQuoter::new(quoter, self.provider.clone());

        let amount_in = quoter
            .quoteExactOutputSingle(token_in, token_out, U24::from(fee), amount_out, U160::ZERO)
            .call()
            .await
            .map_err(|e| {
                tracing::error!(
                    "Failed to quote {} -> {} (fee: {}, amount_out: {}): {}",
                    token_in,
                    token_out,
                    fee,
                    amount_out,
                    e
                );
                RepositoryError::from_call("quoteExactOutputSingle", e)
            })?;

        tracing::debug!("Quoter result - amountIn: {}", amount_in);
        Ok(amount_in)
    }

    #[instrument(skip(self), err)]
    async fn quote_exact_input_single(
        &self,
        quoter: Address,
        token_in: Address,
        token_out: Address,
        fee: u32,
        amount_in: U256,
    ) -> RepoResult<U256> {
        let quoter = IQuoter::new(quoter, self.provider.clone());

        let amount_out = quoter
            .quoteExactInputSingle(token_in, token_out, U24::from(fee), amount_in, U160::ZERO)
            .call()
            .await
            .map_err(|e| {
                tracing::error!(
                    "Failed to quote {} -> {} (fee: {}, amount_in: {}): {}",
                    token_in,
                    token_out,
                    fee,
                    amount_in,
                    e
                );
                RepositoryError::from_call("quoteExactInputSingle", e)
            })?;

        tracing::debug!("Quoter result - amountOut: {}", amount_out);
        Ok(amount_out)
    }

    #[instrument(skip(self, data), err)]
    async fn call(&self, to: Address, data: Bytes) -> RepoResult<Bytes> {
        let tx = TransactionRequest::default().to(to).input(data.into());

        self.provider
            .call(tx)
            .await
            .map_err(|e| RepositoryError::from_call("eth_call", e))
    }

    #[instrument(skip(self), err)]
    async fn token_balance(&self, token: Address, owner: Address) -> RepoResult<U256> {
        let contract = IERC20::new(token, self.provider.clone());

        contract
            .balanceOf(owner)
            .call()
            .await
            .map_err(|e| RepositoryError::from_call("balanceOf", e))
    }

    #[instrument(skip(self), err)]
    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> RepoResult<U256> {
        let contract = IERC20::new(token, self.provider.clone());

        contract
            .allowance(owner, spender)
            .call()
            .await
            .map_err(|e| RepositoryError::from_call("allowance", e))
    }

    #[instrument(skip(self), err)]
    async fn estimate_fees(&self) -> RepoResult<FeeEstimate> {
        let estimation = self
            .provider
            .estimate_eip1559_fees()
            .await
            .map_err(|e| RepositoryError::RpcError(e.to_string()))?;

        Ok(FeeEstimate {
            max_fee_per_gas: estimation.max_fee_per_gas,
            max_priority_fee_per_gas: estimation.max_priority_fee_per_gas,
        })
    }

    #[instrument(skip(self, tx), err)]
    async fn estimate_gas(&self, tx: TransactionRequest) -> RepoResult<u64> {
        self.provider
            .estimate_gas(tx)
            .await
            .map_err(|e| RepositoryError::from_call("estimate_gas", e))
    }

    #[instrument(skip(self), err)]
    async fn transaction_receipt(&self, tx_hash: TxHash) -> RepoResult<Option<ReceiptSummary>> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| RepositoryError::RpcError(e.to_string()))?;

        Ok(receipt.map(|receipt| ReceiptSummary {
            tx_hash: receipt.transaction_hash,
            success: receipt.status(),
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
        }))
    }
}
