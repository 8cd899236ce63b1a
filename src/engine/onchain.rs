//! Contract reads behind the endpoint pool: token balances and supply,
//! active trader listing and available cash.

use super::convert::abdk_to_dec_n;
use crate::chain::multicall::{self, Call, CallOutcome, MAX_CALLS_PER_BATCH};
use crate::chain::{abi, ChainError};
use crate::domain::{Address, BlockNumber};
use crate::endpoint::{EndpointPool, RateLimitedEndpoint, RetryPolicy};
use ethers_core::types::{H160, U256};
use std::sync::Arc;
use tracing::debug;

/// Active accounts fetched per `getActivePerpAccountsByChunks` call.
pub const ACTIVE_ACCOUNTS_CHUNK: u64 = 100;

#[derive(Debug, Clone)]
pub struct ChainReader {
    pool: Arc<EndpointPool>,
    multicall: H160,
}

impl ChainReader {
    pub fn new(pool: Arc<EndpointPool>, multicall: &Address) -> Self {
        Self {
            pool,
            multicall: multicall.to_h160(),
        }
    }

    async fn read_uint(
        &self,
        operation: &str,
        target: H160,
        data: Vec<u8>,
        block: Option<BlockNumber>,
    ) -> Result<U256, ChainError> {
        let result = self
            .pool
            .with_retry(operation, RetryPolicy::SINGLE_READ, |endpoint| {
                let data = data.clone();
                async move { abi::decode_uint(&endpoint.client().call(target, data, block).await?) }
            })
            .await;
        match result {
            Err(ChainError::NoCode) => Ok(U256::zero()),
            other => other,
        }
    }

    pub async fn total_supply(
        &self,
        token: &Address,
        block: Option<BlockNumber>,
    ) -> Result<U256, ChainError> {
        self.read_uint("totalSupply", token.to_h160(), abi::total_supply(), block)
            .await
    }

    pub async fn token_balance(
        &self,
        token: &Address,
        holder: &Address,
        block: Option<BlockNumber>,
    ) -> Result<U256, ChainError> {
        self.read_uint(
            "balanceOf",
            token.to_h160(),
            abi::balance_of(holder.to_h160()),
            block,
        )
        .await
    }

    pub async fn decimals(&self, token: &Address) -> Result<u8, ChainError> {
        let target = token.to_h160();
        self.pool
            .with_retry("decimals", RetryPolicy::SINGLE_READ, |endpoint| async move {
                let client = endpoint.client();
                abi::decode_u8(&client.call(target, abi::decimals(), None).await?)
            })
            .await
    }

    /// Run `calls` through multicall in bounded batches, each batch retried
    /// under `policy`. Results keep call order.
    ///
    /// A missing aggregator surfaces as `NoCode`; it says nothing about the
    /// individual targets, so callers must not read it as zero.
    async fn batched(
        &self,
        operation: &str,
        calls: Vec<Call>,
        block: Option<BlockNumber>,
        policy: RetryPolicy,
    ) -> Result<Vec<CallOutcome>, ChainError> {
        let mut outcomes = Vec::with_capacity(calls.len());
        let multicall = self.multicall;
        for batch in calls.chunks(MAX_CALLS_PER_BATCH) {
            let part = self
                .pool
                .with_retry(operation, policy, |endpoint| {
                    let batch = batch.to_vec();
                    async move {
                        let client = endpoint.client();
                        multicall::aggregate(client.as_ref(), multicall, &batch, block).await
                    }
                })
                .await?;
            outcomes.extend(part);
        }
        Ok(outcomes)
    }

    /// `balanceOf` for every holder; reverted entries read as zero.
    pub async fn token_balances(
        &self,
        token: &Address,
        holders: &[Address],
        block: Option<BlockNumber>,
        policy: RetryPolicy,
    ) -> Result<Vec<U256>, ChainError> {
        let target = token.to_h160();
        let calls = holders
            .iter()
            .map(|h| Call::new(target, abi::balance_of(h.to_h160())))
            .collect();
        let outcomes = self.batched("balanceOf batch", calls, block, policy).await?;
        outcomes.iter().map(uint_or_zero).collect()
    }

    /// Every account with an open position in `perp_id`.
    pub async fn active_traders(
        &self,
        perp_proxy: &Address,
        perp_id: u32,
        block: Option<BlockNumber>,
    ) -> Result<Vec<H160>, ChainError> {
        let target = perp_proxy.to_h160();
        let result = self
            .pool
            .with_retry("active accounts", RetryPolicy::LISTING, |endpoint| async move {
                list_active_accounts(&endpoint, target, perp_id, block).await
            })
            .await;
        match result {
            Err(ChainError::NoCode) => Ok(Vec::new()),
            other => other,
        }
    }

    /// Available cash of `traders` in `perp_id`, as decimal-N pool-token units.
    pub async fn available_cash(
        &self,
        perp_proxy: &Address,
        perp_id: u32,
        traders: &[H160],
        decimals: u8,
        block: Option<BlockNumber>,
    ) -> Result<Vec<U256>, ChainError> {
        let target = perp_proxy.to_h160();
        let calls = traders
            .iter()
            .map(|t| Call::new(target, abi::get_available_cash(perp_id, *t)))
            .collect();
        let outcomes = self
            .batched("getAvailableCash batch", calls, block, RetryPolicy::BATCH)
            .await?;
        outcomes
            .iter()
            .map(|o| match o.data() {
                Some(data) => Ok(abdk_to_dec_n(abi::decode_int128(data)?, decimals)),
                None => {
                    debug!(perp_id, "getAvailableCash reverted, counting as zero");
                    Ok(U256::zero())
                }
            })
            .collect()
    }
}

fn uint_or_zero(outcome: &CallOutcome) -> Result<U256, ChainError> {
    match outcome.data() {
        Some(data) => abi::decode_uint(data),
        None => Ok(U256::zero()),
    }
}

async fn list_active_accounts(
    endpoint: &RateLimitedEndpoint,
    perp_proxy: H160,
    perp_id: u32,
    block: Option<BlockNumber>,
) -> Result<Vec<H160>, ChainError> {
    let client = endpoint.client();
    let count = abi::decode_uint(
        &client
            .call(perp_proxy, abi::count_active_perp_accounts(perp_id), block)
            .await?,
    )?
    .low_u64();

    let mut accounts = Vec::with_capacity(count as usize);
    let mut from = 0;
    while from < count {
        let to = (from + ACTIVE_ACCOUNTS_CHUNK).min(count);
        endpoint.acquire().await;
        let data = abi::get_active_perp_accounts_by_chunks(perp_id, from, to);
        accounts.extend(abi::decode_address_array(
            &client.call(perp_proxy, data, block).await?,
        )?);
        from = to;
    }
    Ok(accounts)
}
