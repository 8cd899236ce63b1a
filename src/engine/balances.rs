use super::attribution::{
    attribute_lp_balances, combine_balances, reassign_delegates, sum_trader_cash, TraderBalances,
};
use super::onchain::ChainReader;
use crate::chain::ChainError;
use crate::config::PoolConfig;
use crate::datasource::{HolderSource, HolderSourceError};
use crate::db::Repository;
use crate::domain::{Address, Balance, BlockNumber, ChainId, Decimal};
use crate::endpoint::RetryPolicy;
use ethers_core::types::U256;
use futures::future::try_join_all;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("queried block {requested} but only {available} available")]
    BlockNotAvailable {
        requested: BlockNumber,
        available: BlockNumber,
    },
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Holders(#[from] HolderSourceError),
}

/// Contract addresses and market ids the engine reads from.
#[derive(Debug, Clone)]
pub struct PoolContracts {
    pub chain_id: ChainId,
    pub perp_proxy: Address,
    pub pool_token: Address,
    pub share_token: Address,
    pub perpetual_ids: Vec<u32>,
    pub pool_token_decimals: u8,
}

impl PoolContracts {
    pub fn from_config(config: &PoolConfig, pool_token_decimals: u8) -> Self {
        Self {
            chain_id: config.chain_id,
            perp_proxy: config.perp_proxy.clone(),
            pool_token: config.pool_token.clone(),
            share_token: config.share_token.clone(),
            perpetual_ids: config.perpetual_ids.clone(),
            pool_token_decimals,
        }
    }
}

#[derive(Debug)]
struct LpSnapshot {
    shares: Vec<U256>,
    total_supply: U256,
    custody: U256,
}

/// Computes effective pool-token balances at a block.
#[derive(Debug, Clone)]
pub struct BalanceEngine {
    repo: Arc<Repository>,
    holders: Arc<dyn HolderSource>,
    reader: ChainReader,
    contracts: PoolContracts,
}

impl BalanceEngine {
    pub fn new(
        repo: Arc<Repository>,
        holders: Arc<dyn HolderSource>,
        reader: ChainReader,
        contracts: PoolContracts,
    ) -> Self {
        Self {
            repo,
            holders,
            reader,
            contracts,
        }
    }

    pub fn contracts(&self) -> &PoolContracts {
        &self.contracts
    }

    /// Latest block both event streams are indexed through.
    pub async fn latest_block(&self) -> Result<BlockNumber, EngineError> {
        Ok(self.repo.latest_block(self.contracts.chain_id).await?)
    }

    /// Effective balances at `block`.
    ///
    /// With an empty `addresses` the holder universe is every share-token
    /// receiver up to `block` plus every trader, and zero balances are
    /// omitted. Otherwise exactly the given addresses are reported, in order
    /// and without duplicates, including zeros.
    pub async fn compute_balances(
        &self,
        block: BlockNumber,
        addresses: &[Address],
    ) -> Result<Vec<Balance>, EngineError> {
        let available = self.latest_block().await?;
        if block > available {
            return Err(EngineError::BlockNotAvailable {
                requested: block,
                available,
            });
        }

        let exact = !addresses.is_empty();
        let universe = if exact {
            dedup_keep_first(addresses)
        } else {
            self.holders.holders_up_to(block).await?
        };

        let ((traders, trader_total), lp) =
            tokio::try_join!(self.trader_balances(block), self.lp_snapshot(&universe, block))?;
        debug!(
            block,
            traders = traders.len(),
            lps = universe.len(),
            "balance inputs collected"
        );

        let lp_amounts =
            attribute_lp_balances(&lp.shares, lp.total_supply, lp.custody, trader_total);
        let balances = combine_balances(
            &universe,
            exact,
            &lp_amounts,
            traders,
            self.contracts.pool_token_decimals,
        );
        info!(
            block,
            requested = addresses.len(),
            reported = balances.len(),
            "balances computed"
        );
        Ok(balances)
    }

    /// Trader margin per address after delegate reassignment, and its total.
    async fn trader_balances(
        &self,
        block: BlockNumber,
    ) -> Result<(TraderBalances, U256), EngineError> {
        let c = &self.contracts;
        let per_market = try_join_all(c.perpetual_ids.iter().map(|perp_id| async move {
            let traders = self
                .reader
                .active_traders(&c.perp_proxy, *perp_id, Some(block))
                .await?;
            let cash = self
                .reader
                .available_cash(
                    &c.perp_proxy,
                    *perp_id,
                    &traders,
                    c.pool_token_decimals,
                    Some(block),
                )
                .await?;
            Ok::<_, ChainError>(
                traders
                    .into_iter()
                    .map(|t| Address::from_h160(&t))
                    .zip(cash)
                    .collect::<Vec<_>>(),
            )
        }))
        .await?;

        let (mut balances, total) = sum_trader_cash(per_market.into_iter().flatten(), &c.perp_proxy);
        let delegates = self.repo.active_delegates_up_to(block, c.chain_id).await?;
        reassign_delegates(&mut balances, &delegates);
        Ok((balances, total))
    }

    async fn lp_snapshot(
        &self,
        universe: &[Address],
        block: BlockNumber,
    ) -> Result<LpSnapshot, EngineError> {
        let c = &self.contracts;
        let total_supply = self.reader.total_supply(&c.share_token, Some(block)).await?;
        if total_supply.is_zero() {
            return Ok(LpSnapshot {
                shares: vec![U256::zero(); universe.len()],
                total_supply,
                custody: U256::zero(),
            });
        }

        let (shares, custody) = tokio::try_join!(
            self.reader
                .token_balances(&c.share_token, universe, Some(block), RetryPolicy::BATCH),
            self.reader
                .token_balance(&c.pool_token, &c.perp_proxy, Some(block)),
        )?;
        Ok(LpSnapshot {
            shares,
            total_supply,
            custody,
        })
    }

    /// Pool-token balance of each holder contract (the perpetual proxy).
    pub async fn holder_contract_balances(
        &self,
        block: Option<BlockNumber>,
    ) -> Result<Vec<Decimal>, EngineError> {
        let c = &self.contracts;
        let raw = self
            .reader
            .token_balances(
                &c.pool_token,
                std::slice::from_ref(&c.perp_proxy),
                block,
                RetryPolicy::BATCH,
            )
            .await?;
        Ok(raw
            .into_iter()
            .map(|v| Decimal::from_dec_n(v, c.pool_token_decimals))
            .collect())
    }
}

fn dedup_keep_first(addresses: &[Address]) -> Vec<Address> {
    let mut seen = HashSet::with_capacity(addresses.len());
    addresses
        .iter()
        .filter(|a| seen.insert(*a))
        .cloned()
        .collect()
}
