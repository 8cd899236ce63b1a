//! Holder universe sources: who has ever received the share token.

use crate::db::Repository;
use crate::domain::{Address, BlockNumber, ChainId};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub mod flipside;

pub use flipside::FlipsideHolderSource;

/// Source of the share-token holder universe.
///
/// Implementations return every address that received the share token at or
/// before `block`, lowercased and without duplicates.
#[async_trait]
pub trait HolderSource: Send + Sync + fmt::Debug {
    async fn holders_up_to(&self, block: BlockNumber) -> Result<Vec<Address>, HolderSourceError>;
}

#[derive(Debug, Error)]
pub enum HolderSourceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Connection timeout, DNS failure.
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("rate limited")]
    RateLimited,
    #[error("parse error: {0}")]
    Parse(String),
    /// Remote query finished in a state other than success.
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Holder universe derived from the locally indexed transfer ledger.
#[derive(Debug, Clone)]
pub struct LedgerHolderSource {
    repo: Arc<Repository>,
    chain_id: ChainId,
}

impl LedgerHolderSource {
    pub fn new(repo: Arc<Repository>, chain_id: ChainId) -> Self {
        Self { repo, chain_id }
    }
}

#[async_trait]
impl HolderSource for LedgerHolderSource {
    async fn holders_up_to(&self, block: BlockNumber) -> Result<Vec<Address>, HolderSourceError> {
        Ok(self
            .repo
            .distinct_receivers_up_to(block, self.chain_id)
            .await?)
    }
}
