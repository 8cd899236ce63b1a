//! Chain client abstraction for read-only contract calls and log filtering.

use async_trait::async_trait;
use ethers_core::types::{H160, H256};
use std::fmt;
use thiserror::Error;

pub mod abi;
pub mod mock;
pub mod multicall;
pub mod rpc;

pub use mock::MockChain;
pub use multicall::{Call, CallOutcome};
pub use rpc::JsonRpcClient;

/// Read access to one EVM chain endpoint.
///
/// Implementations only move bytes; ABI encoding lives in [`abi`] and
/// call aggregation in [`multicall`].
#[async_trait]
pub trait ChainClient: Send + Sync + fmt::Debug {
    /// Current head block number.
    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Execute a read-only call against `to` at `block` (latest when `None`).
    ///
    /// Returns [`ChainError::NoCode`] when the call returned nothing because
    /// `to` has no contract code.
    async fn call(&self, to: H160, data: Vec<u8>, block: Option<u64>)
        -> Result<Vec<u8>, ChainError>;

    /// Fetch logs matching `query`, ordered by block.
    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<ChainLog>, ChainError>;
}

/// Log filter for a single contract and event signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub address: H160,
    pub topic0: H256,
    pub from_block: u64,
    /// `None` filters up to the latest block.
    pub to_block: Option<u64>,
}

/// Raw log entry as returned by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLog {
    pub address: H160,
    pub block_number: u64,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// Connection failure, timeout, DNS error.
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },
    /// JSON-RPC level error object (reverts, range limits, ...).
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("rate limited")]
    RateLimited,
    #[error("no contract code at given address")]
    NoCode,
    /// Malformed response or undecodable ABI payload.
    #[error("decode error: {0}")]
    Decode(String),
}

impl ChainError {
    pub fn is_no_code(&self) -> bool {
        matches!(self, ChainError::NoCode)
    }
}
