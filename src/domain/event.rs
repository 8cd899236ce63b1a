//! Indexed on-chain events and the streams they come from.

use crate::domain::{Address, BlockNumber};
use serde::{Deserialize, Serialize};
use std::fmt;

/// `SetDelegate` index value marking a strategy wallet whose balance belongs
/// to the delegate.
pub const DELEGATE_INDEX_STRATEGY: i64 = 2;

/// The two event streams the indexer keeps watermarks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStream {
    /// `SetDelegate` events on the perpetual manager proxy.
    Delegate,
    /// `Transfer` events on the pool share token.
    Transfer,
}

impl EventStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStream::Delegate => "delegate",
            EventStream::Transfer => "transfer",
        }
    }
}

impl fmt::Display for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A trader assigning a delegate wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateRecord {
    pub trader: Address,
    pub delegate: Address,
    pub index: i64,
    pub block_number: BlockNumber,
}

/// A share token transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub from: Address,
    pub to: Address,
    pub block_number: BlockNumber,
}

/// A decoded event row from either stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexedEvent {
    Delegate(DelegateRecord),
    Transfer(TransferRecord),
}
