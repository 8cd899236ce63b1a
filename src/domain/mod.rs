//! Domain types shared by the indexer, ledger store and balance engine.
//!
//! This module provides:
//! - Lowercase-normalized EVM addresses and block/chain identifiers
//! - Decimal wrapper for reported amounts
//! - Event rows for the delegate and share-token transfer streams

pub mod balance;
pub mod decimal;
pub mod event;
pub mod primitives;

pub use balance::Balance;
pub use decimal::Decimal;
pub use event::{
    DelegateRecord, EventStream, IndexedEvent, TransferRecord, DELEGATE_INDEX_STRATEGY,
};
pub use primitives::{Address, AddressParseError, BlockNumber, ChainId};
