pub mod indexer;
pub mod scheduler;

pub use indexer::{CycleReport, EventIndexer, IndexError, IndexerConfig, StreamProgress};
pub use scheduler::spawn_indexer;
