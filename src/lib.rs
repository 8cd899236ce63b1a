pub mod api;
pub mod chain;
pub mod config;
pub mod datasource;
pub mod db;
pub mod domain;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod orchestration;

pub use config::{Config, PoolConfig};
pub use datasource::{HolderSource, HolderSourceError, LedgerHolderSource};
pub use db::{init_db, Repository};
pub use domain::{Address, Balance, BlockNumber, ChainId, Decimal};
pub use engine::{BalanceEngine, EngineError};
pub use error::AppError;
