//! Balance engine: on-chain reads, delegate reassignment and LP attribution.

pub mod attribution;
pub mod balances;
pub mod convert;
pub mod onchain;

pub use attribution::{
    attribute_lp_balances, combine_balances, reassign_delegates, sum_trader_cash, TraderBalances,
};
pub use balances::{BalanceEngine, EngineError, PoolContracts};
pub use convert::abdk_to_dec_n;
pub use onchain::ChainReader;
