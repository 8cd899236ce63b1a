//! Rate-limited RPC endpoints and round-robin failover.

pub mod bucket;
pub mod pool;

pub use bucket::TokenBucket;
pub use pool::{EndpointPool, PoolError, RateLimitedEndpoint, RetryPolicy};
