use super::bucket::TokenBucket;
use crate::chain::{ChainClient, ChainError, JsonRpcClient};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("endpoint pool needs at least one RPC URL")]
    Empty,
}

/// One RPC endpoint with its own request throttle.
#[derive(Debug)]
pub struct RateLimitedEndpoint {
    url: String,
    client: Arc<dyn ChainClient>,
    bucket: TokenBucket,
}

impl RateLimitedEndpoint {
    pub fn new(url: impl Into<String>, client: Arc<dyn ChainClient>, bucket: TokenBucket) -> Self {
        Self {
            url: url.into(),
            client,
            bucket,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn client(&self) -> Arc<dyn ChainClient> {
        self.client.clone()
    }

    /// Block until this endpoint has request quota.
    pub async fn acquire(&self) {
        self.bucket.take().await;
    }
}

/// Attempt budget for a chain read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// Single contract reads (total supply, decimals, token balance).
    pub const SINGLE_READ: RetryPolicy = RetryPolicy {
        attempts: 4,
        delay: Duration::ZERO,
    };
    /// Aggregated multicall round trips.
    pub const BATCH: RetryPolicy = RetryPolicy {
        attempts: 3,
        delay: Duration::from_secs(2),
    };
    /// Active trader enumeration.
    pub const LISTING: RetryPolicy = RetryPolicy {
        attempts: 3,
        delay: Duration::ZERO,
    };
}

/// Round-robin pool of rate-limited endpoints.
#[derive(Debug)]
pub struct EndpointPool {
    endpoints: Vec<Arc<RateLimitedEndpoint>>,
    cursor: Mutex<usize>,
}

impl EndpointPool {
    pub fn new(endpoints: Vec<RateLimitedEndpoint>) -> Result<Self, PoolError> {
        if endpoints.is_empty() {
            return Err(PoolError::Empty);
        }
        Ok(Self {
            endpoints: endpoints.into_iter().map(Arc::new).collect(),
            cursor: Mutex::new(0),
        })
    }

    /// Build a pool of JSON-RPC endpoints sharing one bucket configuration.
    pub fn from_urls(urls: &[String], capacity: u32, refill_per_sec: u32) -> Result<Self, PoolError> {
        let endpoints = urls
            .iter()
            .map(|url| {
                RateLimitedEndpoint::new(
                    url.clone(),
                    Arc::new(JsonRpcClient::new(url.clone())),
                    TokenBucket::new(capacity, refill_per_sec),
                )
            })
            .collect();
        Self::new(endpoints)
    }

    /// Build a pool over arbitrary clients (used with the mock chain).
    pub fn from_clients(
        clients: Vec<Arc<dyn ChainClient>>,
        capacity: u32,
        refill_per_sec: u32,
    ) -> Result<Self, PoolError> {
        let endpoints = clients
            .into_iter()
            .enumerate()
            .map(|(i, client)| {
                RateLimitedEndpoint::new(
                    format!("client-{}", i),
                    client,
                    TokenBucket::new(capacity, refill_per_sec),
                )
            })
            .collect();
        Self::new(endpoints)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Advance the cursor and return the endpoint it now points at.
    pub fn next_endpoint(&self) -> Arc<RateLimitedEndpoint> {
        let mut cursor = self.cursor.lock().unwrap_or_else(|p| p.into_inner());
        *cursor = (*cursor + 1) % self.endpoints.len();
        self.endpoints[*cursor].clone()
    }

    pub async fn wait_for_token(&self, endpoint: &RateLimitedEndpoint) {
        endpoint.acquire().await;
    }

    /// Run `f` against successive endpoints until it succeeds or the policy's
    /// attempts are spent. A missing-contract error is final.
    ///
    /// One token is taken before each attempt; operations issuing several
    /// requests acquire more through the endpoint they are handed.
    pub async fn with_retry<T, F, Fut>(
        &self,
        operation: &str,
        policy: RetryPolicy,
        mut f: F,
    ) -> Result<T, ChainError>
    where
        F: FnMut(Arc<RateLimitedEndpoint>) -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        let attempts = policy.attempts.max(1);
        let mut last_err = ChainError::Network("no attempt made".to_string());
        for attempt in 1..=attempts {
            let endpoint = self.next_endpoint();
            self.wait_for_token(&endpoint).await;
            match f(endpoint.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_no_code() => return Err(err),
                Err(err) => {
                    warn!(
                        operation,
                        attempt,
                        attempts,
                        url = endpoint.url(),
                        error = %err,
                        "chain read failed"
                    );
                    last_err = err;
                    if attempt < attempts && !policy.delay.is_zero() {
                        tokio::time::sleep(policy.delay).await;
                    }
                }
            }
        }
        Err(last_err)
    }
}
