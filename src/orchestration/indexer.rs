//! Incremental indexer for the delegate and share-token transfer streams.
//!
//! Each stream is scanned from its watermark to the chain head in bounded
//! block windows. A failed window aborts the pass; the next pass starts over
//! from the same block with half the window size.

use crate::chain::{abi, ChainClient, ChainError, ChainLog, LogQuery};
use crate::db::Repository;
use crate::domain::{Address, BlockNumber, ChainId, EventStream, IndexedEvent};
use crate::endpoint::EndpointPool;
use ethers_core::types::{H160, H256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Emit a progress line every this many windows.
const PROGRESS_EVERY: u64 = 100;

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Blocks per log window on the first pass.
    pub initial_chunk: u64,
    pub max_passes: u32,
    /// Pause before pass `n` is `pass_delay * (n - 1)`.
    pub pass_delay: Duration,
    /// Quiescent time between cycles.
    pub interval: Duration,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            initial_chunk: 32_768,
            max_passes: 7,
            pass_delay: Duration::from_secs(5),
            interval: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error("{stream} scan gave up after {passes} passes: {last}")]
    Exhausted {
        stream: EventStream,
        passes: u32,
        last: ChainError,
    },
}

/// Result of one scan over `[from, head]`.
#[derive(Debug)]
enum ScanOutcome {
    /// Stream already covers the head.
    Current { head: BlockNumber },
    Scanned {
        head: BlockNumber,
        events: Vec<IndexedEvent>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamProgress {
    pub stream: EventStream,
    pub from_block: BlockNumber,
    /// New watermark, `None` when nothing was persisted.
    pub watermark: Option<BlockNumber>,
    pub events: usize,
}

#[derive(Debug)]
pub struct CycleReport {
    pub delegate: Result<StreamProgress, IndexError>,
    pub transfer: Result<StreamProgress, IndexError>,
}

impl CycleReport {
    pub fn is_ok(&self) -> bool {
        self.delegate.is_ok() && self.transfer.is_ok()
    }
}

pub struct EventIndexer {
    repo: Arc<Repository>,
    pool: Arc<EndpointPool>,
    chain_id: ChainId,
    genesis_block: BlockNumber,
    perp_proxy: Address,
    share_token: Address,
    config: IndexerConfig,
    cycle_lock: Mutex<()>,
}

impl EventIndexer {
    pub fn new(
        repo: Arc<Repository>,
        pool: Arc<EndpointPool>,
        chain_id: ChainId,
        genesis_block: BlockNumber,
        perp_proxy: Address,
        share_token: Address,
        config: IndexerConfig,
    ) -> Self {
        Self {
            repo,
            pool,
            chain_id,
            genesis_block,
            perp_proxy,
            share_token,
            config,
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Index both streams concurrently. Cycles never overlap.
    pub async fn run_cycle(&self) -> CycleReport {
        let _guard = self.cycle_lock.lock().await;
        info!("indexing cycle started");

        let (delegate, transfer) = tokio::join!(
            self.index_stream(EventStream::Delegate),
            self.index_stream(EventStream::Transfer)
        );

        for (stream, result) in [
            (EventStream::Delegate, &delegate),
            (EventStream::Transfer, &transfer),
        ] {
            match result {
                Ok(progress) => info!(
                    stream = %stream,
                    events = progress.events,
                    watermark = ?progress.watermark,
                    "stream indexed"
                ),
                Err(e) => error!(stream = %stream, error = %e, "stream indexing failed"),
            }
        }
        info!("indexing cycle completed");

        CycleReport { delegate, transfer }
    }

    /// Scan one stream from its watermark to the head and persist the result.
    pub async fn index_stream(&self, stream: EventStream) -> Result<StreamProgress, IndexError> {
        let from_block = self
            .repo
            .next_start_block(stream, self.chain_id, self.genesis_block)
            .await?;

        match self.scan(stream, from_block).await? {
            ScanOutcome::Current { head } => {
                debug!(stream = %stream, from_block, head, "stream already current");
                Ok(StreamProgress {
                    stream,
                    from_block,
                    watermark: None,
                    events: 0,
                })
            }
            ScanOutcome::Scanned { head, events } => {
                info!(stream = %stream, found = events.len(), "found events");
                let written = self
                    .repo
                    .insert_events(stream, self.chain_id, &self.share_token, &events, head)
                    .await?;
                Ok(StreamProgress {
                    stream,
                    from_block,
                    watermark: Some(head),
                    events: written,
                })
            }
        }
    }

    async fn scan(&self, stream: EventStream, from_block: BlockNumber) -> Result<ScanOutcome, IndexError> {
        let mut chunk = self.config.initial_chunk.max(1);
        let mut last = ChainError::Network("no scan attempted".to_string());
        let passes = self.config.max_passes.max(1);

        for pass in 1..=passes {
            if pass > 1 {
                info!(stream = %stream, chunk, pass, passes, "retrying scan with smaller window");
                tokio::time::sleep(self.config.pass_delay * (pass - 1)).await;
            }
            match self.scan_pass(stream, from_block, chunk).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    warn!(stream = %stream, chunk, pass, error = %e, "log scan failed");
                    last = e;
                    chunk = (chunk / 2).max(1);
                }
            }
        }

        Err(IndexError::Exhausted {
            stream,
            passes,
            last,
        })
    }

    fn target(&self, stream: EventStream) -> (H160, H256) {
        match stream {
            EventStream::Delegate => (self.perp_proxy.to_h160(), abi::set_delegate_topic()),
            EventStream::Transfer => (self.share_token.to_h160(), abi::transfer_topic()),
        }
    }

    /// One pass over `[from_block, head]` against a single endpoint.
    async fn scan_pass(
        &self,
        stream: EventStream,
        from_block: BlockNumber,
        chunk: u64,
    ) -> Result<ScanOutcome, ChainError> {
        let endpoint = self.pool.next_endpoint();
        let client = endpoint.client();
        self.pool.wait_for_token(&endpoint).await;
        let head = client.block_number().await?;
        if from_block > head {
            return Ok(ScanOutcome::Current { head });
        }

        let (address, topic0) = self.target(stream);
        let total = (head - from_block).max(1) as f64;
        let mut events = Vec::new();
        let mut start = from_block;
        let mut windows = 0u64;

        loop {
            let end = start.saturating_add(chunk);
            if windows % PROGRESS_EVERY == 0 {
                let done = 100.0 - 100.0 * (head - start) as f64 / total;
                info!(stream = %stream, url = endpoint.url(), "reading events: {:.0}%", done);
            }
            let query = LogQuery {
                address,
                topic0,
                from_block: start,
                to_block: if end >= head { None } else { Some(end) },
            };
            self.pool.wait_for_token(&endpoint).await;
            let logs = client.get_logs(&query).await?;
            decode_logs(stream, &logs, head, &mut events);

            if end >= head {
                break;
            }
            start = end + 1;
            windows += 1;
        }

        Ok(ScanOutcome::Scanned { head, events })
    }
}

/// Decode `logs`, dropping blocks past `head` (picked up next cycle) and
/// entries that do not match the event layout.
fn decode_logs(stream: EventStream, logs: &[ChainLog], head: BlockNumber, out: &mut Vec<IndexedEvent>) {
    for log in logs.iter().filter(|l| l.block_number <= head) {
        let decoded = match stream {
            EventStream::Delegate => abi::decode_set_delegate(log).map(IndexedEvent::Delegate),
            EventStream::Transfer => abi::decode_transfer(log).map(IndexedEvent::Transfer),
        };
        match decoded {
            Ok(event) => out.push(event),
            Err(e) => warn!(stream = %stream, block = log.block_number, error = %e, "skipping undecodable log"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = IndexerConfig::default();
        assert_eq!(config.initial_chunk, 32_768);
        assert_eq!(config.max_passes, 7);
        assert_eq!(config.interval, Duration::from_secs(120));
    }

    #[test]
    fn test_decode_logs_drops_blocks_past_head() {
        let transfer = |block| ChainLog {
            address: H160::zero(),
            block_number: block,
            topics: vec![
                abi::transfer_topic(),
                abi::address_topic(H160::zero()),
                abi::address_topic(H160::from_low_u64_be(5)),
            ],
            data: Vec::new(),
        };
        let malformed = ChainLog {
            topics: vec![abi::transfer_topic()],
            ..transfer(3)
        };
        let mut out = Vec::new();
        decode_logs(
            EventStream::Transfer,
            &[transfer(1), malformed, transfer(10), transfer(11)],
            10,
            &mut out,
        );
        let blocks: Vec<_> = out
            .iter()
            .map(|e| match e {
                IndexedEvent::Delegate(d) => d.block_number,
                IndexedEvent::Transfer(t) => t.block_number,
            })
            .collect();
        assert_eq!(blocks, vec![1, 10]);
    }
}
