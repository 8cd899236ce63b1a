//! Flipside bulk-query client used as an alternative holder source.

use super::{HolderSource, HolderSourceError};
use crate::domain::{Address, BlockNumber};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_API_URL: &str = "https://api-v2.flipsidecrypto.xyz/json-rpc";
pub const DEFAULT_TRANSFERS_TABLE: &str = "arbitrum.core.ez_token_transfers";
const PAGE_SIZE: u64 = 5000;
/// Status polls before a pending run is abandoned.
const MAX_STATE_POLLS: u32 = 600;

/// States in which a query run is still in progress.
const PENDING_STATES: [&str; 3] = [
    "QUERY_STATE_READY",
    "QUERY_STATE_RUNNING",
    "QUERY_STATE_STREAMING_RESULTS",
];
const SUCCESS_STATE: &str = "QUERY_STATE_SUCCESS";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultPage {
    #[serde(default)]
    rows: Vec<Vec<Value>>,
    page: Option<PageStats>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageStats {
    total_pages: u64,
}

/// Holder source querying Flipside's indexed token-transfer tables.
#[derive(Debug, Clone)]
pub struct FlipsideHolderSource {
    client: Client,
    api_url: String,
    api_key: String,
    share_token: Address,
    genesis_block: BlockNumber,
    table: String,
    poll_interval: Duration,
    max_polls: u32,
}

impl FlipsideHolderSource {
    pub fn new(api_key: String, share_token: Address, genesis_block: BlockNumber) -> Self {
        Self {
            client: Client::new(),
            api_url: DEFAULT_API_URL.to_string(),
            api_key,
            share_token,
            genesis_block,
            table: DEFAULT_TRANSFERS_TABLE.to_string(),
            poll_interval: Duration::from_secs(1),
            max_polls: MAX_STATE_POLLS,
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    fn receivers_sql(&self, to_block: BlockNumber) -> String {
        format!(
            "SELECT DISTINCT(to_address) FROM {} WHERE lower(contract_address)='{}' \
             AND block_number>={} AND block_number<={}",
            self.table,
            self.share_token.as_str(),
            self.genesis_block,
            to_block
        )
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, HolderSourceError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": [params],
            "id": 1,
        });
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        let body = retry(backoff, || async {
            let response = self
                .client
                .post(&self.api_url)
                .header("x-api-key", &self.api_key)
                .json(&payload)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(HolderSourceError::Network(e.to_string())))?;

            let status = response.status();
            if status == 429 {
                return Err(backoff::Error::transient(HolderSourceError::RateLimited));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(HolderSourceError::Http {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(HolderSourceError::Http {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            response
                .json::<Value>()
                .await
                .map_err(|e| backoff::Error::permanent(HolderSourceError::Parse(e.to_string())))
        })
        .await?;

        if let Some(err) = body.get("error").filter(|e| !e.is_null()) {
            return Err(HolderSourceError::QueryFailed(err.to_string()));
        }
        body.get("result")
            .cloned()
            .ok_or_else(|| HolderSourceError::Parse(format!("{} response without result", method)))
    }

    async fn create_query_run(&self, sql: &str) -> Result<String, HolderSourceError> {
        let result = self
            .rpc(
                "createQueryRun",
                json!({
                    "resultTTLHours": 1,
                    "maxAgeMinutes": 0,
                    "sql": sql,
                    "tags": {"source": "shareledger"},
                    "dataSource": "snowflake-default",
                    "dataProvider": "flipside",
                }),
            )
            .await?;
        result
            .pointer("/queryRequest/queryRunId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| HolderSourceError::Parse("missing queryRunId".to_string()))
    }

    async fn query_state(&self, run_id: &str) -> Result<String, HolderSourceError> {
        let result = self
            .rpc("getQueryRun", json!({ "queryRunId": run_id }))
            .await?;
        result
            .pointer("/queryRun/state")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| HolderSourceError::Parse("missing queryRun state".to_string()))
    }

    async fn result_page(&self, run_id: &str, page: u64) -> Result<ResultPage, HolderSourceError> {
        let result = self
            .rpc(
                "getQueryRunResults",
                json!({
                    "queryRunId": run_id,
                    "format": "json",
                    "page": {"number": page, "size": PAGE_SIZE},
                }),
            )
            .await?;
        serde_json::from_value(result).map_err(|e| HolderSourceError::Parse(e.to_string()))
    }
}

/// Poll `state` until it leaves the pending states, giving up after
/// `max_polls` attempts.
async fn wait_for_run<F, Fut>(
    run_id: &str,
    mut state: F,
    interval: Duration,
    max_polls: u32,
) -> Result<String, HolderSourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, HolderSourceError>>,
{
    for attempt in 1..=max_polls {
        let current = state().await?;
        if !PENDING_STATES.contains(&current.as_str()) {
            return Ok(current);
        }
        debug!(run_id = %run_id, state = %current, attempt, "flipside query pending");
        if attempt < max_polls {
            tokio::time::sleep(interval).await;
        }
    }
    warn!(run_id = %run_id, polls = max_polls, "flipside query still pending, giving up");
    Err(HolderSourceError::QueryFailed(format!(
        "run {} still pending after {} polls",
        run_id, max_polls
    )))
}

/// Collect lowercase addresses from result rows, skipping malformed cells.
fn addresses_from_rows(rows: &[Vec<Value>], out: &mut BTreeSet<Address>) {
    for row in rows {
        match row.first().and_then(Value::as_str).map(Address::from_str) {
            Some(Ok(addr)) => {
                out.insert(addr);
            }
            _ => warn!(row = ?row, "skipping malformed holder row"),
        }
    }
}

#[async_trait]
impl HolderSource for FlipsideHolderSource {
    async fn holders_up_to(&self, block: BlockNumber) -> Result<Vec<Address>, HolderSourceError> {
        info!(from = self.genesis_block, to = block, "flipside holder query");
        let run_id = self.create_query_run(&self.receivers_sql(block)).await?;

        let state = wait_for_run(
            &run_id,
            || self.query_state(&run_id),
            self.poll_interval,
            self.max_polls,
        )
        .await?;
        if state != SUCCESS_STATE {
            return Err(HolderSourceError::QueryFailed(state));
        }

        let mut holders = BTreeSet::new();
        let mut page_number = 1;
        loop {
            let page = self.result_page(&run_id, page_number).await?;
            addresses_from_rows(&page.rows, &mut holders);
            let total_pages = page.page.map_or(1, |p| p.total_pages);
            if page_number >= total_pages {
                break;
            }
            page_number += 1;
        }
        Ok(holders.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receivers_sql_bounds() {
        let token = Address::from_str("0xAbC0000000000000000000000000000000000001").unwrap();
        let source = FlipsideHolderSource::new("key".to_string(), token, 100);
        let sql = source.receivers_sql(250);
        assert!(sql.contains("lower(contract_address)='0xabc0000000000000000000000000000000000001'"));
        assert!(sql.contains("block_number>=100 AND block_number<=250"));
        assert!(sql.contains(DEFAULT_TRANSFERS_TABLE));
    }

    #[test]
    fn test_result_rows_parsed_and_deduplicated() {
        let page: ResultPage = serde_json::from_value(json!({
            "columnNames": ["to_address"],
            "rows": [
                ["0x00000000000000000000000000000000000000AA"],
                ["0x00000000000000000000000000000000000000aa"],
                ["not-an-address"],
                ["0x00000000000000000000000000000000000000bb"]
            ],
            "page": {"currentPageNumber": 1, "totalPages": 1}
        }))
        .unwrap();
        let mut holders = BTreeSet::new();
        addresses_from_rows(&page.rows, &mut holders);
        let holders: Vec<String> = holders.iter().map(|a| a.as_str().to_string()).collect();
        assert_eq!(
            holders,
            vec![
                "0x00000000000000000000000000000000000000aa",
                "0x00000000000000000000000000000000000000bb"
            ]
        );
    }

    #[tokio::test]
    async fn test_wait_for_run_returns_first_settled_state() {
        let mut states = vec!["QUERY_STATE_SUCCESS", "QUERY_STATE_RUNNING", "QUERY_STATE_READY"];
        let state = wait_for_run(
            "run-1",
            || {
                let next = states.pop().map(str::to_string);
                async move { next.ok_or_else(|| HolderSourceError::Parse("drained".to_string())) }
            },
            Duration::ZERO,
            5,
        )
        .await
        .unwrap();
        assert_eq!(state, SUCCESS_STATE);
    }

    #[tokio::test]
    async fn test_wait_for_run_gives_up_after_max_polls() {
        let mut polls = 0u32;
        let err = wait_for_run(
            "run-2",
            || {
                polls += 1;
                async { Ok("QUERY_STATE_RUNNING".to_string()) }
            },
            Duration::ZERO,
            4,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HolderSourceError::QueryFailed(ref m) if m.contains("run-2")));
        assert_eq!(polls, 4);
    }
}
