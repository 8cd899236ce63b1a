//! JSON-RPC chain client over HTTP.

use super::{ChainClient, ChainError, ChainLog, LogQuery};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use ethers_core::types::{H160, H256};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Chain client speaking Ethereum JSON-RPC to a single endpoint URL.
#[derive(Debug, Clone)]
pub struct JsonRpcClient {
    client: Client,
    url: String,
}

impl JsonRpcClient {
    pub fn new(url: String) -> Self {
        Self {
            client: Client::new(),
            url,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        // Transport hiccups only; endpoint rotation happens one level up.
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(10)),
            ..Default::default()
        };

        let body = retry(backoff, || async {
            let response = self
                .client
                .post(&self.url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(ChainError::Network(e.to_string())))?;

            let status = response.status();
            if status == 429 {
                return Err(backoff::Error::transient(ChainError::RateLimited));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(ChainError::Http {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(ChainError::Http {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            response
                .json::<Value>()
                .await
                .map_err(|e| backoff::Error::permanent(ChainError::Decode(e.to_string())))
        })
        .await?;

        if let Some(err) = body.get("error") {
            return Err(ChainError::Rpc {
                code: err.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
        body.get("result")
            .cloned()
            .ok_or_else(|| ChainError::Decode(format!("{} response without result", method)))
    }
}

#[async_trait]
impl ChainClient for JsonRpcClient {
    async fn block_number(&self) -> Result<u64, ChainError> {
        let result = self.request("eth_blockNumber", json!([])).await?;
        parse_quantity(&result)
    }

    async fn call(
        &self,
        to: H160,
        data: Vec<u8>,
        block: Option<u64>,
    ) -> Result<Vec<u8>, ChainError> {
        let tx = json!({
            "to": format!("{:?}", to),
            "data": format!("0x{}", hex::encode(&data)),
        });
        let result = self
            .request("eth_call", json!([tx, block_tag(block)]))
            .await?;
        let output = parse_bytes(&result)?;
        if output.is_empty() {
            let code = self
                .request("eth_getCode", json!([format!("{:?}", to), block_tag(block)]))
                .await?;
            if parse_bytes(&code)?.is_empty() {
                return Err(ChainError::NoCode);
            }
        }
        Ok(output)
    }

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<ChainLog>, ChainError> {
        debug!(
            from_block = query.from_block,
            to_block = ?query.to_block,
            url = %self.url,
            "eth_getLogs"
        );
        let to_block = match query.to_block {
            Some(b) => json!(format!("0x{:x}", b)),
            None => json!("latest"),
        };
        let filter = json!({
            "address": format!("{:?}", query.address),
            "topics": [format!("{:?}", query.topic0)],
            "fromBlock": format!("0x{:x}", query.from_block),
            "toBlock": to_block,
        });
        let result = self.request("eth_getLogs", json!([filter])).await?;
        let entries = result
            .as_array()
            .ok_or_else(|| ChainError::Decode("Expected array response".to_string()))?;
        entries.iter().map(parse_log).collect()
    }
}

fn block_tag(block: Option<u64>) -> Value {
    match block {
        Some(b) => json!(format!("0x{:x}", b)),
        None => json!("latest"),
    }
}

fn parse_quantity(value: &Value) -> Result<u64, ChainError> {
    let s = value
        .as_str()
        .ok_or_else(|| ChainError::Decode(format!("expected hex quantity, got {}", value)))?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| ChainError::Decode(format!("invalid quantity {}: {}", s, e)))
}

fn parse_bytes(value: &Value) -> Result<Vec<u8>, ChainError> {
    let s = value
        .as_str()
        .ok_or_else(|| ChainError::Decode(format!("expected hex data, got {}", value)))?;
    hex::decode(s.trim_start_matches("0x"))
        .map_err(|e| ChainError::Decode(format!("invalid hex data: {}", e)))
}

fn parse_h256(value: &Value) -> Result<H256, ChainError> {
    let bytes = parse_bytes(value)?;
    if bytes.len() != 32 {
        return Err(ChainError::Decode(format!(
            "expected 32-byte topic, got {} bytes",
            bytes.len()
        )));
    }
    Ok(H256::from_slice(&bytes))
}

fn parse_log(value: &Value) -> Result<ChainLog, ChainError> {
    let address = parse_bytes(
        value
            .get("address")
            .ok_or_else(|| ChainError::Decode("Missing address field".to_string()))?,
    )?;
    if address.len() != 20 {
        return Err(ChainError::Decode("log address is not 20 bytes".to_string()));
    }
    let block_number = parse_quantity(
        value
            .get("blockNumber")
            .ok_or_else(|| ChainError::Decode("Missing blockNumber field".to_string()))?,
    )?;
    let topics = value
        .get("topics")
        .and_then(Value::as_array)
        .ok_or_else(|| ChainError::Decode("Missing topics field".to_string()))?
        .iter()
        .map(parse_h256)
        .collect::<Result<Vec<_>, _>>()?;
    let data = match value.get("data") {
        Some(d) => parse_bytes(d)?,
        None => Vec::new(),
    };
    Ok(ChainLog {
        address: H160::from_slice(&address),
        block_number,
        topics,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity(&json!("0x1b4")).unwrap(), 436);
        assert!(parse_quantity(&json!(12)).is_err());
    }

    #[test]
    fn test_block_tag() {
        assert_eq!(block_tag(Some(255)), json!("0xff"));
        assert_eq!(block_tag(None), json!("latest"));
    }

    #[test]
    fn test_parse_log_valid() {
        let log = json!({
            "address": "0x00000000000000000000000000000000000000aa",
            "blockNumber": "0x10",
            "topics": [
                "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef",
                "0x0000000000000000000000000000000000000000000000000000000000000001",
                "0x0000000000000000000000000000000000000000000000000000000000000002"
            ],
            "data": "0x0000000000000000000000000000000000000000000000000000000000000005"
        });
        let parsed = parse_log(&log).unwrap();
        assert_eq!(parsed.block_number, 16);
        assert_eq!(parsed.topics.len(), 3);
        assert_eq!(parsed.data.len(), 32);
        assert_eq!(parsed.address, H160::from_low_u64_be(0xaa));
    }

    #[test]
    fn test_parse_log_missing_block() {
        let log = json!({
            "address": "0x00000000000000000000000000000000000000aa",
            "topics": [],
            "data": "0x"
        });
        assert!(matches!(parse_log(&log), Err(ChainError::Decode(_))));
    }
}
