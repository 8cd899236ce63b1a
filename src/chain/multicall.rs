//! Call aggregation through Multicall3 `aggregate3`.
//!
//! Every call is submitted with `allowFailure = true`, so one reverting call
//! shows up as a failed [`CallOutcome`] instead of aborting the round trip.

use super::abi;
use super::{ChainClient, ChainError};
use ethers_core::abi::Token;
use ethers_core::types::H160;

/// Canonical Multicall3 deployment address (same on all major chains).
pub const DEFAULT_MULTICALL_ADDRESS: &str = "0xcA11bde05977b3631167028862bE2a173976CA11";

/// Upper bound on calls per aggregated round trip.
pub const MAX_CALLS_PER_BATCH: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub target: H160,
    pub data: Vec<u8>,
}

impl Call {
    pub fn new(target: H160, data: Vec<u8>) -> Self {
        Self { target, data }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Success(Vec<u8>),
    Reverted(Vec<u8>),
}

impl CallOutcome {
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            CallOutcome::Success(data) => Some(data),
            CallOutcome::Reverted(_) => None,
        }
    }
}

/// Issue `calls` as one aggregated `eth_call` and return per-call outcomes in
/// submission order.
pub async fn aggregate(
    client: &dyn ChainClient,
    multicall: H160,
    calls: &[Call],
    block: Option<u64>,
) -> Result<Vec<CallOutcome>, ChainError> {
    if calls.is_empty() {
        return Ok(Vec::new());
    }
    let request: Vec<(H160, Vec<u8>)> = calls
        .iter()
        .map(|c| (c.target, c.data.clone()))
        .collect();
    let response = client
        .call(multicall, abi::aggregate3(&request), block)
        .await?;
    let outcomes = decode_results(&response)?;
    if outcomes.len() != calls.len() {
        return Err(ChainError::Decode(format!(
            "multicall returned {} results for {} calls",
            outcomes.len(),
            calls.len()
        )));
    }
    Ok(outcomes)
}

pub fn decode_results(data: &[u8]) -> Result<Vec<CallOutcome>, ChainError> {
    let tokens = ethers_core::abi::decode(&abi::aggregate3_result_types(), data)
        .map_err(|e| ChainError::Decode(e.to_string()))?;
    let Some(Token::Array(entries)) = tokens.into_iter().next() else {
        return Err(ChainError::Decode("aggregate3 result is not an array".to_string()));
    };
    entries
        .into_iter()
        .map(|entry| match entry {
            Token::Tuple(fields) => match fields.as_slice() {
                [Token::Bool(true), Token::Bytes(data)] => Ok(CallOutcome::Success(data.clone())),
                [Token::Bool(false), Token::Bytes(data)] => {
                    Ok(CallOutcome::Reverted(data.clone()))
                }
                other => Err(ChainError::Decode(format!(
                    "unexpected aggregate3 entry {:?}",
                    other
                ))),
            },
            other => Err(ChainError::Decode(format!(
                "unexpected aggregate3 entry {:?}",
                other
            ))),
        })
        .collect()
}

/// Decode an `aggregate3` request into `(target, calldata)` pairs.
pub fn decode_request(data: &[u8]) -> Result<Vec<(H160, Vec<u8>)>, ChainError> {
    let (_, args) = abi::decode_call(&abi::aggregate3_param_types(), data)?;
    let Some(Token::Array(entries)) = args.into_iter().next() else {
        return Err(ChainError::Decode("aggregate3 request is not an array".to_string()));
    };
    entries
        .into_iter()
        .map(|entry| match entry {
            Token::Tuple(fields) => match fields.as_slice() {
                [Token::Address(target), Token::Bool(_), Token::Bytes(data)] => {
                    Ok((*target, data.clone()))
                }
                other => Err(ChainError::Decode(format!("unexpected call {:?}", other))),
            },
            other => Err(ChainError::Decode(format!("unexpected call {:?}", other))),
        })
        .collect()
}

pub fn encode_results(outcomes: &[CallOutcome]) -> Vec<u8> {
    let entries = outcomes
        .iter()
        .map(|o| match o {
            CallOutcome::Success(data) => {
                Token::Tuple(vec![Token::Bool(true), Token::Bytes(data.clone())])
            }
            CallOutcome::Reverted(data) => {
                Token::Tuple(vec![Token::Bool(false), Token::Bytes(data.clone())])
            }
        })
        .collect();
    ethers_core::abi::encode(&[Token::Array(entries)])
}
