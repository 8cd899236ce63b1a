use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, info};

use super::AppState;
use crate::domain::{Address, Balance, BlockNumber};
use crate::error::AppError;

pub const USAGE_MESSAGE: &str =
    "Wrong argument types. Usage:{ 'blockNumber': 195374242, 'addresses': ['0xaCFe...']}";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalancesRequest {
    pub block_number: BlockNumber,
    #[serde(default)]
    pub addresses: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BalancesResponse {
    #[serde(rename = "Result")]
    pub result: Vec<Balance>,
}

fn parse_addresses(raw: &[String]) -> Result<Vec<Address>, AppError> {
    raw.iter()
        .map(|a| {
            Address::from_str(a)
                .map_err(|_| AppError::BadRequest("malformated address in request".to_string()))
        })
        .collect()
}

async fn respond(
    state: &AppState,
    block: BlockNumber,
    addresses: &[Address],
) -> Result<Json<BalancesResponse>, AppError> {
    let result = state.engine.compute_balances(block, addresses).await?;
    info!(
        addresses = addresses.len(),
        block,
        reported = result.len(),
        "responding to balance request"
    );
    Ok(Json(BalancesResponse { result }))
}

/// `POST /balances` with `{"blockNumber": n, "addresses": [..]}`.
///
/// An empty address list reports every holder with a non-zero balance.
pub async fn post_balances(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<BalancesResponse>, AppError> {
    let request: BalancesRequest = serde_json::from_slice(&body).map_err(|err| {
        debug!(error = %err, "invalid balances request body");
        AppError::BadRequest(USAGE_MESSAGE.to_string())
    })?;
    let addresses = parse_addresses(&request.addresses)?;
    respond(&state, request.block_number, &addresses).await
}

/// `GET /get-balances?blockNumber=n&addresses=a&addresses=b`.
///
/// The block is capped at the latest indexed block, so this form never fails
/// with "not available".
pub async fn get_balances(
    Query(pairs): Query<Vec<(String, String)>>,
    State(state): State<AppState>,
) -> Result<Json<BalancesResponse>, AppError> {
    let mut requested_block = None;
    let mut raw_addresses = Vec::new();
    for (key, value) in pairs {
        match key.as_str() {
            "blockNumber" if !value.is_empty() => {
                let block = value
                    .parse::<BlockNumber>()
                    .map_err(|_| AppError::BadRequest("invalid block number".to_string()))?;
                requested_block = Some(block);
            }
            "addresses" => raw_addresses.push(value),
            _ => {}
        }
    }
    let addresses = parse_addresses(&raw_addresses)?;

    let latest = state.engine.latest_block().await?;
    let block = requested_block.map_or(latest, |b| b.min(latest));
    respond(&state, block, &addresses).await
}
