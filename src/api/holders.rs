use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::AppState;
use crate::domain::Decimal;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolderContractsQuery {
    pub block_number: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HolderContractsResponse {
    pub holder_contracts: Vec<String>,
    pub balance: Vec<Decimal>,
    pub status: String,
}

/// Contracts that custody pool tokens on behalf of share holders, with their
/// pool-token balance. A failed balance read still answers, flagged in
/// `status`.
pub async fn get_holder_contracts(
    Query(params): Query<HolderContractsQuery>,
    State(state): State<AppState>,
) -> Result<Json<HolderContractsResponse>, AppError> {
    let block = match params.block_number.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            raw.parse::<u64>()
                .map_err(|_| AppError::BadRequest("invalid block number".to_string()))?,
        ),
    };

    let holder_contracts = vec![state.engine.contracts().perp_proxy.to_checksum()];
    let response = match state.engine.holder_contract_balances(block).await {
        Ok(balance) => HolderContractsResponse {
            holder_contracts,
            balance,
            status: "ok".to_string(),
        },
        Err(err) => {
            error!(error = %err, "holder contract balance unavailable");
            HolderContractsResponse {
                holder_contracts,
                balance: Vec::new(),
                status: "balance unavailable".to_string(),
            }
        }
    };
    info!(?block, status = %response.status, "holder contracts request answered");
    Ok(Json(response))
}
