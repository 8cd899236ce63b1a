use crate::api::AppState;
use crate::error::AppError;
use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

pub async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// Ready once both event streams have been indexed past genesis; reports the
/// newest block balances can be served for.
pub async fn ready(State(state): State<AppState>) -> Result<(StatusCode, Json<Value>), AppError> {
    let latest = state.engine.latest_block().await?;
    if latest == 0 {
        return Ok((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "indexing", "latestBlock": latest})),
        ));
    }
    Ok((
        StatusCode::OK,
        Json(json!({"status": "ready", "latestBlock": latest})),
    ))
}
