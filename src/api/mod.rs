pub mod balances;
pub mod health;
pub mod holders;

use crate::engine::BalanceEngine;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<BalanceEngine>,
}

impl AppState {
    pub fn new(engine: Arc<BalanceEngine>) -> Self {
        Self { engine }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/holder-contracts", get(holders::get_holder_contracts))
        .route("/get-balances", get(balances::get_balances))
        .route("/balances", post(balances::post_balances))
        .layer(cors)
        .with_state(state)
}
