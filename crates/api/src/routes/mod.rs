//! HTTP routes

pub mod billing;
pub mod cron;
pub mod orders;


use axum::{
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::{
    auth::{require_auth, require_cron_secret, require_subscription_access},
    state::AppState,
};

pub fn create_router(state: AppState) -> Router {
    // Tenant-scoped routes that need an allowing subscription
    let gated = Router::new()
        .route("/api/v1/stores/{store_id}/orders", post(orders::commit_order))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_subscription_access,
        ));

    let authenticated = Router::new()
        .route("/api/v1/billing/access", get(billing::get_access))
        .merge(gated)
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let cron = Router::new()
        .route("/api/v1/cron/billing", post(cron::run_billing_sweep))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_cron_secret,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(authenticated)
        .merge(cron)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
