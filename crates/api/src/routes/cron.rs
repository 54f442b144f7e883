//! Scheduler-triggered jobs

use axum::{extract::State, Json};

use pediu_billing::SweepReport;

use crate::state::AppState;

/// POST /api/v1/cron/billing
///
/// Runs the lifecycle sweep once. Safe to call repeatedly on the same day.
pub async fn run_billing_sweep(State(state): State<AppState>) -> Json<SweepReport> {
    tracing::info!("Billing sweep triggered via cron endpoint");
    Json(state.billing.lifecycle.run().await)
}
