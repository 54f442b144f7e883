//! Subscription access endpoint (never gated)

use axum::{
    extract::{Extension, State},
    Json,
};
use serde::Serialize;

use pediu_billing::AccessEvaluation;

use crate::{
    auth::AuthUser,
    error::{billing_redirect, ApiResult},
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct AccessResponse {
    #[serde(flatten)]
    pub evaluation: AccessEvaluation,
    /// Where the client should send the user when access is blocked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<&'static str>,
}

/// GET /api/v1/billing/access
pub async fn get_access(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<AccessResponse>> {
    let evaluation = state.billing.access.evaluate_access(user.tenant_id).await?;
    let redirect_to = (!evaluation.is_allowed()).then(|| billing_redirect(evaluation.reason));

    Ok(Json(AccessResponse {
        evaluation,
        redirect_to,
    }))
}
