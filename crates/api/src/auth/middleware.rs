//! Authentication and subscription gating middleware for Axum

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use pediu_billing::{AccessDecision, AccessEvaluation};
use pediu_checkout::Caller;

use crate::{error::ApiError, state::AppState};

pub const HEADER_BILLING_MODE: &str = "x-billing-mode";
pub const HEADER_BILLING_REASON: &str = "x-billing-reason";
pub const HEADER_GRACE_DAYS_REMAINING: &str = "x-grace-days-remaining";

/// Identity extracted from a verified JWT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
}

impl AuthUser {
    pub fn caller(&self) -> Caller {
        Caller {
            user_id: self.user_id,
            tenant_id: self.tenant_id,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Invalid cron secret")]
    InvalidCronSecret,
    #[error("Cron endpoint disabled")]
    CronDisabled,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingAuth => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid or expired token"),
            AuthError::InvalidCronSecret => (StatusCode::UNAUTHORIZED, "Invalid cron secret"),
            AuthError::CronDisabled => (StatusCode::SERVICE_UNAVAILABLE, "Cron endpoint disabled"),
        };

        let body = Json(json!({
            "error": message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}

/// Bearer token from the Authorization header
pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Billing endpoints stay reachable for blocked tenants so they can pay
pub(crate) fn is_billing_endpoint(path: &str) -> bool {
    path.starts_with("/api/v1/billing")
}

pub(crate) fn secrets_match(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Advisory headers for a tenant that is allowed with a warning
pub(crate) fn apply_billing_headers(headers: &mut HeaderMap, evaluation: &AccessEvaluation) {
    headers.insert(HEADER_BILLING_MODE, HeaderValue::from_static("warning"));
    if let Some(reason) = evaluation.reason {
        headers.insert(HEADER_BILLING_REASON, HeaderValue::from_static(reason.as_str()));
    }
    if let Some(days) = evaluation.grace_days_remaining {
        headers.insert(HEADER_GRACE_DAYS_REMAINING, HeaderValue::from(days));
    }
}

/// Middleware that requires a valid JWT
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = extract_bearer_token(request.headers()) else {
        tracing::debug!(path = %request.uri().path(), "require_auth: no bearer token");
        return AuthError::MissingAuth.into_response();
    };

    match state.jwt_manager.validate_access_token(token) {
        Ok(claims) => {
            let user = AuthUser {
                user_id: claims.sub,
                tenant_id: claims.tenant_id,
            };
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => {
            tracing::warn!(path = %request.uri().path(), error = %e, "require_auth: token rejected");
            AuthError::InvalidToken.into_response()
        }
    }
}

/// Middleware that gates a tenant-scoped route on subscription access.
/// Must run after [`require_auth`].
pub async fn require_subscription_access(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(user) = request.extensions().get::<AuthUser>().copied() else {
        return AuthError::MissingAuth.into_response();
    };

    if is_billing_endpoint(request.uri().path()) {
        return next.run(request).await;
    }

    let evaluation = match state.billing.access.evaluate_access(user.tenant_id).await {
        Ok(evaluation) => evaluation,
        Err(e) => return ApiError::from(e).into_response(),
    };

    match evaluation.decision {
        AccessDecision::Active => next.run(request).await,
        AccessDecision::ActiveWithWarning => {
            let mut response = next.run(request).await;
            apply_billing_headers(response.headers_mut(), &evaluation);
            response
        }
        AccessDecision::Blocked => {
            tracing::info!(
                tenant_id = %user.tenant_id,
                reason = evaluation.reason.map(|r| r.as_str()),
                "Request blocked by subscription status"
            );
            ApiError::AccessBlocked(evaluation).into_response()
        }
    }
}

/// Middleware for scheduler-triggered endpoints: `Authorization: Bearer <CRON_SECRET>`
pub async fn require_cron_secret(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.cron_secret.as_deref() else {
        tracing::warn!("Cron request refused, CRON_SECRET is not configured");
        return AuthError::CronDisabled.into_response();
    };

    let provided = extract_bearer_token(request.headers()).unwrap_or_default();
    if !secrets_match(provided, expected) {
        tracing::warn!(path = %request.uri().path(), "Cron request with invalid secret");
        return AuthError::InvalidCronSecret.into_response();
    }

    next.run(request).await
}
