//! HTTP error mapping

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use pediu_billing::{AccessEvaluation, AccessReason, BillingError};
use pediu_checkout::CheckoutError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Seconds a client should wait before resending after a storage failure
const RETRY_AFTER_SECONDS: &str = "1";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request body: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error("Subscription does not allow access")]
    AccessBlocked(AccessEvaluation),
}

/// Page the client is sent to for a blocked tenant
pub fn billing_redirect(reason: Option<AccessReason>) -> &'static str {
    match reason {
        Some(AccessReason::TrialExpired) => "/billing/trial-expired",
        Some(AccessReason::GraceExpired) | Some(AccessReason::PaymentPending) => {
            "/billing/overdue"
        }
        Some(AccessReason::Suspended) => "/billing/suspended",
        Some(AccessReason::Cancelled) => "/billing/cancelled",
        Some(AccessReason::NoSubscription) | None => "/billing/subscribe",
    }
}

fn checkout_response(err: &CheckoutError) -> Response {
    let status = match err {
        CheckoutError::Validation(_) | CheckoutError::Coupon(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CheckoutError::Conflict => StatusCode::CONFLICT,
        CheckoutError::StoreNotFound => StatusCode::NOT_FOUND,
        CheckoutError::StoreForbidden => StatusCode::FORBIDDEN,
        CheckoutError::TransientStore(_) => StatusCode::SERVICE_UNAVAILABLE,
        CheckoutError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let mut body = json!({
        "error": err.code(),
        "retryable": err.is_retryable(),
    });

    match err {
        CheckoutError::Coupon(rejection) => {
            body["reason"] = json!(rejection.reason());
            body["message"] = json!(rejection.to_string());
        }
        CheckoutError::TransientStore(detail) => {
            tracing::error!(error = %detail, "Checkout storage failure");
            body["message"] = json!("Temporarily unavailable, resend the same request");
        }
        CheckoutError::Config(detail) => {
            tracing::error!(error = %detail, "Checkout configuration error");
            body["message"] = json!("Internal error");
        }
        other => {
            body["message"] = json!(other.to_string());
        }
    }

    let mut response = (status, Json(body)).into_response();
    if err.is_retryable() {
        response.headers_mut().insert(
            header::RETRY_AFTER,
            HeaderValue::from_static(RETRY_AFTER_SECONDS),
        );
    }
    response
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": "invalid_body", "message": message })),
            )
                .into_response(),
            ApiError::Checkout(err) => checkout_response(&err),
            ApiError::Billing(err) => {
                tracing::error!(error = %err, "Billing storage failure");
                let mut response = (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({
                        "error": "billing_unavailable",
                        "message": "Subscription status could not be checked",
                        "retryable": true,
                    })),
                )
                    .into_response();
                response.headers_mut().insert(
                    header::RETRY_AFTER,
                    HeaderValue::from_static(RETRY_AFTER_SECONDS),
                );
                response
            }
            ApiError::AccessBlocked(evaluation) => (
                StatusCode::PAYMENT_REQUIRED,
                Json(json!({
                    "error": "payment_required",
                    "reason": evaluation.reason.map(|r| r.as_str()),
                    "redirect_to": billing_redirect(evaluation.reason),
                })),
            )
                .into_response(),
        }
    }
}
