//! Unit tests for authentication middleware helpers
//!
//! Tests cover:
//! - Bearer token extraction
//! - Billing endpoint exemption
//! - Advisory billing headers
//! - Error responses

#[cfg(test)]
mod tests {
    use axum::{
        http::{header::AUTHORIZATION, HeaderMap, HeaderValue, StatusCode},
        response::IntoResponse,
    };
    use time::{Duration, OffsetDateTime};

    use super::super::middleware::*;
    use pediu_billing::{evaluate, AccessReason, SubscriptionRecord};
    use pediu_shared::SubscriptionStatus;

    fn with_authorization(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(
            extract_bearer_token(&with_authorization("Bearer abc.def.ghi")),
            Some("abc.def.ghi")
        );
        assert_eq!(extract_bearer_token(&with_authorization("Bearer ")), None);
        assert_eq!(extract_bearer_token(&with_authorization("Basic dXNlcg==")), None);
        assert_eq!(extract_bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_billing_endpoints_exempt() {
        assert!(is_billing_endpoint("/api/v1/billing/access"));
        assert!(!is_billing_endpoint("/api/v1/stores/1/orders"));
        assert!(!is_billing_endpoint("/api/v1/cron/billing"));
    }

    #[test]
    fn test_warning_headers() {
        let now = OffsetDateTime::now_utc();
        let record = SubscriptionRecord {
            tenant_id: uuid::Uuid::new_v4(),
            status: SubscriptionStatus::PastDue,
            trial_ends_at: None,
            grace_period_ends_at: Some(now + Duration::hours(30)),
            current_period_end: None,
            suspended_at: None,
            suspension_reason: None,
        };
        let evaluation = evaluate(Some(&record), now);
        assert_eq!(evaluation.reason, Some(AccessReason::PaymentPending));

        let mut headers = HeaderMap::new();
        apply_billing_headers(&mut headers, &evaluation);

        assert_eq!(headers.get(HEADER_BILLING_MODE).unwrap(), "warning");
        assert_eq!(headers.get(HEADER_BILLING_REASON).unwrap(), "payment_pending");
        assert_eq!(headers.get(HEADER_GRACE_DAYS_REMAINING).unwrap(), "2");
    }

    #[test]
    fn test_auth_error_statuses() {
        assert_eq!(
            AuthError::MissingAuth.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::InvalidToken.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::InvalidCronSecret.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::CronDisabled.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
