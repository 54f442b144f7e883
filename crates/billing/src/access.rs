//! Subscription access evaluation
//!
//! A pure decision over a tenant's subscription and the current time. It
//! never writes, and it reads the wall clock itself, so an expired trial is
//! blocked immediately even if the lifecycle sweep has not run yet.
//!
//! | status    | condition              | decision                              |
//! |-----------|------------------------|---------------------------------------|
//! | trialing  | now < trial end        | ACTIVE                                |
//! | trialing  | now >= trial end       | BLOCKED (trial_expired)               |
//! | active    |                        | ACTIVE                                |
//! | past_due  | now < grace end        | ACTIVE_WITH_WARNING (payment_pending) |
//! | past_due  | now >= grace end       | BLOCKED (grace_expired)               |
//! | suspended |                        | BLOCKED (suspended)                   |
//! | cancelled |                        | BLOCKED (cancelled)                   |
//! | none      |                        | BLOCKED (no_subscription)             |

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use pediu_shared::SubscriptionStatus;

use crate::error::BillingResult;
use crate::store::BillingStore;

const SECONDS_PER_DAY: i64 = 86_400;

/// A tenant's subscription as stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRecord {
    pub tenant_id: Uuid,
    pub status: SubscriptionStatus,
    pub trial_ends_at: Option<OffsetDateTime>,
    pub grace_period_ends_at: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub suspended_at: Option<OffsetDateTime>,
    pub suspension_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessDecision {
    Active,
    ActiveWithWarning,
    Blocked,
}

impl AccessDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessDecision::Active => "ACTIVE",
            AccessDecision::ActiveWithWarning => "ACTIVE_WITH_WARNING",
            AccessDecision::Blocked => "BLOCKED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessReason {
    TrialExpired,
    PaymentPending,
    GraceExpired,
    Suspended,
    Cancelled,
    NoSubscription,
}

impl AccessReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessReason::TrialExpired => "trial_expired",
            AccessReason::PaymentPending => "payment_pending",
            AccessReason::GraceExpired => "grace_expired",
            AccessReason::Suspended => "suspended",
            AccessReason::Cancelled => "cancelled",
            AccessReason::NoSubscription => "no_subscription",
        }
    }
}

/// Result of evaluating a tenant's access
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessEvaluation {
    pub decision: AccessDecision,
    pub reason: Option<AccessReason>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub grace_ends_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub trial_ends_at: Option<OffsetDateTime>,
    /// Whole days left in the grace period, rounded up
    pub grace_days_remaining: Option<i64>,
}

impl AccessEvaluation {
    fn new(decision: AccessDecision, reason: Option<AccessReason>) -> Self {
        Self {
            decision,
            reason,
            grace_ends_at: None,
            trial_ends_at: None,
            grace_days_remaining: None,
        }
    }

    fn blocked(reason: AccessReason) -> Self {
        Self::new(AccessDecision::Blocked, Some(reason))
    }

    pub fn is_allowed(&self) -> bool {
        self.decision != AccessDecision::Blocked
    }
}

/// Days from `now` until `until`, rounded up; zero once passed
pub fn days_remaining(until: OffsetDateTime, now: OffsetDateTime) -> i64 {
    let seconds = (until - now).whole_seconds();
    if seconds <= 0 {
        0
    } else {
        (seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY
    }
}

/// Decide access for `subscription` at `now`
pub fn evaluate(subscription: Option<&SubscriptionRecord>, now: OffsetDateTime) -> AccessEvaluation {
    let Some(sub) = subscription else {
        return AccessEvaluation::blocked(AccessReason::NoSubscription);
    };

    match sub.status {
        SubscriptionStatus::Trialing => match sub.trial_ends_at {
            Some(end) if now < end => AccessEvaluation {
                trial_ends_at: Some(end),
                ..AccessEvaluation::new(AccessDecision::Active, None)
            },
            end => AccessEvaluation {
                trial_ends_at: end,
                ..AccessEvaluation::blocked(AccessReason::TrialExpired)
            },
        },
        SubscriptionStatus::Active => AccessEvaluation::new(AccessDecision::Active, None),
        SubscriptionStatus::PastDue => match sub.grace_period_ends_at {
            Some(end) if now < end => AccessEvaluation {
                grace_ends_at: Some(end),
                grace_days_remaining: Some(days_remaining(end, now)),
                ..AccessEvaluation::new(
                    AccessDecision::ActiveWithWarning,
                    Some(AccessReason::PaymentPending),
                )
            },
            end => AccessEvaluation {
                grace_ends_at: end,
                grace_days_remaining: end.map(|_| 0),
                ..AccessEvaluation::blocked(AccessReason::GraceExpired)
            },
        },
        SubscriptionStatus::Suspended => AccessEvaluation::blocked(AccessReason::Suspended),
        SubscriptionStatus::Cancelled => AccessEvaluation::blocked(AccessReason::Cancelled),
    }
}

/// Reads a tenant's subscription and evaluates it
#[derive(Clone)]
pub struct AccessEvaluator {
    store: Arc<dyn BillingStore>,
}

impl AccessEvaluator {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    pub async fn evaluate_access(&self, tenant_id: Uuid) -> BillingResult<AccessEvaluation> {
        self.evaluate_access_at(tenant_id, OffsetDateTime::now_utc())
            .await
    }

    pub async fn evaluate_access_at(
        &self,
        tenant_id: Uuid,
        now: OffsetDateTime,
    ) -> BillingResult<AccessEvaluation> {
        let subscription = self.store.find_subscription(tenant_id).await?;
        let evaluation = evaluate(subscription.as_ref(), now);

        if !evaluation.is_allowed() {
            tracing::debug!(
                tenant_id = %tenant_id,
                reason = evaluation.reason.map(|r| r.as_str()),
                "Tenant access blocked"
            );
        }

        Ok(evaluation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use time::Duration;

    const NOW: OffsetDateTime = datetime!(2025-06-15 12:00 UTC);

    fn sub(status: SubscriptionStatus) -> SubscriptionRecord {
        SubscriptionRecord {
            tenant_id: Uuid::new_v4(),
            status,
            trial_ends_at: None,
            grace_period_ends_at: None,
            current_period_end: None,
            suspended_at: None,
            suspension_reason: None,
        }
    }

    #[test]
    fn test_trial_in_progress_is_active() {
        let mut s = sub(SubscriptionStatus::Trialing);
        s.trial_ends_at = Some(NOW + Duration::days(3));
        let eval = evaluate(Some(&s), NOW);
        assert_eq!(eval.decision, AccessDecision::Active);
        assert_eq!(eval.trial_ends_at, s.trial_ends_at);
    }

    #[test]
    fn test_trial_ending_now_is_blocked() {
        let mut s = sub(SubscriptionStatus::Trialing);
        s.trial_ends_at = Some(NOW);
        let eval = evaluate(Some(&s), NOW);
        assert_eq!(eval.decision, AccessDecision::Blocked);
        assert_eq!(eval.reason, Some(AccessReason::TrialExpired));
    }

    #[test]
    fn test_trial_without_end_is_blocked() {
        let eval = evaluate(Some(&sub(SubscriptionStatus::Trialing)), NOW);
        assert_eq!(eval.reason, Some(AccessReason::TrialExpired));
    }

    #[test]
    fn test_active_is_active() {
        let eval = evaluate(Some(&sub(SubscriptionStatus::Active)), NOW);
        assert_eq!(eval.decision, AccessDecision::Active);
        assert_eq!(eval.reason, None);
        assert!(eval.is_allowed());
    }

    #[test]
    fn test_past_due_within_grace_warns() {
        let mut s = sub(SubscriptionStatus::PastDue);
        s.grace_period_ends_at = Some(NOW + Duration::hours(30));
        let eval = evaluate(Some(&s), NOW);
        assert_eq!(eval.decision, AccessDecision::ActiveWithWarning);
        assert_eq!(eval.reason, Some(AccessReason::PaymentPending));
        assert_eq!(eval.grace_days_remaining, Some(2));
        assert!(eval.is_allowed());
    }

    #[test]
    fn test_past_due_after_grace_blocks() {
        let mut s = sub(SubscriptionStatus::PastDue);
        s.grace_period_ends_at = Some(NOW - Duration::seconds(1));
        let eval = evaluate(Some(&s), NOW);
        assert_eq!(eval.decision, AccessDecision::Blocked);
        assert_eq!(eval.reason, Some(AccessReason::GraceExpired));
        assert_eq!(eval.grace_days_remaining, Some(0));
    }

    #[test]
    fn test_past_due_without_grace_end_blocks() {
        let eval = evaluate(Some(&sub(SubscriptionStatus::PastDue)), NOW);
        assert_eq!(eval.reason, Some(AccessReason::GraceExpired));
    }

    #[test]
    fn test_terminal_states_block() {
        assert_eq!(
            evaluate(Some(&sub(SubscriptionStatus::Suspended)), NOW).reason,
            Some(AccessReason::Suspended)
        );
        assert_eq!(
            evaluate(Some(&sub(SubscriptionStatus::Cancelled)), NOW).reason,
            Some(AccessReason::Cancelled)
        );
        assert_eq!(evaluate(None, NOW).reason, Some(AccessReason::NoSubscription));
    }

    #[test]
    fn test_days_remaining_rounds_up() {
        assert_eq!(days_remaining(NOW + Duration::days(3), NOW), 3);
        assert_eq!(days_remaining(NOW + Duration::minutes(1), NOW), 1);
        assert_eq!(days_remaining(NOW, NOW), 0);
        assert_eq!(days_remaining(NOW - Duration::days(1), NOW), 0);
    }

    #[test]
    fn test_evaluation_serializes_for_clients() {
        let mut s = sub(SubscriptionStatus::PastDue);
        s.grace_period_ends_at = Some(datetime!(2025-06-16 00:00 UTC));
        let json = serde_json::to_value(evaluate(Some(&s), NOW)).unwrap();
        assert_eq!(json["decision"], "ACTIVE_WITH_WARNING");
        assert_eq!(json["reason"], "payment_pending");
        assert_eq!(json["grace_ends_at"], "2025-06-16T00:00:00Z");
        assert_eq!(json["grace_days_remaining"], 1);
    }
}
