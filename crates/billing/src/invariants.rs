//! Consistency checks over orders, coupons and subscriptions
//!
//! Each invariant is one read-only SQL query. The worker runs them daily;
//! any violation points at a bug in the commit path or a sweep that is
//! falling behind.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Tenant(s) affected
    pub tenant_ids: Vec<Uuid>,
    pub description: String,
    /// Row details for debugging
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Money or redemptions are wrong
    Critical,
    /// Data inconsistency that needs attention
    High,
    /// Usually lag, should be investigated if it persists
    Medium,
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

impl InvariantCheckSummary {
    fn from_violations(
        checked_at: OffsetDateTime,
        checks_run: usize,
        violations: Vec<InvariantViolation>,
    ) -> Self {
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<HashSet<_>>()
            .len();

        Self {
            checked_at,
            checks_run,
            checks_passed: checks_run.saturating_sub(checks_failed),
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        }
    }
}

const CHECKS: [&str; 6] = [
    "coupon_usage_within_cap",
    "order_subtotal_matches_items",
    "discount_within_subtotal",
    "orders_have_items",
    "trial_past_end_still_trialing",
    "past_due_has_grace_end",
];

#[derive(Debug, sqlx::FromRow)]
struct CouponOverCapRow {
    tenant_id: Uuid,
    coupon_id: Uuid,
    code: String,
    uses_count: i32,
    max_uses: i32,
    redeemed_orders: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct SubtotalMismatchRow {
    tenant_id: Uuid,
    order_id: Uuid,
    code: String,
    subtotal_cents: i64,
    items_total_cents: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct DiscountOverSubtotalRow {
    tenant_id: Uuid,
    order_id: Uuid,
    code: String,
    subtotal_cents: i64,
    discount_cents: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct OrderWithoutItemsRow {
    tenant_id: Uuid,
    order_id: Uuid,
    code: String,
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionLagRow {
    tenant_id: Uuid,
    status: String,
    at: Option<OffsetDateTime>,
}

/// Runs the invariant queries against Postgres
#[derive(Clone)]
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        for name in CHECKS {
            violations.extend(self.run_check(name).await?);
        }

        Ok(InvariantCheckSummary::from_violations(
            now,
            CHECKS.len(),
            violations,
        ))
    }

    /// Run a single invariant check by name; unknown names yield nothing
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "coupon_usage_within_cap" => self.check_coupon_usage_within_cap().await,
            "order_subtotal_matches_items" => self.check_order_subtotal_matches_items().await,
            "discount_within_subtotal" => self.check_discount_within_subtotal().await,
            "orders_have_items" => self.check_orders_have_items().await,
            "trial_past_end_still_trialing" => self.check_trial_past_end().await,
            "past_due_has_grace_end" => self.check_past_due_has_grace_end().await,
            _ => Ok(vec![]),
        }
    }

    pub fn available_checks() -> Vec<&'static str> {
        CHECKS.to_vec()
    }

    /// A capped coupon is never redeemed past its cap
    async fn check_coupon_usage_within_cap(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<CouponOverCapRow> = sqlx::query_as(
            r#"
            SELECT s.tenant_id, c.id AS coupon_id, c.code, c.uses_count, c.max_uses,
                   COUNT(o.id) AS redeemed_orders
            FROM coupons c
            JOIN stores s ON s.id = c.store_id
            LEFT JOIN orders o ON o.coupon_id = c.id
            WHERE c.max_uses IS NOT NULL
            GROUP BY s.tenant_id, c.id, c.code, c.uses_count, c.max_uses
            HAVING c.uses_count > c.max_uses OR COUNT(o.id) > c.max_uses
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "coupon_usage_within_cap".to_string(),
                tenant_ids: vec![row.tenant_id],
                description: format!(
                    "Coupon {} redeemed {} times ({} orders) with a cap of {}",
                    row.code, row.uses_count, row.redeemed_orders, row.max_uses
                ),
                context: serde_json::json!({
                    "coupon_id": row.coupon_id,
                    "uses_count": row.uses_count,
                    "max_uses": row.max_uses,
                    "redeemed_orders": row.redeemed_orders,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// An order's subtotal equals the sum of its line totals
    async fn check_order_subtotal_matches_items(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<SubtotalMismatchRow> = sqlx::query_as(
            r#"
            SELECT o.tenant_id, o.id AS order_id, o.code, o.subtotal_cents,
                   SUM(i.line_total_cents)::BIGINT AS items_total_cents
            FROM orders o
            JOIN order_items i ON i.order_id = o.id
            GROUP BY o.tenant_id, o.id, o.code, o.subtotal_cents
            HAVING SUM(i.line_total_cents) <> o.subtotal_cents
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "order_subtotal_matches_items".to_string(),
                tenant_ids: vec![row.tenant_id],
                description: format!(
                    "Order {} has subtotal {} but its items add up to {}",
                    row.code, row.subtotal_cents, row.items_total_cents
                ),
                context: serde_json::json!({
                    "order_id": row.order_id,
                    "subtotal_cents": row.subtotal_cents,
                    "items_total_cents": row.items_total_cents,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    async fn check_discount_within_subtotal(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<DiscountOverSubtotalRow> = sqlx::query_as(
            r#"
            SELECT tenant_id, id AS order_id, code, subtotal_cents, discount_cents
            FROM orders
            WHERE discount_cents < 0 OR discount_cents > subtotal_cents
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "discount_within_subtotal".to_string(),
                tenant_ids: vec![row.tenant_id],
                description: format!(
                    "Order {} has discount {} against subtotal {}",
                    row.code, row.discount_cents, row.subtotal_cents
                ),
                context: serde_json::json!({
                    "order_id": row.order_id,
                    "subtotal_cents": row.subtotal_cents,
                    "discount_cents": row.discount_cents,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    async fn check_orders_have_items(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<OrderWithoutItemsRow> = sqlx::query_as(
            r#"
            SELECT o.tenant_id, o.id AS order_id, o.code
            FROM orders o
            WHERE NOT EXISTS (SELECT 1 FROM order_items i WHERE i.order_id = o.id)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "orders_have_items".to_string(),
                tenant_ids: vec![row.tenant_id],
                description: format!("Order {} was committed without items", row.code),
                context: serde_json::json!({ "order_id": row.order_id }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Trials more than a day past their end should have been swept.
    /// Access is already blocked by the evaluator, so this only flags lag.
    async fn check_trial_past_end(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<SubscriptionLagRow> = sqlx::query_as(
            r#"
            SELECT tenant_id, status, trial_ends_at AS at
            FROM subscriptions
            WHERE status = 'trialing'
              AND trial_ends_at < NOW() - INTERVAL '1 day'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "trial_past_end_still_trialing".to_string(),
                tenant_ids: vec![row.tenant_id],
                description: format!(
                    "Subscription is still {} although the trial ended at {:?}",
                    row.status, row.at
                ),
                context: serde_json::json!({ "trial_ends_at": row.at }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    async fn check_past_due_has_grace_end(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<SubscriptionLagRow> = sqlx::query_as(
            r#"
            SELECT tenant_id, status, updated_at AS at
            FROM subscriptions
            WHERE status = 'past_due' AND grace_period_ends_at IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "past_due_has_grace_end".to_string(),
                tenant_ids: vec![row.tenant_id],
                description: format!(
                    "Subscription is {} with no grace period end, access is blocked",
                    row.status
                ),
                context: serde_json::json!({ "updated_at": row.at }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }
}
