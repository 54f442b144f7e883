//! Postgres billing backend
//!
//! `find_subscription` is a single statement, so it reads one snapshot of
//! the row even while the sweep is writing it. Every sweep write carries its
//! own guard in the `WHERE` clause and reports whether a row changed.

use async_trait::async_trait;
use sqlx::PgPool;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::access::SubscriptionRecord;
use crate::error::BillingResult;
use crate::store::{BillingStore, OverdueTenant, REASON_TRIAL_EXPIRED};

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    tenant_id: Uuid,
    status: String,
    trial_ends_at: Option<OffsetDateTime>,
    grace_period_ends_at: Option<OffsetDateTime>,
    current_period_end: Option<OffsetDateTime>,
    suspended_at: Option<OffsetDateTime>,
    suspension_reason: Option<String>,
}

impl TryFrom<SubscriptionRow> for SubscriptionRecord {
    type Error = crate::error::BillingError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(SubscriptionRecord {
            tenant_id: row.tenant_id,
            status: row.status.parse()?,
            trial_ends_at: row.trial_ends_at,
            grace_period_ends_at: row.grace_period_ends_at,
            current_period_end: row.current_period_end,
            suspended_at: row.suspended_at,
            suspension_reason: row.suspension_reason,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OverdueTenantRow {
    tenant_id: Uuid,
    earliest_due: Date,
}

#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn find_subscription(&self, tenant_id: Uuid) -> BillingResult<Option<SubscriptionRecord>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(
            r#"
            SELECT tenant_id, status, trial_ends_at, grace_period_ends_at,
                   current_period_end, suspended_at, suspension_reason
            FROM subscriptions
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SubscriptionRecord::try_from).transpose()
    }

    async fn tenants_with_lapsed_invoices(&self, today: Date) -> BillingResult<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT tenant_id
            FROM invoices
            WHERE status = 'pending' AND due_date < $1
            ORDER BY tenant_id
            "#,
        )
        .bind(today)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn mark_invoices_overdue(
        &self,
        tenant_id: Uuid,
        today: Date,
        now: OffsetDateTime,
    ) -> BillingResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET status = 'overdue', updated_at = $3
            WHERE tenant_id = $1 AND status = 'pending' AND due_date < $2
            "#,
        )
        .bind(tenant_id)
        .bind(today)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn overdue_tenants(&self) -> BillingResult<Vec<OverdueTenant>> {
        let rows: Vec<OverdueTenantRow> = sqlx::query_as(
            r#"
            SELECT tenant_id, MIN(due_date) AS earliest_due
            FROM invoices
            WHERE status = 'overdue'
            GROUP BY tenant_id
            ORDER BY tenant_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| OverdueTenant {
                tenant_id: row.tenant_id,
                earliest_due: row.earliest_due,
            })
            .collect())
    }

    async fn mark_past_due(
        &self,
        tenant_id: Uuid,
        grace_period_ends_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'past_due',
                grace_period_ends_at = $2,
                updated_at = $3
            WHERE tenant_id = $1 AND status = 'active'
            "#,
        )
        .bind(tenant_id)
        .bind(grace_period_ends_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn suspend(
        &self,
        tenant_id: Uuid,
        reason: &str,
        now: OffsetDateTime,
    ) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'suspended',
                suspended_at = $3,
                suspension_reason = $2,
                updated_at = $3
            WHERE tenant_id = $1 AND status NOT IN ('suspended', 'cancelled')
            "#,
        )
        .bind(tenant_id)
        .bind(reason)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn expired_trials(&self, now: OffsetDateTime) -> BillingResult<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT tenant_id
            FROM subscriptions
            WHERE status = 'trialing' AND trial_ends_at <= $1
            ORDER BY tenant_id
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn expire_trial(&self, tenant_id: Uuid, now: OffsetDateTime) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'suspended',
                suspended_at = $2,
                suspension_reason = $3,
                updated_at = $2
            WHERE tenant_id = $1 AND status = 'trialing' AND trial_ends_at <= $2
            "#,
        )
        .bind(tenant_id)
        .bind(now)
        .bind(REASON_TRIAL_EXPIRED)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
