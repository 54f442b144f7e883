//! Storage seam for subscriptions and invoices
//!
//! Each write is a single conditional statement whose predicate makes it a
//! no-op on re-run, so the sweep can be repeated or interrupted at any point.

use async_trait::async_trait;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use pediu_shared::InvoiceStatus;

use crate::access::SubscriptionRecord;
use crate::error::BillingResult;

/// Suspension reason recorded when a tenant's overdue invoice outlives grace
pub const REASON_OVERDUE_INVOICE: &str = "overdue_invoice";

/// Suspension reason recorded when a trial runs out
pub const REASON_TRIAL_EXPIRED: &str = "trial_expired";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub amount_cents: i64,
    pub status: InvoiceStatus,
    pub due_date: Date,
}

/// A tenant with at least one overdue invoice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverdueTenant {
    pub tenant_id: Uuid,
    /// Due date of the oldest overdue invoice
    pub earliest_due: Date,
}

#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn find_subscription(&self, tenant_id: Uuid) -> BillingResult<Option<SubscriptionRecord>>;

    /// Tenants owning a `pending` invoice due before `today`
    async fn tenants_with_lapsed_invoices(&self, today: Date) -> BillingResult<Vec<Uuid>>;

    /// Flip the tenant's `pending` invoices due before `today` to `overdue`
    async fn mark_invoices_overdue(
        &self,
        tenant_id: Uuid,
        today: Date,
        now: OffsetDateTime,
    ) -> BillingResult<u64>;

    async fn overdue_tenants(&self) -> BillingResult<Vec<OverdueTenant>>;

    /// Move an `active` subscription to `past_due` with a fresh grace end.
    /// Returns whether a row changed.
    async fn mark_past_due(
        &self,
        tenant_id: Uuid,
        grace_period_ends_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> BillingResult<bool>;

    /// Suspend a subscription that is neither suspended nor cancelled.
    /// Already suspended rows keep their reason.
    async fn suspend(&self, tenant_id: Uuid, reason: &str, now: OffsetDateTime)
        -> BillingResult<bool>;

    /// Tenants whose subscription is `trialing` with a trial end at or before `now`
    async fn expired_trials(&self, now: OffsetDateTime) -> BillingResult<Vec<Uuid>>;

    /// Suspend a trial that is still `trialing` and has ended by `now`
    async fn expire_trial(&self, tenant_id: Uuid, now: OffsetDateTime) -> BillingResult<bool>;
}
