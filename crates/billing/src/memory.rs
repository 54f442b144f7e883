//! In-memory billing backend for tests and local runs
//!
//! Applies the same predicates as the SQL statements in [`crate::pg`].

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use time::{Date, OffsetDateTime};
use tokio::sync::Mutex;
use uuid::Uuid;

use pediu_shared::{InvoiceStatus, SubscriptionStatus};

use crate::access::SubscriptionRecord;
use crate::error::{BillingError, BillingResult};
use crate::store::{BillingStore, Invoice, OverdueTenant, REASON_TRIAL_EXPIRED};

#[derive(Default)]
struct MemoryState {
    subscriptions: HashMap<Uuid, SubscriptionRecord>,
    invoices: Vec<Invoice>,
    failing_tenants: HashSet<Uuid>,
}

#[derive(Default)]
pub struct InMemoryBillingStore {
    state: Mutex<MemoryState>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert_subscription(&self, subscription: SubscriptionRecord) {
        self.state
            .lock()
            .await
            .subscriptions
            .insert(subscription.tenant_id, subscription);
    }

    pub async fn insert_invoice(&self, invoice: Invoice) {
        self.state.lock().await.invoices.push(invoice);
    }

    pub async fn subscription(&self, tenant_id: Uuid) -> Option<SubscriptionRecord> {
        self.state.lock().await.subscriptions.get(&tenant_id).cloned()
    }

    pub async fn invoices(&self, tenant_id: Uuid) -> Vec<Invoice> {
        self.state
            .lock()
            .await
            .invoices
            .iter()
            .filter(|i| i.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    /// Make every write for `tenant_id` fail
    pub async fn fail_writes_for(&self, tenant_id: Uuid) {
        self.state.lock().await.failing_tenants.insert(tenant_id);
    }
}

fn check_writable(state: &MemoryState, tenant_id: Uuid) -> BillingResult<()> {
    if state.failing_tenants.contains(&tenant_id) {
        return Err(BillingError::Database(format!(
            "simulated write failure for tenant {}",
            tenant_id
        )));
    }
    Ok(())
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn find_subscription(&self, tenant_id: Uuid) -> BillingResult<Option<SubscriptionRecord>> {
        Ok(self.subscription(tenant_id).await)
    }

    async fn tenants_with_lapsed_invoices(&self, today: Date) -> BillingResult<Vec<Uuid>> {
        let state = self.state.lock().await;
        let mut tenants: Vec<Uuid> = state
            .invoices
            .iter()
            .filter(|i| i.status == InvoiceStatus::Pending && i.due_date < today)
            .map(|i| i.tenant_id)
            .collect();
        tenants.sort();
        tenants.dedup();
        Ok(tenants)
    }

    async fn mark_invoices_overdue(
        &self,
        tenant_id: Uuid,
        today: Date,
        _now: OffsetDateTime,
    ) -> BillingResult<u64> {
        let mut state = self.state.lock().await;
        check_writable(&state, tenant_id)?;

        let mut marked = 0;
        for invoice in state.invoices.iter_mut().filter(|i| {
            i.tenant_id == tenant_id && i.status == InvoiceStatus::Pending && i.due_date < today
        }) {
            invoice.status = InvoiceStatus::Overdue;
            marked += 1;
        }
        Ok(marked)
    }

    async fn overdue_tenants(&self) -> BillingResult<Vec<OverdueTenant>> {
        let state = self.state.lock().await;
        let mut earliest: HashMap<Uuid, Date> = HashMap::new();
        for invoice in state
            .invoices
            .iter()
            .filter(|i| i.status == InvoiceStatus::Overdue)
        {
            earliest
                .entry(invoice.tenant_id)
                .and_modify(|d| *d = (*d).min(invoice.due_date))
                .or_insert(invoice.due_date);
        }

        let mut tenants: Vec<OverdueTenant> = earliest
            .into_iter()
            .map(|(tenant_id, earliest_due)| OverdueTenant {
                tenant_id,
                earliest_due,
            })
            .collect();
        tenants.sort_by_key(|t| t.tenant_id);
        Ok(tenants)
    }

    async fn mark_past_due(
        &self,
        tenant_id: Uuid,
        grace_period_ends_at: OffsetDateTime,
        _now: OffsetDateTime,
    ) -> BillingResult<bool> {
        let mut state = self.state.lock().await;
        check_writable(&state, tenant_id)?;

        match state.subscriptions.get_mut(&tenant_id) {
            Some(sub) if sub.status == SubscriptionStatus::Active => {
                sub.status = SubscriptionStatus::PastDue;
                sub.grace_period_ends_at = Some(grace_period_ends_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn suspend(
        &self,
        tenant_id: Uuid,
        reason: &str,
        now: OffsetDateTime,
    ) -> BillingResult<bool> {
        let mut state = self.state.lock().await;
        check_writable(&state, tenant_id)?;

        match state.subscriptions.get_mut(&tenant_id) {
            Some(sub)
                if !matches!(
                    sub.status,
                    SubscriptionStatus::Suspended | SubscriptionStatus::Cancelled
                ) =>
            {
                sub.status = SubscriptionStatus::Suspended;
                sub.suspended_at = Some(now);
                sub.suspension_reason = Some(reason.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expired_trials(&self, now: OffsetDateTime) -> BillingResult<Vec<Uuid>> {
        let state = self.state.lock().await;
        let mut tenants: Vec<Uuid> = state
            .subscriptions
            .values()
            .filter(|s| is_expired_trial(s, now))
            .map(|s| s.tenant_id)
            .collect();
        tenants.sort();
        Ok(tenants)
    }

    async fn expire_trial(&self, tenant_id: Uuid, now: OffsetDateTime) -> BillingResult<bool> {
        let mut state = self.state.lock().await;
        check_writable(&state, tenant_id)?;

        match state.subscriptions.get_mut(&tenant_id) {
            Some(sub) if is_expired_trial(sub, now) => {
                sub.status = SubscriptionStatus::Suspended;
                sub.suspended_at = Some(now);
                sub.suspension_reason = Some(REASON_TRIAL_EXPIRED.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

fn is_expired_trial(sub: &SubscriptionRecord, now: OffsetDateTime) -> bool {
    sub.status == SubscriptionStatus::Trialing && sub.trial_ends_at.is_some_and(|end| end <= now)
}
