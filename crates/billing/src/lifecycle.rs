//! Billing lifecycle sweep
//!
//! Advances invoices and subscriptions independently of request traffic:
//!
//! 1. Pending invoices due before today become `overdue`.
//! 2. Active subscriptions of tenants with an overdue invoice become
//!    `past_due`, with the grace period counted from the oldest due date.
//! 3. Tenants whose oldest overdue invoice is older than the grace period are
//!    suspended (unless auto-suspend is off).
//! 4. Trials that have ended are suspended with reason `trial_expired`.
//!
//! Tenants are processed one at a time. A failed write is logged and counted
//! in [`SweepReport::errors`]; the sweep moves on to the next tenant.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::{Date, Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::store::{BillingStore, OverdueTenant, REASON_OVERDUE_INVOICE};

pub const DEFAULT_GRACE_PERIOD_DAYS: i64 = 3;

const MAX_GRACE_PERIOD_DAYS: i64 = 365;

/// Billing knobs, read once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingPolicy {
    pub grace_period_days: i64,
    pub auto_suspend_enabled: bool,
}

impl Default for BillingPolicy {
    fn default() -> Self {
        Self {
            grace_period_days: DEFAULT_GRACE_PERIOD_DAYS,
            auto_suspend_enabled: true,
        }
    }
}

impl BillingPolicy {
    /// Read `GRACE_PERIOD_DAYS` and `AUTO_SUSPEND_ENABLED`, falling back to
    /// the defaults when unset
    pub fn from_env() -> BillingResult<Self> {
        let mut policy = Self::default();

        if let Ok(raw) = std::env::var("GRACE_PERIOD_DAYS") {
            policy.grace_period_days = parse_grace_days(&raw)?;
        }
        if let Ok(raw) = std::env::var("AUTO_SUSPEND_ENABLED") {
            policy.auto_suspend_enabled = parse_flag(&raw)?;
        }

        Ok(policy)
    }

    fn grace(&self) -> Duration {
        Duration::days(self.grace_period_days)
    }

    /// End of the grace period for an invoice due on `due_date`
    pub fn grace_ends_at(&self, due_date: Date) -> OffsetDateTime {
        let start = due_date.midnight().assume_utc();
        start.checked_add(self.grace()).unwrap_or(start)
    }

    /// Whether an invoice due on `due_date` has outlived the grace period by `today`
    pub fn is_past_grace(&self, due_date: Date, today: Date) -> bool {
        match today.checked_sub(self.grace()) {
            Some(cutoff) => due_date < cutoff,
            None => false,
        }
    }
}

fn parse_grace_days(raw: &str) -> BillingResult<i64> {
    let days: i64 = raw
        .trim()
        .parse()
        .map_err(|_| BillingError::Config(format!("GRACE_PERIOD_DAYS is not a number: {}", raw)))?;
    if !(0..=MAX_GRACE_PERIOD_DAYS).contains(&days) {
        return Err(BillingError::Config(format!(
            "GRACE_PERIOD_DAYS must be between 0 and {}",
            MAX_GRACE_PERIOD_DAYS
        )));
    }
    Ok(days)
}

fn parse_flag(raw: &str) -> BillingResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(BillingError::Config(format!(
            "AUTO_SUSPEND_ENABLED is not a boolean: {}",
            other
        ))),
    }
}

/// Counts from one sweep run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub overdue_invoices: u64,
    pub past_due_subscriptions: u64,
    pub suspended_tenants: u64,
    pub expired_trials: u64,
    pub errors: u64,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.errors == 0
    }
}

#[derive(Clone)]
pub struct LifecycleSweep {
    store: Arc<dyn BillingStore>,
    policy: BillingPolicy,
}

impl LifecycleSweep {
    pub fn new(store: Arc<dyn BillingStore>, policy: BillingPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &BillingPolicy {
        &self.policy
    }

    pub async fn run(&self) -> SweepReport {
        self.run_at(OffsetDateTime::now_utc()).await
    }

    /// Run every step as of `now`. Safe to call repeatedly.
    pub async fn run_at(&self, now: OffsetDateTime) -> SweepReport {
        let today = now.date();
        let mut report = SweepReport::default();

        self.mark_overdue_invoices(today, now, &mut report).await;
        self.advance_overdue_tenants(today, now, &mut report).await;
        self.expire_trials(now, &mut report).await;

        tracing::info!(
            overdue_invoices = report.overdue_invoices,
            past_due = report.past_due_subscriptions,
            suspended = report.suspended_tenants,
            expired_trials = report.expired_trials,
            errors = report.errors,
            "Billing lifecycle sweep complete"
        );

        report
    }

    async fn mark_overdue_invoices(
        &self,
        today: Date,
        now: OffsetDateTime,
        report: &mut SweepReport,
    ) {
        let tenants = match self.store.tenants_with_lapsed_invoices(today).await {
            Ok(tenants) => tenants,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list tenants with lapsed invoices");
                report.errors += 1;
                return;
            }
        };

        for tenant_id in tenants {
            match self.store.mark_invoices_overdue(tenant_id, today, now).await {
                Ok(0) => {}
                Ok(marked) => {
                    tracing::info!(tenant_id = %tenant_id, invoices = marked, "Invoices marked overdue");
                    report.overdue_invoices += marked;
                }
                Err(e) => {
                    tracing::warn!(tenant_id = %tenant_id, error = %e, "Failed to mark invoices overdue");
                    report.errors += 1;
                }
            }
        }
    }

    async fn advance_overdue_tenants(
        &self,
        today: Date,
        now: OffsetDateTime,
        report: &mut SweepReport,
    ) {
        let overdue = match self.store.overdue_tenants().await {
            Ok(overdue) => overdue,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list tenants with overdue invoices");
                report.errors += 1;
                return;
            }
        };

        for tenant in overdue {
            if let Err(e) = self.advance_tenant(&tenant, today, now, report).await {
                tracing::warn!(
                    tenant_id = %tenant.tenant_id,
                    error = %e,
                    "Failed to advance overdue tenant"
                );
                report.errors += 1;
            }
        }
    }

    async fn advance_tenant(
        &self,
        tenant: &OverdueTenant,
        today: Date,
        now: OffsetDateTime,
        report: &mut SweepReport,
    ) -> BillingResult<()> {
        let grace_ends_at = self.policy.grace_ends_at(tenant.earliest_due);
        if self
            .store
            .mark_past_due(tenant.tenant_id, grace_ends_at, now)
            .await?
        {
            tracing::info!(
                tenant_id = %tenant.tenant_id,
                grace_ends_at = %grace_ends_at,
                "Subscription moved to past_due"
            );
            report.past_due_subscriptions += 1;
        }

        if !self.policy.auto_suspend_enabled
            || !self.policy.is_past_grace(tenant.earliest_due, today)
        {
            return Ok(());
        }

        if self
            .store
            .suspend(tenant.tenant_id, REASON_OVERDUE_INVOICE, now)
            .await?
        {
            tracing::info!(
                tenant_id = %tenant.tenant_id,
                earliest_due = %tenant.earliest_due,
                "Tenant suspended for overdue invoice"
            );
            report.suspended_tenants += 1;
        }

        Ok(())
    }

    async fn expire_trials(&self, now: OffsetDateTime, report: &mut SweepReport) {
        let tenants: Vec<Uuid> = match self.store.expired_trials(now).await {
            Ok(tenants) => tenants,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list expired trials");
                report.errors += 1;
                return;
            }
        };

        for tenant_id in tenants {
            match self.store.expire_trial(tenant_id, now).await {
                Ok(true) => {
                    tracing::info!(tenant_id = %tenant_id, "Trial expired, tenant suspended");
                    report.expired_trials += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(tenant_id = %tenant_id, error = %e, "Failed to expire trial");
                    report.errors += 1;
                }
            }
        }
    }
}
