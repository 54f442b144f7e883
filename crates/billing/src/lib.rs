// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Pediu Billing
//!
//! Decides whether a tenant may serve traffic and advances subscription
//! state as invoices go unpaid.
//!
//! ## Features
//!
//! - **Access evaluation**: read-only, wall-clock based decision over a
//!   tenant's subscription (active, active with warning, blocked)
//! - **Lifecycle sweep**: idempotent batch job that marks invoices overdue,
//!   moves tenants to past due, suspends them after the grace period and
//!   suspends expired trials
//! - **Invariants**: read-only consistency checks over orders, coupons and
//!   subscriptions

use std::sync::Arc;

use sqlx::PgPool;

pub mod access;
pub mod error;
pub mod invariants;
pub mod lifecycle;
pub mod memory;
pub mod pg;
pub mod store;


// Access
pub use access::{
    days_remaining, evaluate, AccessDecision, AccessEvaluation, AccessEvaluator, AccessReason,
    SubscriptionRecord,
};

// Error
pub use error::{BillingError, BillingResult};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Lifecycle
pub use lifecycle::{BillingPolicy, LifecycleSweep, SweepReport, DEFAULT_GRACE_PERIOD_DAYS};

// Stores
pub use memory::InMemoryBillingStore;
pub use pg::PgBillingStore;
pub use store::{BillingStore, Invoice, OverdueTenant};

/// Access evaluator and lifecycle sweep sharing one store
#[derive(Clone)]
pub struct BillingService {
    pub access: AccessEvaluator,
    pub lifecycle: LifecycleSweep,
}

impl BillingService {
    /// Build against Postgres with the policy read from the environment
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let policy = BillingPolicy::from_env()?;
        Ok(Self::new(Arc::new(PgBillingStore::new(pool)), policy))
    }

    pub fn new(store: Arc<dyn BillingStore>, policy: BillingPolicy) -> Self {
        Self {
            access: AccessEvaluator::new(store.clone()),
            lifecycle: LifecycleSweep::new(store, policy),
        }
    }
}
