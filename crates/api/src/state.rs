//! Application state

use std::sync::Arc;

use sqlx::PgPool;

use pediu_billing::{BillingPolicy, BillingService, BillingStore, PgBillingStore};
use pediu_checkout::{CheckoutStore, IdempotencyPolicy, OrderCommitService, PgCheckoutStore};

use crate::{auth::JwtManager, config::Config};

/// JWT lifetime used when this service issues tokens itself (tests, tooling)
const JWT_EXPIRY_HOURS: i64 = 24;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub jwt_manager: JwtManager,
    pub orders: OrderCommitService,
    pub billing: BillingService,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config, policy: BillingPolicy) -> Self {
        let checkout = Arc::new(PgCheckoutStore::new(pool.clone()));
        let billing: Arc<dyn BillingStore> = Arc::new(PgBillingStore::new(pool));
        Self::with_stores(config, checkout, billing, policy)
    }

    /// Build on arbitrary backends, e.g. the in-memory stores
    pub fn with_stores<S>(
        config: Config,
        checkout: Arc<S>,
        billing: Arc<dyn BillingStore>,
        policy: BillingPolicy,
    ) -> Self
    where
        S: CheckoutStore + 'static,
    {
        let idempotency = IdempotencyPolicy::with_ttl_hours(config.idempotency_ttl_hours);
        tracing::info!(
            idempotency_ttl_hours = config.idempotency_ttl_hours,
            grace_period_days = policy.grace_period_days,
            auto_suspend = policy.auto_suspend_enabled,
            "Services configured"
        );

        Self {
            jwt_manager: JwtManager::new(&config.jwt_secret, JWT_EXPIRY_HOURS),
            orders: OrderCommitService::new(checkout, idempotency),
            billing: BillingService::new(billing, policy),
            config,
        }
    }
}
