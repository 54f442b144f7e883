#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Pediu Background Worker
//!
//! Handles scheduled jobs including:
//! - Billing lifecycle sweep (daily, skipped while a previous run is in flight)
//! - Expired idempotency record purge (hourly)
//! - Data invariant checks (daily)
//! - Heartbeat (every 5 minutes)

mod config;
mod jobs;

use std::sync::Arc;
use std::time::Duration;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use pediu_billing::{BillingService, InvariantChecker};
use pediu_checkout::{IdempotencyGuard, IdempotencyPolicy, PgCheckoutStore};
use pediu_shared::{create_migration_pool, create_pool};

use crate::config::WorkerConfig;
use crate::jobs::SweepJob;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting Pediu Worker v{}", env!("CARGO_PKG_VERSION"));

    let config = WorkerConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    info!("Database pool created");

    if config.run_migrations {
        let migration_pool = create_migration_pool(&config.database_url).await?;
        pediu_shared::run_migrations(&migration_pool).await?;
        migration_pool.close().await;
    }

    let billing = BillingService::from_env(pool.clone())?;
    let policy = billing.lifecycle.policy();
    info!(
        grace_period_days = policy.grace_period_days,
        auto_suspend = policy.auto_suspend_enabled,
        "Billing policy loaded"
    );

    let sweep_job = SweepJob::new(billing.lifecycle.clone());
    let idempotency = IdempotencyGuard::new(
        Arc::new(PgCheckoutStore::new(pool.clone())),
        IdempotencyPolicy::with_ttl_hours(config.idempotency_ttl_hours),
    );
    let checker = InvariantChecker::new(pool.clone());

    let scheduler = JobScheduler::new().await?;

    // Job 1: Billing lifecycle sweep
    let job = sweep_job.clone();
    scheduler
        .add(Job::new_async(config.sweep_schedule.as_str(), move |_uuid, _l| {
            let job = job.clone();
            Box::pin(async move {
                info!("Running scheduled billing sweep");
                if let Some(report) = job.run().await {
                    info!(
                        overdue_invoices = report.overdue_invoices,
                        suspended_tenants = report.suspended_tenants,
                        expired_trials = report.expired_trials,
                        errors = report.errors,
                        "Scheduled billing sweep finished"
                    );
                }
            })
        })?)
        .await?;
    info!(schedule = %config.sweep_schedule, "Scheduled: Billing lifecycle sweep");

    // Job 2: Purge expired idempotency records
    let guard = idempotency.clone();
    scheduler
        .add(Job::new_async(config.purge_schedule.as_str(), move |_uuid, _l| {
            let guard = guard.clone();
            Box::pin(async move {
                // Failures are logged inside; the next tick retries
                let _ = jobs::purge_idempotency(&guard).await;
            })
        })?)
        .await?;
    info!(schedule = %config.purge_schedule, "Scheduled: Idempotency purge");

    // Job 3: Invariant checks
    let invariant_checker = checker.clone();
    scheduler
        .add(Job::new_async(
            config.invariants_schedule.as_str(),
            move |_uuid, _l| {
                let checker = invariant_checker.clone();
                Box::pin(async move {
                    info!("Running invariant checks");
                    if let Err(e) = jobs::check_invariants(&checker).await {
                        error!(error = %e, "Invariant checks could not run");
                    }
                })
            },
        )?)
        .await?;
    info!(schedule = %config.invariants_schedule, "Scheduled: Invariant checks");

    // Job 4: Heartbeat (every 5 minutes)
    let heartbeat_job = sweep_job.clone();
    scheduler
        .add(Job::new_async("0 */5 * * * *", move |_uuid, _l| {
            let sweep_running = heartbeat_job.is_running();
            Box::pin(async move {
                info!(sweep_running, "Worker heartbeat");
            })
        })?)
        .await?;
    info!("Scheduled: Heartbeat (every 5 minutes)");

    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("Pediu Worker started successfully with {} scheduled jobs", 4);

    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
