//! Job bodies run by the scheduler

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::{Retry, RetryIf};
use tracing::{error, info, warn};

use pediu_billing::{
    BillingError, InvariantCheckSummary, InvariantChecker, LifecycleSweep, SweepReport,
    ViolationSeverity,
};
use pediu_checkout::{CheckoutError, IdempotencyGuard};

/// Backoff for storage calls: 200ms, 400ms, 800ms with jitter
fn retry_strategy() -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(2)
        .factor(100)
        .max_delay(Duration::from_secs(5))
        .map(jitter)
        .take(3)
}

/// Runs the lifecycle sweep, skipping a tick while the previous run is
/// still in flight
#[derive(Clone)]
pub struct SweepJob {
    sweep: LifecycleSweep,
    running: Arc<AtomicBool>,
}

/// Clears the in-flight flag when the run ends, including on panic
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SweepJob {
    pub fn new(sweep: LifecycleSweep) -> Self {
        Self {
            sweep,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// `None` when skipped because another run holds the flag
    pub async fn run(&self) -> Option<SweepReport> {
        self.run_at(OffsetDateTime::now_utc()).await
    }

    pub async fn run_at(&self, now: OffsetDateTime) -> Option<SweepReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Previous billing sweep still running, skipping this tick");
            return None;
        }
        let _in_flight = InFlight(&self.running);

        let report = self.sweep.run_at(now).await;
        if !report.is_clean() {
            warn!(errors = report.errors, "Billing sweep finished with errors");
        }
        Some(report)
    }
}

/// Deletes expired idempotency records, retrying transient failures
pub async fn purge_idempotency(guard: &IdempotencyGuard) -> Result<u64, CheckoutError> {
    let result = RetryIf::spawn(
        retry_strategy(),
        || guard.purge_expired(OffsetDateTime::now_utc()),
        |e: &CheckoutError| e.is_retryable(),
    )
    .await;

    match &result {
        Ok(purged) => info!(purged, "Idempotency purge complete"),
        Err(e) => error!(error = %e, "Idempotency purge failed"),
    }
    result
}

/// Runs every invariant check and logs violations by severity
pub async fn check_invariants(
    checker: &InvariantChecker,
) -> Result<InvariantCheckSummary, BillingError> {
    let summary = Retry::spawn(retry_strategy(), || checker.run_all_checks()).await?;
    log_invariant_summary(&summary);
    Ok(summary)
}

fn log_invariant_summary(summary: &InvariantCheckSummary) {
    if summary.healthy {
        info!(checks_run = summary.checks_run, "All invariant checks passed");
        return;
    }

    for violation in &summary.violations {
        match violation.severity {
            ViolationSeverity::Critical | ViolationSeverity::High => error!(
                invariant = %violation.invariant,
                severity = %violation.severity,
                tenants = violation.tenant_ids.len(),
                "{}",
                violation.description
            ),
            _ => warn!(
                invariant = %violation.invariant,
                severity = %violation.severity,
                tenants = violation.tenant_ids.len(),
                "{}",
                violation.description
            ),
        }
    }

    warn!(
        checks_run = summary.checks_run,
        checks_failed = summary.checks_failed,
        violations = summary.violations.len(),
        "Invariant checks found violations"
    );
}
