//! Staffly Billing Worker
//!
//! Runs the subscription lifecycle on a schedule:
//! - Lifecycle sweeps: trial expiry, grace period, stale invoices, pending changes
//!   (every 15 minutes by default, `LIFECYCLE_CRON`)
//! - Billing invariant checks (daily at 03:00 UTC by default, `INVARIANT_CRON`)

use std::sync::Arc;
use std::time::Duration;

use staffly_billing::{BillingService, InvariantCheckSummary, SweepOutcome, ViolationSeverity};
use staffly_shared::db::{create_pool, run_migrations};
use time::OffsetDateTime;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

const DEFAULT_LIFECYCLE_CRON: &str = "0 */15 * * * *";
const DEFAULT_INVARIANT_CRON: &str = "0 0 3 * * *";
const DB_MAX_CONNECTIONS: u32 = 5;

/// Log the result of each lifecycle sweep
fn log_sweep_outcomes(outcomes: &[SweepOutcome]) {
    for outcome in outcomes {
        if outcome.is_clean() {
            info!(
                job = %outcome.job,
                transitioned = outcome.transitioned,
                skipped = outcome.skipped,
                "Lifecycle sweep complete"
            );
        } else {
            warn!(
                job = %outcome.job,
                transitioned = outcome.transitioned,
                skipped = outcome.skipped,
                errors = outcome.errors.len(),
                "Lifecycle sweep finished with errors"
            );
            for e in &outcome.errors {
                error!(job = %outcome.job, error = %e, "Lifecycle sweep error");
            }
        }
    }
}

fn log_invariant_summary(summary: &InvariantCheckSummary) {
    if summary.healthy {
        info!(checks_run = summary.checks_run, "Billing invariants healthy");
        return;
    }

    warn!(
        checks_run = summary.checks_run,
        checks_failed = summary.checks_failed,
        violations = summary.violations.len(),
        "Billing invariant violations found"
    );
    for violation in &summary.violations {
        match violation.severity {
            ViolationSeverity::Critical | ViolationSeverity::High => error!(
                invariant = %violation.invariant,
                severity = %violation.severity,
                company_ids = ?violation.company_ids,
                description = %violation.description,
                "Invariant violation"
            ),
            ViolationSeverity::Medium | ViolationSeverity::Low => warn!(
                invariant = %violation.invariant,
                severity = %violation.severity,
                company_ids = ?violation.company_ids,
                description = %violation.description,
                "Invariant violation"
            ),
        }
    }
}

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

    info!("Starting Staffly billing worker");

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = create_pool(&database_url, DB_MAX_CONNECTIONS).await?;
    run_migrations(&pool).await?;
    info!("Database pool created and migrations applied");

    let billing = Arc::new(BillingService::from_env(pool)?);

    let lifecycle_cron =
        std::env::var("LIFECYCLE_CRON").unwrap_or_else(|_| DEFAULT_LIFECYCLE_CRON.to_string());
    let invariant_cron =
        std::env::var("INVARIANT_CRON").unwrap_or_else(|_| DEFAULT_INVARIANT_CRON.to_string());

    let scheduler = JobScheduler::new().await?;

    // Job 1: Lifecycle sweeps. Overlapping runs are safe; every sweep is status-guarded.
    let lifecycle = billing.lifecycle.clone();
    scheduler
        .add(Job::new_async(lifecycle_cron.as_str(), move |_uuid, _l| {
            let service = lifecycle.clone();
            Box::pin(async move {
                info!("Running lifecycle sweeps");
                let outcomes = service.run_all(OffsetDateTime::now_utc()).await;
                log_sweep_outcomes(&outcomes);
            })
        })?)
        .await?;
    info!(cron = %lifecycle_cron, "Scheduled: Lifecycle sweeps");

    // Job 2: Invariant checks
    let invariants = billing.invariants.clone();
    scheduler
        .add(Job::new_async(invariant_cron.as_str(), move |_uuid, _l| {
            let checker = invariants.clone();
            Box::pin(async move {
                info!("Running billing invariant checks");
                match checker.run_all_checks().await {
                    Ok(summary) => log_invariant_summary(&summary),
                    Err(e) => error!(error = %e, "Billing invariant checks failed"),
                }
            })
        })?)
        .await?;
    info!(cron = %invariant_cron, "Scheduled: Billing invariant checks");

    // Run the sweeps once at startup so a restart never delays due transitions
    log_sweep_outcomes(&billing.lifecycle.run_all(OffsetDateTime::now_utc()).await);

    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("Staffly billing worker started with 2 scheduled jobs");

    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
