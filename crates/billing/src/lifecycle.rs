//! Time-driven lifecycle sweeps
//!
//! Each sweep selects rows by current status and date, so running it twice, or two
//! runs overlapping, ends in the same state as one run.

use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::BillingConfig;
use crate::employees::EmployeeCounter;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{expire_best_effort, PaymentGateway};
use crate::models::PendingResolution;
use crate::repository::{invoices, plans, subscriptions};

/// Subscriptions examined per pending-change sweep
const PENDING_CHANGE_BATCH: i64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleJob {
    ExpiredTrials,
    PastDueSubscriptions,
    StaleInvoices,
    PendingDowngrades,
}

impl std::fmt::Display for LifecycleJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleJob::ExpiredTrials => write!(f, "expired_trials"),
            LifecycleJob::PastDueSubscriptions => write!(f, "past_due_subscriptions"),
            LifecycleJob::StaleInvoices => write!(f, "stale_invoices"),
            LifecycleJob::PendingDowngrades => write!(f, "pending_downgrades"),
        }
    }
}

/// Result of one sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepOutcome {
    pub job: LifecycleJob,
    /// Rows moved to their next state
    pub transitioned: u64,
    /// Rows selected but left alone (already applied, not yet due)
    pub skipped: u64,
    pub errors: Vec<String>,
}

impl SweepOutcome {
    pub fn new(job: LifecycleJob) -> Self {
        Self {
            job,
            transitioned: 0,
            skipped: 0,
            errors: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    fn failed(job: LifecycleJob, error: BillingError) -> Self {
        let mut outcome = Self::new(job);
        outcome.errors.push(error.to_string());
        outcome
    }
}

enum PendingChangeResult {
    Applied,
    Skipped,
    Blocked(String),
}

#[derive(Clone)]
pub struct LifecycleService {
    pool: PgPool,
    config: Arc<BillingConfig>,
    gateway: Arc<dyn PaymentGateway>,
    employees: Arc<dyn EmployeeCounter>,
}

impl LifecycleService {
    pub fn new(
        pool: PgPool,
        config: Arc<BillingConfig>,
        gateway: Arc<dyn PaymentGateway>,
        employees: Arc<dyn EmployeeCounter>,
    ) -> Self {
        Self {
            pool,
            config,
            gateway,
            employees,
        }
    }

    /// Ended trials and cancellations past their paid period → `expired`
    pub async fn process_expired_trials(&self, now: OffsetDateTime) -> BillingResult<SweepOutcome> {
        let mut conn = self.pool.acquire().await?;
        let trials = subscriptions::expire_ended_trials(&mut conn, now).await?;
        let cancellations = subscriptions::expire_ended_cancellations(&mut conn, now).await?;

        if trials + cancellations > 0 {
            tracing::info!(
                trials = trials,
                cancellations = cancellations,
                "Expired ended trials and cancellations"
            );
        }

        let mut outcome = SweepOutcome::new(LifecycleJob::ExpiredTrials);
        outcome.transitioned = trials + cancellations;
        Ok(outcome)
    }

    /// `active` past period end → `past_due`; `past_due` past the grace period → `expired`
    pub async fn process_past_due_subscriptions(
        &self,
        now: OffsetDateTime,
    ) -> BillingResult<SweepOutcome> {
        let mut conn = self.pool.acquire().await?;
        let past_due = subscriptions::mark_overdue_past_due(&mut conn, now).await?;
        let expired =
            subscriptions::expire_past_grace(&mut conn, now, self.config.grace_period_days).await?;

        if past_due + expired > 0 {
            tracing::info!(
                past_due = past_due,
                expired = expired,
                grace_period_days = self.config.grace_period_days,
                "Processed overdue subscriptions"
            );
        }

        let mut outcome = SweepOutcome::new(LifecycleJob::PastDueSubscriptions);
        outcome.transitioned = past_due + expired;
        Ok(outcome)
    }

    /// Pending invoices older than the invoice expiry window → `expired`.
    /// The gateway side is expired afterwards, best-effort.
    pub async fn expire_stale_invoices(&self, now: OffsetDateTime) -> BillingResult<SweepOutcome> {
        let cutoff = now - self.config.invoice_expiry;
        let mut conn = self.pool.acquire().await?;
        let expired = invoices::expire_stale(&mut conn, cutoff, now).await?;
        drop(conn);

        let mut outcome = SweepOutcome::new(LifecycleJob::StaleInvoices);
        outcome.transitioned = expired.len() as u64;

        for invoice in &expired {
            tracing::info!(
                invoice_id = %invoice.id,
                gateway_invoice_id = %invoice.gateway_invoice_id,
                "Expired stale invoice"
            );
            expire_best_effort(self.gateway.as_ref(), &invoice.gateway_invoice_id).await;
        }

        Ok(outcome)
    }

    /// Apply deferred seat reductions and plan downgrades whose period has ended.
    /// Seats are raised to the active employee count at the moment of application.
    pub async fn apply_pending_downgrades(
        &self,
        now: OffsetDateTime,
    ) -> BillingResult<SweepOutcome> {
        let ids = {
            let mut conn = self.pool.acquire().await?;
            subscriptions::list_due_pending_changes(&mut conn, now, PENDING_CHANGE_BATCH).await?
        };

        let mut outcome = SweepOutcome::new(LifecycleJob::PendingDowngrades);
        for subscription_id in ids {
            match self.apply_pending_change(subscription_id, now).await {
                Ok(PendingChangeResult::Applied) => outcome.transitioned += 1,
                Ok(PendingChangeResult::Skipped) => outcome.skipped += 1,
                Ok(PendingChangeResult::Blocked(reason)) => {
                    tracing::warn!(
                        subscription_id = %subscription_id,
                        reason = %reason,
                        "Pending change blocked"
                    );
                    outcome.errors.push(format!("{}: {}", subscription_id, reason));
                }
                Err(e) => {
                    tracing::error!(
                        subscription_id = %subscription_id,
                        error = %e,
                        "Failed to apply pending change"
                    );
                    outcome.errors.push(format!("{}: {}", subscription_id, e));
                }
            }
        }

        Ok(outcome)
    }

    async fn apply_pending_change(
        &self,
        subscription_id: Uuid,
        now: OffsetDateTime,
    ) -> BillingResult<PendingChangeResult> {
        let mut tx = self.pool.begin().await?;

        let Some(sub) = subscriptions::find_for_update(&mut tx, subscription_id).await? else {
            return Ok(PendingChangeResult::Skipped);
        };
        let target_plan_id = sub.pending_plan_id.unwrap_or(sub.plan_id);
        let target_plan = plans::find(&mut tx, target_plan_id)
            .await?
            .ok_or_else(|| BillingError::PlanNotFound(target_plan_id.to_string()))?;
        let active = self
            .employees
            .count_active_by_company(sub.company_id)
            .await?;

        let result = match sub.resolve_pending_change(&target_plan, active, now) {
            PendingResolution::Nothing | PendingResolution::NotDue => PendingChangeResult::Skipped,
            PendingResolution::Blocked { reason } => PendingChangeResult::Blocked(reason),
            PendingResolution::Apply {
                plan_id,
                max_seats,
                raised_to_active,
            } => {
                if subscriptions::apply_pending_change(&mut tx, &sub, plan_id, max_seats).await? {
                    tracing::info!(
                        subscription_id = %sub.id,
                        company_id = %sub.company_id,
                        from_plan_id = %sub.plan_id,
                        to_plan_id = %plan_id,
                        from_seats = sub.max_seats,
                        to_seats = max_seats,
                        raised_to_active = raised_to_active,
                        "Applied pending change"
                    );
                    PendingChangeResult::Applied
                } else {
                    PendingChangeResult::Skipped
                }
            }
        };

        tx.commit().await?;
        Ok(result)
    }

    /// Run every sweep in order. A failing sweep does not stop the others.
    pub async fn run_all(&self, now: OffsetDateTime) -> Vec<SweepOutcome> {
        let mut outcomes = Vec::with_capacity(4);

        outcomes.push(
            self.process_expired_trials(now)
                .await
                .unwrap_or_else(|e| SweepOutcome::failed(LifecycleJob::ExpiredTrials, e)),
        );
        outcomes.push(
            self.process_past_due_subscriptions(now)
                .await
                .unwrap_or_else(|e| SweepOutcome::failed(LifecycleJob::PastDueSubscriptions, e)),
        );
        outcomes.push(
            self.expire_stale_invoices(now)
                .await
                .unwrap_or_else(|e| SweepOutcome::failed(LifecycleJob::StaleInvoices, e)),
        );
        outcomes.push(
            self.apply_pending_downgrades(now)
                .await
                .unwrap_or_else(|e| SweepOutcome::failed(LifecycleJob::PendingDowngrades, e)),
        );

        outcomes
    }
}
