//! Billing consistency checks
//!
//! Read-only SQL checks over subscriptions and invoices, run on a schedule and after
//! incidents. A violation carries enough context to find the offending rows.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    pub invariant: String,
    pub company_ids: Vec<Uuid>,
    pub description: String,
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Money or access is wrong right now
    Critical,
    High,
    Medium,
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct MultiplePendingRow {
    subscription_id: Uuid,
    company_id: Uuid,
    pending_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct SeatsBelowActiveRow {
    company_id: Uuid,
    status: String,
    max_seats: i32,
    active_employees: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct UnappliedSeatIncreaseRow {
    invoice_id: Uuid,
    company_id: Uuid,
    seat_count: i32,
    max_seats: i32,
}

#[derive(Debug, sqlx::FromRow)]
struct PendingOnExpiredRow {
    company_id: Uuid,
    pending_plan_id: Option<Uuid>,
    pending_max_seats: Option<i32>,
}

#[derive(Debug, sqlx::FromRow)]
struct OverdueActiveRow {
    company_id: Uuid,
    current_period_end: OffsetDateTime,
}

#[derive(Clone)]
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_single_pending_invoice().await?);
        violations.extend(self.check_seats_cover_active_employees().await?);
        violations.extend(self.check_paid_seat_increases_applied().await?);
        violations.extend(self.check_no_pending_change_on_expired().await?);
        violations.extend(self.check_active_within_period().await?);

        let checks_run = Self::available_checks().len();
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed: checks_run - checks_failed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// At most one pending invoice per subscription
    async fn check_single_pending_invoice(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MultiplePendingRow> = sqlx::query_as(
            r#"
            SELECT subscription_id, company_id, COUNT(*) AS pending_count
            FROM invoices
            WHERE status = 'pending'
            GROUP BY subscription_id, company_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "single_pending_invoice".to_string(),
                company_ids: vec![row.company_id],
                description: format!(
                    "Subscription has {} pending invoices (expected at most 1)",
                    row.pending_count
                ),
                context: serde_json::json!({
                    "subscription_id": row.subscription_id,
                    "pending_count": row.pending_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Live subscriptions cover every active employee
    async fn check_seats_cover_active_employees(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<SeatsBelowActiveRow> = sqlx::query_as(
            r#"
            SELECT s.company_id, s.status, s.max_seats, COUNT(e.id) AS active_employees
            FROM subscriptions s
            JOIN employees e
              ON e.company_id = s.company_id
             AND e.status = 'active'
             AND e.deleted_at IS NULL
            WHERE s.status IN ('trial', 'active', 'past_due')
            GROUP BY s.id, s.company_id, s.status, s.max_seats
            HAVING COUNT(e.id) > s.max_seats
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "seats_cover_active_employees".to_string(),
                company_ids: vec![row.company_id],
                description: format!(
                    "Subscription ({}) allows {} seats but company has {} active employees",
                    row.status, row.max_seats, row.active_employees
                ),
                context: serde_json::json!({
                    "status": row.status,
                    "max_seats": row.max_seats,
                    "active_employees": row.active_employees,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// A paid seat increase for the running period is reflected in `max_seats`
    async fn check_paid_seat_increases_applied(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<UnappliedSeatIncreaseRow> = sqlx::query_as(
            r#"
            SELECT i.id AS invoice_id, i.company_id, i.seat_count, s.max_seats
            FROM invoices i
            JOIN subscriptions s ON s.id = i.subscription_id
            WHERE i.status = 'paid'
              AND i.is_prorated
              AND i.period_end = s.current_period_end
              AND s.current_period_end > NOW()
              AND s.max_seats < i.seat_count
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "paid_seat_increases_applied".to_string(),
                company_ids: vec![row.company_id],
                description: format!(
                    "Paid seat increase to {} seats but subscription allows {}",
                    row.seat_count, row.max_seats
                ),
                context: serde_json::json!({
                    "invoice_id": row.invoice_id,
                    "seat_count": row.seat_count,
                    "max_seats": row.max_seats,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Expired subscriptions carry no pending change
    async fn check_no_pending_change_on_expired(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<PendingOnExpiredRow> = sqlx::query_as(
            r#"
            SELECT company_id, pending_plan_id, pending_max_seats
            FROM subscriptions
            WHERE status = 'expired'
              AND (pending_plan_id IS NOT NULL OR pending_max_seats IS NOT NULL)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "no_pending_change_on_expired".to_string(),
                company_ids: vec![row.company_id],
                description: "Expired subscription still has a pending change".to_string(),
                context: serde_json::json!({
                    "pending_plan_id": row.pending_plan_id,
                    "pending_max_seats": row.pending_max_seats,
                }),
                severity: ViolationSeverity::Low,
            })
            .collect())
    }

    /// `active` subscriptions are inside their period (allowing a day of sweep lag)
    async fn check_active_within_period(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<OverdueActiveRow> = sqlx::query_as(
            r#"
            SELECT company_id, current_period_end
            FROM subscriptions
            WHERE status = 'active'
              AND current_period_end < NOW() - INTERVAL '1 day'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "active_within_period".to_string(),
                company_ids: vec![row.company_id],
                description: format!(
                    "Subscription is active but its period ended at {}",
                    row.current_period_end
                ),
                context: serde_json::json!({
                    "current_period_end": row.current_period_end.unix_timestamp(),
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "single_pending_invoice" => self.check_single_pending_invoice().await,
            "seats_cover_active_employees" => self.check_seats_cover_active_employees().await,
            "paid_seat_increases_applied" => self.check_paid_seat_increases_applied().await,
            "no_pending_change_on_expired" => self.check_no_pending_change_on_expired().await,
            "active_within_period" => self.check_active_within_period().await,
            _ => Ok(vec![]),
        }
    }

    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "single_pending_invoice",
            "seats_cover_active_employees",
            "paid_seat_increases_applied",
            "no_pending_change_on_expired",
            "active_within_period",
        ]
    }
}
