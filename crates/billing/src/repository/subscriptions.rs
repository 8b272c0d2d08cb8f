//! Subscription persistence
//!
//! Writes that race with other writers are guarded on the current status or pending
//! field so that re-running them is a no-op.

use sqlx::PgConnection;
use staffly_shared::BillingCycle;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::models::Subscription;

const SUBSCRIPTION_COLUMNS: &str = r#"
    id, company_id, plan_id, pending_plan_id, status, max_seats, pending_max_seats,
    current_period_start, current_period_end, trial_ends_at, billing_cycle, auto_renew,
    cancelled_at, created_at, updated_at
"#;

/// Fields for the trial row created at company registration
#[derive(Debug, Clone)]
pub struct NewTrialSubscription {
    pub company_id: Uuid,
    pub plan_id: Uuid,
    pub max_seats: i32,
    pub billing_cycle: BillingCycle,
    pub starts_at: OffsetDateTime,
    pub trial_ends_at: OffsetDateTime,
}

pub async fn find_by_company(
    conn: &mut PgConnection,
    company_id: Uuid,
) -> BillingResult<Option<Subscription>> {
    let sub = sqlx::query_as::<_, Subscription>(&format!(
        "SELECT {} FROM subscriptions WHERE company_id = $1",
        SUBSCRIPTION_COLUMNS
    ))
    .bind(company_id)
    .fetch_optional(conn)
    .await?;

    Ok(sub)
}

/// Lock the company's subscription row until the surrounding transaction ends
pub async fn find_by_company_for_update(
    conn: &mut PgConnection,
    company_id: Uuid,
) -> BillingResult<Option<Subscription>> {
    let sub = sqlx::query_as::<_, Subscription>(&format!(
        "SELECT {} FROM subscriptions WHERE company_id = $1 FOR UPDATE",
        SUBSCRIPTION_COLUMNS
    ))
    .bind(company_id)
    .fetch_optional(conn)
    .await?;

    Ok(sub)
}

pub async fn find_for_update(
    conn: &mut PgConnection,
    subscription_id: Uuid,
) -> BillingResult<Option<Subscription>> {
    let sub = sqlx::query_as::<_, Subscription>(&format!(
        "SELECT {} FROM subscriptions WHERE id = $1 FOR UPDATE",
        SUBSCRIPTION_COLUMNS
    ))
    .bind(subscription_id)
    .fetch_optional(conn)
    .await?;

    Ok(sub)
}

/// Insert the trial row. Returns `None` if the company already has a subscription.
pub async fn insert_trial(
    conn: &mut PgConnection,
    new: &NewTrialSubscription,
) -> BillingResult<Option<Subscription>> {
    let sub = sqlx::query_as::<_, Subscription>(&format!(
        r#"
        INSERT INTO subscriptions
            (company_id, plan_id, status, max_seats, current_period_start, current_period_end,
             trial_ends_at, billing_cycle, auto_renew)
        VALUES ($1, $2, 'trial', $3, $4, $5, $5, $6, TRUE)
        ON CONFLICT (company_id) DO NOTHING
        RETURNING {}
        "#,
        SUBSCRIPTION_COLUMNS
    ))
    .bind(new.company_id)
    .bind(new.plan_id)
    .bind(new.max_seats)
    .bind(new.starts_at)
    .bind(new.trial_ends_at)
    .bind(new.billing_cycle)
    .fetch_optional(conn)
    .await?;

    Ok(sub)
}

/// Persist every mutable field of a locked subscription
pub async fn save(conn: &mut PgConnection, sub: &Subscription) -> BillingResult<()> {
    sqlx::query(
        r#"
        UPDATE subscriptions SET
            plan_id = $2,
            pending_plan_id = $3,
            status = $4,
            max_seats = $5,
            pending_max_seats = $6,
            current_period_start = $7,
            current_period_end = $8,
            trial_ends_at = $9,
            billing_cycle = $10,
            auto_renew = $11,
            cancelled_at = $12,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(sub.id)
    .bind(sub.plan_id)
    .bind(sub.pending_plan_id)
    .bind(sub.status)
    .bind(sub.max_seats)
    .bind(sub.pending_max_seats)
    .bind(sub.current_period_start)
    .bind(sub.current_period_end)
    .bind(sub.trial_ends_at)
    .bind(sub.billing_cycle)
    .bind(sub.auto_renew)
    .bind(sub.cancelled_at)
    .execute(conn)
    .await?;

    Ok(())
}

pub async fn set_pending_change(
    conn: &mut PgConnection,
    subscription_id: Uuid,
    pending_plan_id: Option<Uuid>,
    pending_max_seats: Option<i32>,
) -> BillingResult<()> {
    sqlx::query(
        r#"
        UPDATE subscriptions
        SET pending_plan_id = $2, pending_max_seats = $3, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(subscription_id)
    .bind(pending_plan_id)
    .bind(pending_max_seats)
    .execute(conn)
    .await?;

    Ok(())
}

/// `active`/`trial` → `cancelled`, clearing any pending change.
/// Returns false if the status had already moved on.
pub async fn mark_cancelled(
    conn: &mut PgConnection,
    subscription_id: Uuid,
    now: OffsetDateTime,
) -> BillingResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE subscriptions
        SET status = 'cancelled',
            auto_renew = FALSE,
            cancelled_at = $2,
            pending_plan_id = NULL,
            pending_max_seats = NULL,
            updated_at = NOW()
        WHERE id = $1 AND status IN ('active', 'trial')
        "#,
    )
    .bind(subscription_id)
    .bind(now)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

// =============================================================================
// Lifecycle sweeps
// =============================================================================

/// `trial` whose trial has ended → `expired`. Expiry drops any pending change.
pub async fn expire_ended_trials(conn: &mut PgConnection, now: OffsetDateTime) -> BillingResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE subscriptions
        SET status = 'expired',
            pending_plan_id = NULL,
            pending_max_seats = NULL,
            updated_at = NOW()
        WHERE status = 'trial'
          AND trial_ends_at IS NOT NULL
          AND trial_ends_at <= $1
        "#,
    )
    .bind(now)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

/// `cancelled` past the paid period → `expired`
pub async fn expire_ended_cancellations(
    conn: &mut PgConnection,
    now: OffsetDateTime,
) -> BillingResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE subscriptions
        SET status = 'expired',
            pending_plan_id = NULL,
            pending_max_seats = NULL,
            updated_at = NOW()
        WHERE status = 'cancelled'
          AND current_period_end <= $1
        "#,
    )
    .bind(now)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

/// `active` past the paid period → `past_due` (grace period begins)
pub async fn mark_overdue_past_due(conn: &mut PgConnection, now: OffsetDateTime) -> BillingResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE subscriptions
        SET status = 'past_due', updated_at = NOW()
        WHERE status = 'active'
          AND current_period_end <= $1
        "#,
    )
    .bind(now)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

/// `past_due` whose grace period ended → `expired`, dropping any pending change
pub async fn expire_past_grace(
    conn: &mut PgConnection,
    now: OffsetDateTime,
    grace_days: i64,
) -> BillingResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE subscriptions
        SET status = 'expired',
            pending_plan_id = NULL,
            pending_max_seats = NULL,
            updated_at = NOW()
        WHERE status = 'past_due'
          AND current_period_end + make_interval(days => $2::INT) <= $1
        "#,
    )
    .bind(now)
    .bind(grace_days)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

/// Subscriptions whose deferred change is due
pub async fn list_due_pending_changes(
    conn: &mut PgConnection,
    now: OffsetDateTime,
    limit: i64,
) -> BillingResult<Vec<Uuid>> {
    let ids: Vec<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT id
        FROM subscriptions
        WHERE (pending_max_seats IS NOT NULL OR pending_plan_id IS NOT NULL)
          AND current_period_end <= $1
          AND status IN ('active', 'past_due')
        ORDER BY current_period_end
        LIMIT $2
        "#,
    )
    .bind(now)
    .bind(limit)
    .fetch_all(conn)
    .await?;

    Ok(ids.into_iter().map(|(id,)| id).collect())
}

/// Copy the pending change into the live fields and clear it.
/// Guarded on the pending fields still holding the values read into `sub`.
pub async fn apply_pending_change(
    conn: &mut PgConnection,
    sub: &Subscription,
    plan_id: Uuid,
    max_seats: i32,
) -> BillingResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE subscriptions
        SET plan_id = $2,
            max_seats = $3,
            pending_plan_id = NULL,
            pending_max_seats = NULL,
            updated_at = NOW()
        WHERE id = $1
          AND pending_plan_id IS NOT DISTINCT FROM $4
          AND pending_max_seats IS NOT DISTINCT FROM $5
          AND (pending_plan_id IS NOT NULL OR pending_max_seats IS NOT NULL)
        "#,
    )
    .bind(sub.id)
    .bind(plan_id)
    .bind(max_seats)
    .bind(sub.pending_plan_id)
    .bind(sub.pending_max_seats)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}
