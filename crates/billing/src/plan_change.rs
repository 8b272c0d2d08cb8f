//! Trial start and deferred plan downgrades

use serde::Serialize;
use sqlx::PgPool;
use staffly_shared::{BillingCycle, SubscriptionStatus};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::config::BillingConfig;
use crate::employees::EmployeeCounter;
use crate::error::{BillingError, BillingResult};
use crate::models::{Plan, Subscription};
use crate::repository::subscriptions::NewTrialSubscription;
use crate::repository::{plans, subscriptions};

/// Downgrade recorded for the next renewal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledDowngrade {
    pub subscription_id: Uuid,
    pub pending_plan_id: Uuid,
    pub pending_max_seats: Option<i32>,
    #[serde(with = "time::serde::rfc3339")]
    pub effective_date: OffsetDateTime,
}

/// Seat count a downgrade leaves the company on, checked against the target plan
pub fn downgrade_seats(
    sub: &Subscription,
    current_plan: &Plan,
    target_plan: &Plan,
    requested_seats: Option<i32>,
    active_employees: i64,
) -> BillingResult<i32> {
    if !target_plan.is_downgrade_from(current_plan) {
        return Err(BillingError::NotADowngrade);
    }

    let seats = requested_seats.unwrap_or_else(|| sub.renewal_terms().seats);
    if seats < 1 {
        return Err(BillingError::InvalidSeatCount(seats));
    }
    target_plan.check_seat_cap(seats)?;
    if i64::from(seats) < active_employees {
        return Err(BillingError::SeatsBelowActiveEmployees {
            requested: seats,
            active: active_employees,
        });
    }
    Ok(seats)
}

#[derive(Clone)]
pub struct PlanChangeService {
    pool: PgPool,
    config: Arc<BillingConfig>,
    employees: Arc<dyn EmployeeCounter>,
}

impl PlanChangeService {
    pub fn new(
        pool: PgPool,
        config: Arc<BillingConfig>,
        employees: Arc<dyn EmployeeCounter>,
    ) -> Self {
        Self {
            pool,
            config,
            employees,
        }
    }

    /// Create the company's subscription row in `trial` at registration
    pub async fn start_trial(
        &self,
        company_id: Uuid,
        plan_id: Uuid,
        seats: i32,
    ) -> BillingResult<Subscription> {
        if seats < 1 {
            return Err(BillingError::InvalidSeatCount(seats));
        }

        let mut conn = self.pool.acquire().await?;
        let plan = plans::find(&mut conn, plan_id)
            .await?
            .ok_or_else(|| BillingError::PlanNotFound(plan_id.to_string()))?;
        plan.check_seat_cap(seats)?;

        let now = OffsetDateTime::now_utc();
        let new = NewTrialSubscription {
            company_id,
            plan_id,
            max_seats: seats,
            billing_cycle: BillingCycle::Monthly,
            starts_at: now,
            trial_ends_at: now + Duration::days(self.config.trial_days),
        };

        let sub = subscriptions::insert_trial(&mut conn, &new)
            .await?
            .ok_or_else(|| {
                BillingError::InvalidInput(format!(
                    "company {} already has a subscription",
                    company_id
                ))
            })?;

        tracing::info!(
            company_id = %company_id,
            subscription_id = %sub.id,
            plan = %plan.name,
            trial_ends_at = %new.trial_ends_at,
            "Started trial"
        );

        Ok(sub)
    }

    /// Record a move to a lower tier, taking effect when the current period ends.
    /// `seats` defaults to the seat count the next renewal would bill for.
    pub async fn schedule_downgrade(
        &self,
        company_id: Uuid,
        target_plan_id: Uuid,
        seats: Option<i32>,
    ) -> BillingResult<ScheduledDowngrade> {
        let mut tx = self.pool.begin().await?;

        let sub = subscriptions::find_by_company_for_update(&mut tx, company_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(company_id.to_string()))?;
        if !matches!(
            sub.status,
            SubscriptionStatus::Active | SubscriptionStatus::PastDue
        ) {
            return Err(BillingError::InvalidSubscriptionState {
                status: sub.status,
                operation: "schedule a downgrade",
            });
        }

        let current_plan = plans::find(&mut tx, sub.plan_id)
            .await?
            .ok_or_else(|| BillingError::PlanNotFound(sub.plan_id.to_string()))?;
        let target_plan = plans::find(&mut tx, target_plan_id)
            .await?
            .ok_or_else(|| BillingError::PlanNotFound(target_plan_id.to_string()))?;
        if !target_plan.is_active {
            return Err(BillingError::InvalidInput(format!(
                "plan {} is not available for purchase",
                target_plan.name
            )));
        }

        let active = self.employees.count_active_by_company(company_id).await?;
        let target_seats = downgrade_seats(&sub, &current_plan, &target_plan, seats, active)?;
        let pending_max_seats = (target_seats != sub.max_seats).then_some(target_seats);

        subscriptions::set_pending_change(&mut tx, sub.id, Some(target_plan.id), pending_max_seats)
            .await?;
        tx.commit().await?;

        tracing::info!(
            company_id = %company_id,
            subscription_id = %sub.id,
            from_plan = %current_plan.name,
            to_plan = %target_plan.name,
            pending_max_seats = ?pending_max_seats,
            effective_date = %sub.effective_change_date(),
            "Scheduled plan downgrade"
        );

        Ok(ScheduledDowngrade {
            subscription_id: sub.id,
            pending_plan_id: target_plan.id,
            pending_max_seats,
            effective_date: sub.effective_change_date(),
        })
    }

    /// Drop any scheduled plan or seat reduction. A no-op if nothing is pending.
    pub async fn cancel_pending_change(&self, company_id: Uuid) -> BillingResult<Subscription> {
        let mut tx = self.pool.begin().await?;

        let mut sub = subscriptions::find_by_company_for_update(&mut tx, company_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(company_id.to_string()))?;
        if !sub.has_pending_change() {
            return Ok(sub);
        }

        subscriptions::set_pending_change(&mut tx, sub.id, None, None).await?;
        tx.commit().await?;

        tracing::info!(
            company_id = %company_id,
            subscription_id = %sub.id,
            pending_plan_id = ?sub.pending_plan_id,
            pending_max_seats = ?sub.pending_max_seats,
            "Cancelled pending change"
        );

        sub.pending_plan_id = None;
        sub.pending_max_seats = None;
        Ok(sub)
    }
}
