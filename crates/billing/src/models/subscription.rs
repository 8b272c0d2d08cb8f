//! Company subscriptions

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use staffly_shared::{BillingCycle, SubscriptionStatus};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use super::invoice::Invoice;
use super::plan::Plan;

/// One row per company
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub company_id: Uuid,
    pub plan_id: Uuid,
    /// Plan downgrade awaiting the end of the current period
    pub pending_plan_id: Option<Uuid>,
    pub status: SubscriptionStatus,
    pub max_seats: i32,
    /// Seat reduction awaiting the end of the current period
    pub pending_max_seats: Option<i32>,
    pub current_period_start: OffsetDateTime,
    pub current_period_end: OffsetDateTime,
    pub trial_ends_at: Option<OffsetDateTime>,
    pub billing_cycle: BillingCycle,
    pub auto_renew: bool,
    pub cancelled_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Plan and seats the next renewal should bill for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RenewalTerms {
    pub plan_id: Uuid,
    pub seats: i32,
    pub billing_cycle: BillingCycle,
}

/// What applying the deferred plan/seat change would do right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingResolution {
    /// No pending change recorded (already applied or never scheduled)
    Nothing,
    /// The current period has not ended yet
    NotDue,
    Apply {
        plan_id: Uuid,
        max_seats: i32,
        /// The requested seat count was raised to cover active employees
        raised_to_active: bool,
    },
    /// The change cannot take effect without breaking the seat invariant
    Blocked { reason: String },
}

impl Subscription {
    pub fn has_pending_change(&self) -> bool {
        self.pending_plan_id.is_some() || self.pending_max_seats.is_some()
    }

    /// Date on which a deferred change takes effect
    pub fn effective_change_date(&self) -> OffsetDateTime {
        self.current_period_end
    }

    pub fn renewal_terms(&self) -> RenewalTerms {
        RenewalTerms {
            plan_id: self.pending_plan_id.unwrap_or(self.plan_id),
            seats: self.pending_max_seats.unwrap_or(self.max_seats),
            billing_cycle: self.billing_cycle,
        }
    }

    /// Whether the company may use the product right now
    pub fn has_access(&self, now: OffsetDateTime, grace_period: Duration) -> bool {
        match self.status {
            SubscriptionStatus::Trial => self.trial_ends_at.is_some_and(|ends| now < ends),
            SubscriptionStatus::Active => true,
            SubscriptionStatus::PastDue => now < self.current_period_end + grace_period,
            SubscriptionStatus::Cancelled => now < self.current_period_end,
            SubscriptionStatus::Expired => false,
        }
    }

    /// When access ends if nothing else happens
    pub fn access_ends_at(&self, grace_period: Duration) -> Option<OffsetDateTime> {
        match self.status {
            SubscriptionStatus::Trial => self.trial_ends_at,
            SubscriptionStatus::Active | SubscriptionStatus::Cancelled => {
                Some(self.current_period_end)
            }
            SubscriptionStatus::PastDue => Some(self.current_period_end + grace_period),
            SubscriptionStatus::Expired => None,
        }
    }

    /// Apply the effects of a paid invoice.
    ///
    /// Prorated invoices only raise the seat count; the period is untouched.
    /// Any other invoice replaces plan, seats, cycle and period with the invoice terms.
    /// Seats never drop below `active_employees`.
    pub fn apply_paid_invoice(&mut self, invoice: &Invoice, active_employees: i64) {
        let active = i32::try_from(active_employees).unwrap_or(i32::MAX);
        let seats = invoice.snapshot.seat_count.max(active);

        if invoice.is_prorated {
            self.max_seats = self.max_seats.max(seats);
            self.pending_max_seats = None;
            return;
        }

        self.plan_id = invoice.snapshot.plan_id;
        self.max_seats = seats;
        self.billing_cycle = invoice.snapshot.billing_cycle;
        self.current_period_start = invoice.period_start;
        self.current_period_end = invoice.period_end;
        self.pending_plan_id = None;
        self.pending_max_seats = None;
        self.trial_ends_at = None;
        self.cancelled_at = None;
        self.auto_renew = true;
        self.status = SubscriptionStatus::Active;
    }

    /// Decide how the deferred change applies. `target_plan` must be the pending plan
    /// if one is set, otherwise the current plan.
    pub fn resolve_pending_change(
        &self,
        target_plan: &Plan,
        active_employees: i64,
        now: OffsetDateTime,
    ) -> PendingResolution {
        if !self.has_pending_change() {
            return PendingResolution::Nothing;
        }
        if now < self.current_period_end {
            return PendingResolution::NotDue;
        }

        let plan_id = self.pending_plan_id.unwrap_or(self.plan_id);
        if target_plan.id != plan_id {
            return PendingResolution::Blocked {
                reason: format!(
                    "target plan {} does not match pending plan {}",
                    target_plan.id, plan_id
                ),
            };
        }

        let requested = self.pending_max_seats.unwrap_or(self.max_seats);
        let raised_to_active = i64::from(requested) < active_employees;
        let seats = if raised_to_active {
            match i32::try_from(active_employees) {
                Ok(active) => active,
                Err(_) => {
                    return PendingResolution::Blocked {
                        reason: format!("active employee count {} out of range", active_employees),
                    }
                }
            }
        } else {
            requested
        };

        if !target_plan.admits_seats(i64::from(seats)) {
            return PendingResolution::Blocked {
                reason: format!(
                    "plan {} allows {:?} seats but {} are required ({} active employees)",
                    target_plan.name, target_plan.max_seats, seats, active_employees
                ),
            };
        }

        PendingResolution::Apply {
            plan_id,
            max_seats: seats,
            raised_to_active,
        }
    }
}
