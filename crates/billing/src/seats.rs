//! Mid-cycle seat changes
//!
//! Increases are charged now, prorated over the rest of the period.
//! Decreases are free and wait for the period to end.

use serde::Serialize;
use sqlx::PgPool;
use staffly_shared::{InvoiceKind, SubscriptionStatus};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::checkout::{invoice_description, issue_invoice, InvoiceDraft};
use crate::config::BillingConfig;
use crate::employees::EmployeeCounter;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{expire_best_effort, CreateInvoiceRequest, PaymentGateway};
use crate::models::invoice::external_id;
use crate::models::{Invoice, Plan, PlanSnapshot, Subscription};
use crate::proration::{days_remaining, prorated_amount, prorated_invoice_lifetime, ProrationInput};
use crate::repository::{invoices, plans, subscriptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatDirection {
    Increase,
    Decrease,
}

/// Result of a seat change request
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SeatChangeOutcome {
    /// Prorated invoice awaiting payment
    Invoice(Box<Invoice>),
    /// Reduction recorded; applies on `effective_date`
    Scheduled {
        pending_max_seats: i32,
        #[serde(with = "time::serde::rfc3339")]
        effective_date: OffsetDateTime,
    },
    /// Trial seat count changed in place; trials are never billed
    Applied { max_seats: i32 },
}

/// Validate a seat change against the subscription and its plan.
/// An increase must also fit the plan a scheduled downgrade is waiting on.
pub fn route_seat_change(
    sub: &Subscription,
    plan: &Plan,
    pending_plan: Option<&Plan>,
    new_seats: i32,
) -> BillingResult<SeatDirection> {
    if new_seats < 1 {
        return Err(BillingError::InvalidSeatCount(new_seats));
    }
    if new_seats == sub.max_seats {
        return Err(BillingError::SameAsCurrentSeats);
    }
    plan.check_seat_cap(new_seats)?;

    if new_seats > sub.max_seats {
        match sub.status {
            SubscriptionStatus::Active | SubscriptionStatus::Trial => {}
            SubscriptionStatus::PastDue => return Err(BillingError::CannotUpgradeDuringGracePeriod),
            status => {
                return Err(BillingError::InvalidSubscriptionState {
                    status,
                    operation: "add seats",
                })
            }
        }
        if let Some(pending) = pending_plan {
            pending.check_seat_cap(new_seats)?;
        }
        Ok(SeatDirection::Increase)
    } else {
        match sub.status {
            SubscriptionStatus::Active | SubscriptionStatus::Trial | SubscriptionStatus::PastDue => {}
            status => {
                return Err(BillingError::InvalidSubscriptionState {
                    status,
                    operation: "reduce seats",
                })
            }
        }
        Ok(SeatDirection::Decrease)
    }
}

/// Routes seat changes to a prorated charge or a deferred reduction
#[derive(Clone)]
pub struct SeatChangeService {
    pool: PgPool,
    config: Arc<BillingConfig>,
    gateway: Arc<dyn PaymentGateway>,
    employees: Arc<dyn EmployeeCounter>,
}

impl SeatChangeService {
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

    pub async fn change_seats(
        &self,
        company_id: Uuid,
        new_seats: i32,
        payer_email: &str,
    ) -> BillingResult<SeatChangeOutcome> {
        let now = OffsetDateTime::now_utc();
        let mut tx = self.pool.begin().await?;

        let mut sub = subscriptions::find_by_company_for_update(&mut tx, company_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(company_id.to_string()))?;
        let plan = plans::find(&mut tx, sub.plan_id)
            .await?
            .ok_or_else(|| BillingError::PlanNotFound(sub.plan_id.to_string()))?;

        let pending_plan = match sub.pending_plan_id {
            Some(id) => Some(
                plans::find(&mut tx, id)
                    .await?
                    .ok_or_else(|| BillingError::PlanNotFound(id.to_string()))?,
            ),
            None => None,
        };

        let direction = route_seat_change(&sub, &plan, pending_plan.as_ref(), new_seats)?;

        if direction == SeatDirection::Decrease {
            let active = self.employees.count_active_by_company(company_id).await?;
            if i64::from(new_seats) < active {
                return Err(BillingError::SeatsBelowActiveEmployees {
                    requested: new_seats,
                    active,
                });
            }
        }

        if sub.status == SubscriptionStatus::Trial {
            sub.max_seats = new_seats;
            sub.pending_max_seats = None;
            subscriptions::save(&mut tx, &sub).await?;
            tx.commit().await?;

            tracing::info!(
                company_id = %company_id,
                max_seats = new_seats,
                "Changed trial seat count"
            );
            return Ok(SeatChangeOutcome::Applied {
                max_seats: new_seats,
            });
        }

        match direction {
            SeatDirection::Decrease => {
                subscriptions::set_pending_change(
                    &mut tx,
                    sub.id,
                    sub.pending_plan_id,
                    Some(new_seats),
                )
                .await?;
                tx.commit().await?;

                tracing::info!(
                    company_id = %company_id,
                    subscription_id = %sub.id,
                    current_seats = sub.max_seats,
                    pending_max_seats = new_seats,
                    effective_date = %sub.effective_change_date(),
                    "Scheduled seat reduction"
                );

                Ok(SeatChangeOutcome::Scheduled {
                    pending_max_seats: new_seats,
                    effective_date: sub.effective_change_date(),
                })
            }
            SeatDirection::Increase => {
                let invoice = self
                    .issue_seat_increase(&mut tx, &sub, &plan, new_seats, payer_email, now)
                    .await?;

                if let Err(e) = tx.commit().await {
                    expire_best_effort(self.gateway.as_ref(), &invoice.gateway_invoice_id).await;
                    return Err(e.into());
                }

                tracing::info!(
                    company_id = %company_id,
                    subscription_id = %sub.id,
                    invoice_id = %invoice.id,
                    current_seats = sub.max_seats,
                    new_seats = new_seats,
                    amount = %invoice.amount,
                    "Created prorated seat invoice"
                );

                Ok(SeatChangeOutcome::Invoice(Box::new(invoice)))
            }
        }
    }

    async fn issue_seat_increase(
        &self,
        conn: &mut sqlx::PgConnection,
        sub: &Subscription,
        plan: &Plan,
        new_seats: i32,
        payer_email: &str,
        now: OffsetDateTime,
    ) -> BillingResult<Invoice> {
        if invoices::has_pending(conn, sub.id).await? {
            return Err(BillingError::PendingInvoiceExists);
        }

        let days = days_remaining(sub.current_period_end, now, sub.billing_cycle);
        if days == 0 {
            return Err(BillingError::InvalidInput(
                "no days remain in the current period; renew before adding seats".to_string(),
            ));
        }

        let amount = prorated_amount(ProrationInput {
            price_per_seat: plan.price_per_seat,
            current_seats: sub.max_seats,
            new_seats,
            days_remaining: days,
            total_days: sub.billing_cycle.total_days(),
        })?;

        // An immediate increase supersedes a scheduled reduction
        if sub.pending_max_seats.is_some() {
            subscriptions::set_pending_change(conn, sub.id, sub.pending_plan_id, None).await?;
        }

        let kind = InvoiceKind::SeatIncrease;
        let request = CreateInvoiceRequest {
            external_id: external_id(kind, sub.id, now),
            amount,
            payer_email: payer_email.to_string(),
            description: format!(
                "{} (+{} prorated for {} days)",
                invoice_description(&plan.name, new_seats, sub.billing_cycle),
                new_seats - sub.max_seats,
                days
            ),
            currency: self.config.currency.clone(),
            duration_seconds: prorated_invoice_lifetime(sub.current_period_end, now)
                .whole_seconds(),
            redirect_urls: self.config.redirect_urls(),
        };
        let draft = InvoiceDraft {
            subscription_id: sub.id,
            company_id: sub.company_id,
            kind,
            amount,
            snapshot: PlanSnapshot::of(plan, new_seats, sub.billing_cycle),
            period_start: now,
            period_end: sub.current_period_end,
        };

        issue_invoice(
            conn,
            self.gateway.as_ref(),
            &self.config.currency,
            request,
            draft,
        )
        .await
    }
}
