//! Hosted-invoice checkout
//!
//! A checkout never touches the subscription. It only issues a pending invoice;
//! the webhook applies the invoice terms once the gateway reports payment.

use serde::Deserialize;
use sqlx::{PgConnection, PgPool};
use staffly_shared::{BillingCycle, InvoiceKind, SubscriptionStatus};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::BillingConfig;
use crate::employees::EmployeeCounter;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{expire_best_effort, CreateInvoiceRequest, PaymentGateway};
use crate::models::invoice::external_id;
use crate::models::{Invoice, NewInvoice, Plan, PlanSnapshot, Subscription};
use crate::proration::full_period_amount;
use crate::repository::{invoices, plans, subscriptions};

/// Request for a full-period invoice
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub company_id: Uuid,
    pub plan_id: Uuid,
    pub seats: i32,
    #[serde(default)]
    pub billing_cycle: BillingCycle,
    pub payer_email: String,
}

/// Local invoice fields known before the gateway call
#[derive(Debug, Clone)]
pub(crate) struct InvoiceDraft {
    pub subscription_id: Uuid,
    pub company_id: Uuid,
    pub kind: InvoiceKind,
    pub amount: rust_decimal::Decimal,
    pub snapshot: PlanSnapshot,
    pub period_start: OffsetDateTime,
    pub period_end: OffsetDateTime,
}

/// Create the remote invoice, then persist the local row.
/// If the insert fails the remote invoice is expired so no payable link is orphaned.
pub(crate) async fn issue_invoice(
    conn: &mut PgConnection,
    gateway: &dyn PaymentGateway,
    currency: &str,
    request: CreateInvoiceRequest,
    draft: InvoiceDraft,
) -> BillingResult<Invoice> {
    let external_id = request.external_id.clone();
    let remote = gateway.create_invoice(request).await?;

    let new = NewInvoice {
        subscription_id: draft.subscription_id,
        company_id: draft.company_id,
        kind: draft.kind,
        amount: draft.amount,
        currency: currency.to_string(),
        snapshot: draft.snapshot,
        period_start: draft.period_start,
        period_end: draft.period_end,
        external_id,
        gateway_invoice_id: remote.id.clone(),
        invoice_url: remote.invoice_url,
        gateway_expires_at: remote.expiry_date,
    };

    match invoices::insert(conn, &new).await {
        Ok(invoice) => Ok(invoice),
        Err(e) => {
            tracing::error!(
                subscription_id = %new.subscription_id,
                gateway_invoice_id = %remote.id,
                error = %e,
                "Failed to persist invoice after gateway accepted it"
            );
            expire_best_effort(gateway, &remote.id).await;
            Err(e)
        }
    }
}

/// Classify a checkout against the current subscription.
///
/// Trial, cancelled and expired subscriptions start over. The current plan, or the
/// plan a downgrade is waiting on, renews. Anything else must be a higher tier.
pub fn classify(
    sub: &Subscription,
    current_plan: &Plan,
    target_plan: &Plan,
) -> BillingResult<InvoiceKind> {
    if sub.status.needs_new_subscription() {
        return Ok(InvoiceKind::NewSubscription);
    }
    if target_plan.id == sub.plan_id || Some(target_plan.id) == sub.pending_plan_id {
        return Ok(InvoiceKind::Renewal);
    }
    if !target_plan.is_upgrade_from(current_plan) {
        return Err(BillingError::NotAnUpgrade);
    }
    if sub.status == SubscriptionStatus::PastDue {
        return Err(BillingError::CannotUpgradeDuringGracePeriod);
    }
    Ok(InvoiceKind::Upgrade)
}

/// Period a full-period invoice pays for.
/// An early renewal queues behind the running period instead of overlapping it.
pub fn billed_period(
    kind: InvoiceKind,
    sub: &Subscription,
    cycle: BillingCycle,
    now: OffsetDateTime,
) -> (OffsetDateTime, OffsetDateTime) {
    let start = match kind {
        InvoiceKind::Renewal
            if sub.status == SubscriptionStatus::Active && now < sub.current_period_end =>
        {
            sub.current_period_end
        }
        _ => now,
    };
    (start, start + cycle.period_length())
}

/// Seat bounds for a new billing period
pub fn check_seat_request(plan: &Plan, seats: i32, active_employees: i64) -> BillingResult<()> {
    if seats < 1 {
        return Err(BillingError::InvalidSeatCount(seats));
    }
    plan.check_seat_cap(seats)?;
    if i64::from(seats) < active_employees {
        return Err(BillingError::SeatsBelowActiveEmployees {
            requested: seats,
            active: active_employees,
        });
    }
    Ok(())
}

pub(crate) fn invoice_description(plan_name: &str, seats: i32, cycle: BillingCycle) -> String {
    format!("{} plan - {} seats ({})", plan_name, seats, cycle)
}

/// Checkout service for new subscriptions, renewals and upgrades
#[derive(Clone)]
pub struct CheckoutService {
    pool: PgPool,
    config: Arc<BillingConfig>,
    gateway: Arc<dyn PaymentGateway>,
    employees: Arc<dyn EmployeeCounter>,
}

impl CheckoutService {
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

    /// Issue a full-period invoice and return it with its hosted payment URL
    pub async fn create_checkout(&self, request: CheckoutRequest) -> BillingResult<Invoice> {
        if request.seats < 1 {
            return Err(BillingError::InvalidSeatCount(request.seats));
        }

        let now = OffsetDateTime::now_utc();
        let mut tx = self.pool.begin().await?;

        let target_plan = plans::find(&mut tx, request.plan_id)
            .await?
            .ok_or_else(|| BillingError::PlanNotFound(request.plan_id.to_string()))?;
        if !target_plan.is_active {
            return Err(BillingError::InvalidInput(format!(
                "plan {} is not available for purchase",
                target_plan.name
            )));
        }

        let sub = subscriptions::find_by_company_for_update(&mut tx, request.company_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(request.company_id.to_string()))?;
        let current_plan = plans::find(&mut tx, sub.plan_id)
            .await?
            .ok_or_else(|| BillingError::PlanNotFound(sub.plan_id.to_string()))?;

        let kind = classify(&sub, &current_plan, &target_plan)?;

        if invoices::has_pending(&mut tx, sub.id).await? {
            return Err(BillingError::PendingInvoiceExists);
        }

        let active = self
            .employees
            .count_active_by_company(request.company_id)
            .await?;
        check_seat_request(&target_plan, request.seats, active)?;

        let amount = full_period_amount(
            target_plan.price_per_seat,
            request.seats,
            request.billing_cycle,
        );
        let (period_start, period_end) = billed_period(kind, &sub, request.billing_cycle, now);
        let owner_id = match kind {
            InvoiceKind::NewSubscription => request.company_id,
            _ => sub.id,
        };

        let gateway_request = CreateInvoiceRequest {
            external_id: external_id(kind, owner_id, now),
            amount,
            payer_email: request.payer_email.clone(),
            description: invoice_description(
                &target_plan.name,
                request.seats,
                request.billing_cycle,
            ),
            currency: self.config.currency.clone(),
            duration_seconds: self.config.invoice_expiry.whole_seconds(),
            redirect_urls: self.config.redirect_urls(),
        };
        let draft = InvoiceDraft {
            subscription_id: sub.id,
            company_id: request.company_id,
            kind,
            amount,
            snapshot: PlanSnapshot::of(&target_plan, request.seats, request.billing_cycle),
            period_start,
            period_end,
        };

        let invoice = issue_invoice(
            &mut tx,
            self.gateway.as_ref(),
            &self.config.currency,
            gateway_request,
            draft,
        )
        .await?;

        if let Err(e) = tx.commit().await {
            expire_best_effort(self.gateway.as_ref(), &invoice.gateway_invoice_id).await;
            return Err(e.into());
        }

        tracing::info!(
            company_id = %request.company_id,
            subscription_id = %sub.id,
            invoice_id = %invoice.id,
            kind = %kind,
            amount = %amount,
            "Created checkout invoice"
        );

        Ok(invoice)
    }
}
