//! Subscription cancellation and pending-invoice voiding

use serde::Serialize;
use sqlx::PgPool;
use staffly_shared::{InvoiceStatus, SubscriptionStatus};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::gateway::{expire_best_effort, PaymentGateway};
use crate::models::{Invoice, Subscription};
use crate::repository::{invoices, subscriptions};

#[derive(Debug, Clone, Serialize)]
pub struct CancellationResult {
    pub subscription: Subscription,
    /// Pending invoices moved to `expired`
    pub voided_invoices: Vec<Uuid>,
    /// Gateway expiries that could not be confirmed
    pub gateway_failures: usize,
    /// Access continues until this instant
    #[serde(with = "time::serde::rfc3339")]
    pub access_until: OffsetDateTime,
}

#[derive(Clone)]
pub struct CancellationService {
    pool: PgPool,
    gateway: Arc<dyn PaymentGateway>,
}

impl CancellationService {
    pub fn new(pool: PgPool, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { pool, gateway }
    }

    /// Cancel an `active` or `trial` subscription, voiding every pending invoice.
    /// Invoices expire locally in the transaction and at the gateway after commit.
    /// Access remains until the end of the current period.
    pub async fn cancel_subscription(&self, company_id: Uuid) -> BillingResult<CancellationResult> {
        let now = OffsetDateTime::now_utc();
        let mut tx = self.pool.begin().await?;

        let mut sub = subscriptions::find_by_company_for_update(&mut tx, company_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(company_id.to_string()))?;
        if !sub.status.can_cancel() {
            return Err(BillingError::InvalidSubscriptionState {
                status: sub.status,
                operation: "cancel",
            });
        }

        let pending = invoices::list_pending_for_subscription(&mut tx, sub.id).await?;
        let mut voided = Vec::with_capacity(pending.len());
        for invoice in pending {
            if invoices::transition_from_pending(&mut tx, invoice.id, InvoiceStatus::Expired)
                .await?
            {
                voided.push(invoice);
            }
        }

        if !subscriptions::mark_cancelled(&mut tx, sub.id, now).await? {
            return Err(BillingError::Internal(format!(
                "subscription {} changed status while locked",
                sub.id
            )));
        }
        tx.commit().await?;

        // Remote links are voided only once the local state is committed
        let mut gateway_failures = 0;
        for invoice in &voided {
            if !expire_best_effort(self.gateway.as_ref(), &invoice.gateway_invoice_id).await {
                gateway_failures += 1;
            }
        }
        let voided_invoices: Vec<Uuid> = voided.iter().map(|invoice| invoice.id).collect();

        sub.status = SubscriptionStatus::Cancelled;
        sub.auto_renew = false;
        sub.cancelled_at = Some(now);
        sub.pending_plan_id = None;
        sub.pending_max_seats = None;

        tracing::info!(
            company_id = %company_id,
            subscription_id = %sub.id,
            voided_invoices = voided_invoices.len(),
            gateway_failures = gateway_failures,
            access_until = %sub.current_period_end,
            "Cancelled subscription"
        );

        Ok(CancellationResult {
            access_until: sub.current_period_end,
            subscription: sub,
            voided_invoices,
            gateway_failures,
        })
    }

    /// Void one pending checkout invoice without touching the subscription
    pub async fn void_pending_invoice(
        &self,
        company_id: Uuid,
        invoice_id: Uuid,
    ) -> BillingResult<Invoice> {
        let mut tx = self.pool.begin().await?;

        let sub = subscriptions::find_by_company_for_update(&mut tx, company_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(company_id.to_string()))?;
        let mut invoice = invoices::find_for_company(&mut tx, company_id, invoice_id)
            .await?
            .ok_or_else(|| BillingError::InvoiceNotFound(invoice_id.to_string()))?;
        if !invoice.is_pending() {
            return Err(BillingError::InvalidInput(format!(
                "invoice is {}; only pending invoices can be voided",
                invoice.status
            )));
        }

        if !invoices::transition_from_pending(&mut tx, invoice.id, InvoiceStatus::Expired).await? {
            return Err(BillingError::InvalidInput(
                "invoice left pending while it was being voided".to_string(),
            ));
        }
        tx.commit().await?;

        let gateway_confirmed =
            expire_best_effort(self.gateway.as_ref(), &invoice.gateway_invoice_id).await;

        tracing::info!(
            company_id = %company_id,
            subscription_id = %sub.id,
            invoice_id = %invoice.id,
            gateway_confirmed = gateway_confirmed,
            "Voided pending invoice"
        );

        invoice.status = InvoiceStatus::Expired;
        Ok(invoice)
    }
}
