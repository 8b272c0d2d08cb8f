//! Billing invoices

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use staffly_shared::{BillingCycle, InvoiceKind, InvoiceStatus};
use time::OffsetDateTime;
use uuid::Uuid;

use super::plan::Plan;

/// Plan terms copied onto the invoice at issue time.
/// Later catalog edits never change a historical invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PlanSnapshot {
    pub plan_id: Uuid,
    pub plan_name: String,
    pub price_per_seat: Decimal,
    /// Seat entitlement after payment (the new total for prorated invoices)
    pub seat_count: i32,
    pub billing_cycle: BillingCycle,
}

impl PlanSnapshot {
    pub fn of(plan: &Plan, seat_count: i32, billing_cycle: BillingCycle) -> Self {
        Self {
            plan_id: plan.id,
            plan_name: plan.name.clone(),
            price_per_seat: plan.price_per_seat,
            seat_count,
            billing_cycle,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub company_id: Uuid,
    pub kind: InvoiceKind,
    pub amount: Decimal,
    pub currency: String,
    pub status: InvoiceStatus,
    pub is_prorated: bool,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub snapshot: PlanSnapshot,
    pub period_start: OffsetDateTime,
    pub period_end: OffsetDateTime,
    pub external_id: String,
    pub gateway_invoice_id: String,
    pub invoice_url: String,
    pub gateway_expires_at: OffsetDateTime,
    pub paid_at: Option<OffsetDateTime>,
    pub payment_method: Option<String>,
    pub payment_channel: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Invoice {
    pub fn is_pending(&self) -> bool {
        self.status == InvoiceStatus::Pending
    }

    pub fn is_paid(&self) -> bool {
        self.status == InvoiceStatus::Paid
    }
}

/// Invoice row written after the gateway accepted the remote invoice
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub subscription_id: Uuid,
    pub company_id: Uuid,
    pub kind: InvoiceKind,
    pub amount: Decimal,
    pub currency: String,
    pub snapshot: PlanSnapshot,
    pub period_start: OffsetDateTime,
    pub period_end: OffsetDateTime,
    pub external_id: String,
    pub gateway_invoice_id: String,
    pub invoice_url: String,
    pub gateway_expires_at: OffsetDateTime,
}

/// Deterministic external id: `<context>-<id>-<unix_timestamp>`.
/// Not unique: invoices issued for the same owner within one second share it.
pub fn external_id(kind: InvoiceKind, owner_id: Uuid, now: OffsetDateTime) -> String {
    format!("{}-{}-{}", kind.context(), owner_id, now.unix_timestamp())
}
