//! Invoice history and CSV export

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use staffly_shared::InvoiceStatus;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::Invoice;
use crate::repository::invoices;

const DEFAULT_HISTORY_LIMIT: i64 = 100;

/// Totals across a company's invoices
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BillingSummary {
    pub company_id: Uuid,
    pub total_paid: Decimal,
    pub paid_invoices: usize,
    pub pending_invoices: usize,
    pub closed_invoices: usize,
}

#[derive(Clone)]
pub struct BillingHistoryService {
    pool: PgPool,
}

impl BillingHistoryService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Newest invoices first
    pub async fn list_invoices(
        &self,
        company_id: Uuid,
        limit: Option<i64>,
    ) -> BillingResult<Vec<Invoice>> {
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, 1000);
        let mut conn = self.pool.acquire().await?;
        invoices::list_for_company(&mut conn, company_id, limit).await
    }

    pub async fn get_invoice(&self, company_id: Uuid, invoice_id: Uuid) -> BillingResult<Invoice> {
        let mut conn = self.pool.acquire().await?;
        invoices::find_for_company(&mut conn, company_id, invoice_id)
            .await?
            .ok_or_else(|| BillingError::InvoiceNotFound(invoice_id.to_string()))
    }

    pub async fn export_csv(&self, company_id: Uuid) -> BillingResult<String> {
        let invoices = self.list_invoices(company_id, Some(1000)).await?;
        Ok(invoices_to_csv(&invoices))
    }

    pub async fn summary(&self, company_id: Uuid) -> BillingResult<BillingSummary> {
        let invoices = self.list_invoices(company_id, Some(1000)).await?;
        Ok(summarize(company_id, &invoices))
    }
}

pub fn summarize(company_id: Uuid, invoices: &[Invoice]) -> BillingSummary {
    let mut summary = BillingSummary {
        company_id,
        total_paid: Decimal::ZERO,
        paid_invoices: 0,
        pending_invoices: 0,
        closed_invoices: 0,
    };

    for invoice in invoices {
        match invoice.status {
            InvoiceStatus::Paid => {
                summary.total_paid += invoice.amount;
                summary.paid_invoices += 1;
            }
            InvoiceStatus::Pending => summary.pending_invoices += 1,
            InvoiceStatus::Expired | InvoiceStatus::Failed => summary.closed_invoices += 1,
        }
    }

    summary
}

pub fn invoices_to_csv(invoices: &[Invoice]) -> String {
    let mut csv = String::new();
    csv.push_str("Date,Kind,Description,Seats,Amount,Currency,Status,Reference\n");

    for invoice in invoices {
        let date = invoice
            .created_at
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string());
        let description = format!(
            "{} ({})",
            invoice.snapshot.plan_name, invoice.snapshot.billing_cycle
        );

        csv.push_str(&format!(
            "{},{},{},{},{},{},{},{}\n",
            date,
            invoice.kind,
            escape_csv_field(&description),
            invoice.snapshot.seat_count,
            invoice.amount,
            invoice.currency,
            invoice.status,
            escape_csv_field(&invoice.external_id)
        ));
    }

    csv
}

/// Escape a field for CSV output
fn escape_csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
