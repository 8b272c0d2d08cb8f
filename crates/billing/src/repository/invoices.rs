//! Invoice persistence

use sqlx::PgConnection;
use staffly_shared::InvoiceStatus;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::models::{Invoice, NewInvoice};

const INVOICE_COLUMNS: &str = r#"
    id, subscription_id, company_id, kind, amount, currency, status, is_prorated,
    plan_id, plan_name, price_per_seat, seat_count, billing_cycle,
    period_start, period_end, external_id, gateway_invoice_id, invoice_url, gateway_expires_at,
    paid_at, payment_method, payment_channel, created_at, updated_at
"#;

/// Payment details reported by the gateway
#[derive(Debug, Clone, Default)]
pub struct PaymentDetails {
    pub paid_at: Option<OffsetDateTime>,
    pub payment_method: Option<String>,
    pub payment_channel: Option<String>,
}

/// Stale invoice expired by the sweep
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExpiredInvoiceRef {
    pub id: Uuid,
    pub gateway_invoice_id: String,
}

pub async fn insert(conn: &mut PgConnection, new: &NewInvoice) -> BillingResult<Invoice> {
    let invoice = sqlx::query_as::<_, Invoice>(&format!(
        r#"
        INSERT INTO invoices
            (subscription_id, company_id, kind, amount, currency, status, is_prorated,
             plan_id, plan_name, price_per_seat, seat_count, billing_cycle,
             period_start, period_end, external_id, gateway_invoice_id, invoice_url,
             gateway_expires_at)
        VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        RETURNING {}
        "#,
        INVOICE_COLUMNS
    ))
    .bind(new.subscription_id)
    .bind(new.company_id)
    .bind(new.kind)
    .bind(new.amount)
    .bind(&new.currency)
    .bind(new.kind.is_prorated())
    .bind(new.snapshot.plan_id)
    .bind(&new.snapshot.plan_name)
    .bind(new.snapshot.price_per_seat)
    .bind(new.snapshot.seat_count)
    .bind(new.snapshot.billing_cycle)
    .bind(new.period_start)
    .bind(new.period_end)
    .bind(&new.external_id)
    .bind(&new.gateway_invoice_id)
    .bind(&new.invoice_url)
    .bind(new.gateway_expires_at)
    .fetch_one(conn)
    .await?;

    Ok(invoice)
}

/// Owning subscription of a gateway invoice, read without locking
pub async fn find_subscription_id_by_gateway_id(
    conn: &mut PgConnection,
    gateway_invoice_id: &str,
) -> BillingResult<Option<Uuid>> {
    let id: Option<(Uuid,)> =
        sqlx::query_as("SELECT subscription_id FROM invoices WHERE gateway_invoice_id = $1")
            .bind(gateway_invoice_id)
            .fetch_optional(conn)
            .await?;

    Ok(id.map(|(id,)| id))
}

/// Lock an invoice by the gateway's invoice id
pub async fn find_by_gateway_id_for_update(
    conn: &mut PgConnection,
    gateway_invoice_id: &str,
) -> BillingResult<Option<Invoice>> {
    let invoice = sqlx::query_as::<_, Invoice>(&format!(
        "SELECT {} FROM invoices WHERE gateway_invoice_id = $1 FOR UPDATE",
        INVOICE_COLUMNS
    ))
    .bind(gateway_invoice_id)
    .fetch_optional(conn)
    .await?;

    Ok(invoice)
}

pub async fn find_for_company(
    conn: &mut PgConnection,
    company_id: Uuid,
    invoice_id: Uuid,
) -> BillingResult<Option<Invoice>> {
    let invoice = sqlx::query_as::<_, Invoice>(&format!(
        "SELECT {} FROM invoices WHERE id = $1 AND company_id = $2",
        INVOICE_COLUMNS
    ))
    .bind(invoice_id)
    .bind(company_id)
    .fetch_optional(conn)
    .await?;

    Ok(invoice)
}

pub async fn has_pending(conn: &mut PgConnection, subscription_id: Uuid) -> BillingResult<bool> {
    let (exists,): (bool,) = sqlx::query_as(
        "SELECT EXISTS (SELECT 1 FROM invoices WHERE subscription_id = $1 AND status = 'pending')",
    )
    .bind(subscription_id)
    .fetch_one(conn)
    .await?;

    Ok(exists)
}

pub async fn list_pending_for_subscription(
    conn: &mut PgConnection,
    subscription_id: Uuid,
) -> BillingResult<Vec<Invoice>> {
    let invoices = sqlx::query_as::<_, Invoice>(&format!(
        "SELECT {} FROM invoices WHERE subscription_id = $1 AND status = 'pending' FOR UPDATE",
        INVOICE_COLUMNS
    ))
    .bind(subscription_id)
    .fetch_all(conn)
    .await?;

    Ok(invoices)
}

/// Billing history, newest first
pub async fn list_for_company(
    conn: &mut PgConnection,
    company_id: Uuid,
    limit: i64,
) -> BillingResult<Vec<Invoice>> {
    let invoices = sqlx::query_as::<_, Invoice>(&format!(
        "SELECT {} FROM invoices WHERE company_id = $1 ORDER BY created_at DESC LIMIT $2",
        INVOICE_COLUMNS
    ))
    .bind(company_id)
    .bind(limit)
    .fetch_all(conn)
    .await?;

    Ok(invoices)
}

/// Any non-paid status → `paid`. Returns the updated row, or `None` if it was already paid.
pub async fn mark_paid(
    conn: &mut PgConnection,
    invoice_id: Uuid,
    payment: &PaymentDetails,
    now: OffsetDateTime,
) -> BillingResult<Option<Invoice>> {
    let invoice = sqlx::query_as::<_, Invoice>(&format!(
        r#"
        UPDATE invoices
        SET status = 'paid',
            paid_at = COALESCE($2, $5),
            payment_method = $3,
            payment_channel = $4,
            updated_at = NOW()
        WHERE id = $1 AND status <> 'paid'
        RETURNING {}
        "#,
        INVOICE_COLUMNS
    ))
    .bind(invoice_id)
    .bind(payment.paid_at)
    .bind(&payment.payment_method)
    .bind(&payment.payment_channel)
    .bind(now)
    .fetch_optional(conn)
    .await?;

    Ok(invoice)
}

/// `pending` → `status`. Returns false if the invoice was no longer pending.
pub async fn transition_from_pending(
    conn: &mut PgConnection,
    invoice_id: Uuid,
    status: InvoiceStatus,
) -> BillingResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE invoices
        SET status = $2, updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        "#,
    )
    .bind(invoice_id)
    .bind(status)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Expire pending invoices created before `cutoff` whose gateway expiry has passed.
///
/// `cutoff` is the configured invoice window. The second condition keeps prorated
/// seat invoices, whose gateway lifetime runs to the period end, payable past that
/// window.
pub async fn expire_stale(
    conn: &mut PgConnection,
    cutoff: OffsetDateTime,
    now: OffsetDateTime,
) -> BillingResult<Vec<ExpiredInvoiceRef>> {
    let expired = sqlx::query_as::<_, ExpiredInvoiceRef>(
        r#"
        UPDATE invoices
        SET status = 'expired', updated_at = NOW()
        WHERE status = 'pending'
          AND created_at < $1
          AND gateway_expires_at <= $2
        RETURNING id, gateway_invoice_id
        "#,
    )
    .bind(cutoff)
    .bind(now)
    .fetch_all(conn)
    .await?;

    Ok(expired)
}
