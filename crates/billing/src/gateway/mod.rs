//! Payment gateway boundary
//!
//! The engine only consumes the gateway's client contract: create a hosted invoice,
//! and expire one that should no longer be payable.

pub mod xendit;

use async_trait::async_trait;
use mockall::automock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;

use crate::config::RedirectUrls;
use crate::error::BillingResult;

pub use xendit::XenditClient;

/// Retries for best-effort expiry after the first attempt
const EXPIRE_RETRIES: usize = 2;
const EXPIRE_RETRY_INTERVAL_MS: u64 = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct CreateInvoiceRequest {
    /// Deterministic `<context>-<id>-<unix_timestamp>` reference
    pub external_id: String,
    pub amount: Decimal,
    pub payer_email: String,
    pub description: String,
    pub currency: String,
    pub duration_seconds: i64,
    pub redirect_urls: RedirectUrls,
}

/// Hosted invoice created at the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayInvoice {
    pub id: String,
    pub invoice_url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expiry_date: OffsetDateTime,
}

#[automock]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_invoice(&self, request: CreateInvoiceRequest) -> BillingResult<GatewayInvoice>;

    /// Expire a hosted invoice; returns the gateway's resulting status
    async fn expire_invoice(&self, gateway_invoice_id: &str) -> BillingResult<String>;
}

/// Expire a remote invoice without failing the caller.
/// Returns whether the gateway confirmed the expiry.
pub async fn expire_best_effort(gateway: &dyn PaymentGateway, gateway_invoice_id: &str) -> bool {
    let strategy = FixedInterval::from_millis(EXPIRE_RETRY_INTERVAL_MS).take(EXPIRE_RETRIES);

    match Retry::spawn(strategy, || gateway.expire_invoice(gateway_invoice_id)).await {
        Ok(status) => {
            tracing::info!(
                gateway_invoice_id = %gateway_invoice_id,
                status = %status,
                "Expired invoice at payment gateway"
            );
            true
        }
        Err(e) => {
            tracing::warn!(
                gateway_invoice_id = %gateway_invoice_id,
                error = %e,
                "Failed to expire invoice at payment gateway (continuing)"
            );
            false
        }
    }
}
