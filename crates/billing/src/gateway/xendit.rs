//! Xendit hosted-invoice client

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{CreateInvoiceRequest, GatewayInvoice, PaymentGateway};
use crate::config::GatewayConfig;
use crate::error::{BillingError, BillingResult};

const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Serialize)]
struct CreateInvoiceBody<'a> {
    external_id: &'a str,
    #[serde(with = "rust_decimal::serde::float")]
    amount: Decimal,
    payer_email: &'a str,
    description: &'a str,
    currency: &'a str,
    invoice_duration: i64,
    success_redirect_url: &'a str,
    failure_redirect_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct InvoiceResponse {
    id: String,
    #[serde(default)]
    invoice_url: String,
    status: String,
    #[serde(with = "time::serde::rfc3339")]
    expiry_date: OffsetDateTime,
}

/// Payment gateway backed by the Xendit invoice API
#[derive(Clone)]
pub struct XenditClient {
    http: reqwest::Client,
    config: GatewayConfig,
}

impl XenditClient {
    pub fn new(config: GatewayConfig) -> BillingResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn send(&self, operation: &str, request: reqwest::RequestBuilder) -> BillingResult<InvoiceResponse> {
        let response = request
            .basic_auth(&self.config.secret_key, Some(""))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                operation = %operation,
                status = %status,
                body = %body,
                "Payment gateway request failed"
            );
            return Err(BillingError::Gateway(format!(
                "{} returned {}: {}",
                operation, status, body
            )));
        }

        response
            .json::<InvoiceResponse>()
            .await
            .map_err(|e| BillingError::Gateway(format!("{}: invalid response: {}", operation, e)))
    }
}

#[async_trait]
impl PaymentGateway for XenditClient {
    async fn create_invoice(&self, request: CreateInvoiceRequest) -> BillingResult<GatewayInvoice> {
        let body = CreateInvoiceBody {
            external_id: &request.external_id,
            amount: request.amount,
            payer_email: &request.payer_email,
            description: &request.description,
            currency: &request.currency,
            invoice_duration: request.duration_seconds,
            success_redirect_url: &request.redirect_urls.success_url,
            failure_redirect_url: &request.redirect_urls.failure_url,
        };

        let invoice = self
            .send(
                "create invoice",
                self.http.post(self.url("/v2/invoices")).json(&body),
            )
            .await?;

        tracing::info!(
            external_id = %request.external_id,
            gateway_invoice_id = %invoice.id,
            status = %invoice.status,
            "Created gateway invoice"
        );

        Ok(GatewayInvoice {
            id: invoice.id,
            invoice_url: invoice.invoice_url,
            expiry_date: invoice.expiry_date,
        })
    }

    async fn expire_invoice(&self, gateway_invoice_id: &str) -> BillingResult<String> {
        let path = format!("/invoices/{}/expire!", gateway_invoice_id);
        let invoice = self
            .send("expire invoice", self.http.post(self.url(&path)))
            .await?;
        Ok(invoice.status)
    }
}
