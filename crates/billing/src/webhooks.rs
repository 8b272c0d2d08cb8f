//! Payment gateway webhook handling
//!
//! Deliveries are at-least-once and may arrive concurrently. Every transition is
//! guarded on the invoice's current status, so a replayed event changes nothing.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use staffly_shared::InvoiceStatus;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::BillingConfig;
use crate::employees::EmployeeCounter;
use crate::error::{BillingError, BillingResult};
use crate::repository::invoices::{self, PaymentDetails};
use crate::repository::subscriptions;

/// Header carrying the gateway's callback verification token
pub const CALLBACK_TOKEN_HEADER: &str = "x-callback-token";

/// Invoice callback body
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    /// Gateway invoice id
    pub id: String,
    #[serde(default)]
    pub external_id: Option<String>,
    pub status: String,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub amount: Option<Decimal>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub paid_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub payment_channel: Option<String>,
}

/// Gateway status, reduced to what the engine acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayEvent {
    Paid,
    /// Invoice can no longer be paid
    Closed(InvoiceStatus),
    Ignored,
}

impl GatewayEvent {
    pub fn from_status(status: &str) -> Self {
        match status.trim().to_ascii_uppercase().as_str() {
            "PAID" | "SETTLED" => Self::Paid,
            "EXPIRED" => Self::Closed(InvoiceStatus::Expired),
            "FAILED" => Self::Closed(InvoiceStatus::Failed),
            _ => Self::Ignored,
        }
    }
}

/// What a delivery did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// Invoice not issued by this system
    UnknownInvoice,
    /// Status the engine does not act on
    Ignored { status: String },
    /// Invoice was already paid; nothing re-applied
    AlreadyApplied { invoice_id: Uuid },
    Paid {
        invoice_id: Uuid,
        subscription_id: Uuid,
    },
    Closed {
        invoice_id: Uuid,
        status: InvoiceStatus,
    },
    /// Expiry or failure for an invoice that had already left `pending`
    Stale {
        invoice_id: Uuid,
        status: InvoiceStatus,
    },
}

/// Constant-time comparison of the callback token header
pub fn verify_callback_token(expected: &str, provided: Option<&str>) -> BillingResult<()> {
    let provided = provided.ok_or(BillingError::WebhookTokenInvalid)?;
    if expected.is_empty() || !bool::from(expected.as_bytes().ct_eq(provided.as_bytes())) {
        tracing::warn!("Webhook callback token mismatch");
        return Err(BillingError::WebhookTokenInvalid);
    }
    Ok(())
}

#[derive(Clone)]
pub struct WebhookProcessor {
    pool: PgPool,
    config: Arc<BillingConfig>,
    employees: Arc<dyn EmployeeCounter>,
}

impl WebhookProcessor {
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

    /// Verify the callback token, then handle the payload
    pub async fn handle_verified(
        &self,
        callback_token: Option<&str>,
        payload: WebhookPayload,
    ) -> BillingResult<WebhookOutcome> {
        verify_callback_token(&self.config.gateway.callback_token, callback_token)?;
        self.handle(payload).await
    }

    pub async fn handle(&self, payload: WebhookPayload) -> BillingResult<WebhookOutcome> {
        let event = GatewayEvent::from_status(&payload.status);
        if event == GatewayEvent::Ignored {
            tracing::warn!(
                gateway_invoice_id = %payload.id,
                status = %payload.status,
                "Ignoring webhook with unhandled status"
            );
            return Ok(WebhookOutcome::Ignored {
                status: payload.status,
            });
        }

        let mut tx = self.pool.begin().await?;

        // Subscription first, then invoice: the same lock order as checkout
        let Some(subscription_id) =
            invoices::find_subscription_id_by_gateway_id(&mut tx, &payload.id).await?
        else {
            tracing::info!(
                gateway_invoice_id = %payload.id,
                external_id = ?payload.external_id,
                status = %payload.status,
                "Webhook for unknown invoice; ignoring"
            );
            return Ok(WebhookOutcome::UnknownInvoice);
        };
        let mut sub = subscriptions::find_for_update(&mut tx, subscription_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(subscription_id.to_string()))?;
        let invoice = invoices::find_by_gateway_id_for_update(&mut tx, &payload.id)
            .await?
            .ok_or_else(|| BillingError::InvoiceNotFound(payload.id.clone()))?;

        let outcome = match event {
            GatewayEvent::Paid => {
                if invoice.is_paid() {
                    tracing::info!(
                        invoice_id = %invoice.id,
                        gateway_invoice_id = %payload.id,
                        "Invoice already paid; skipping replay"
                    );
                    return Ok(WebhookOutcome::AlreadyApplied {
                        invoice_id: invoice.id,
                    });
                }
                if let Some(amount) = payload.amount {
                    if amount != invoice.amount {
                        tracing::warn!(
                            invoice_id = %invoice.id,
                            expected = %invoice.amount,
                            reported = %amount,
                            "Paid amount differs from invoice amount"
                        );
                    }
                }

                let payment = PaymentDetails {
                    paid_at: payload.paid_at,
                    payment_method: payload.payment_method.clone(),
                    payment_channel: payload.payment_channel.clone(),
                };
                let Some(paid) =
                    invoices::mark_paid(&mut tx, invoice.id, &payment, OffsetDateTime::now_utc())
                        .await?
                else {
                    return Ok(WebhookOutcome::AlreadyApplied {
                        invoice_id: invoice.id,
                    });
                };

                let active = self
                    .employees
                    .count_active_by_company(sub.company_id)
                    .await?;
                let previous_status = sub.status;
                sub.apply_paid_invoice(&paid, active);
                subscriptions::save(&mut tx, &sub).await?;

                tracing::info!(
                    invoice_id = %paid.id,
                    subscription_id = %sub.id,
                    company_id = %sub.company_id,
                    kind = %paid.kind,
                    prorated = paid.is_prorated,
                    from_status = %previous_status,
                    max_seats = sub.max_seats,
                    period_end = %sub.current_period_end,
                    "Applied paid invoice"
                );

                WebhookOutcome::Paid {
                    invoice_id: paid.id,
                    subscription_id: sub.id,
                }
            }
            GatewayEvent::Closed(status) => {
                if invoices::transition_from_pending(&mut tx, invoice.id, status).await? {
                    tracing::info!(
                        invoice_id = %invoice.id,
                        subscription_id = %sub.id,
                        status = %status,
                        "Closed pending invoice"
                    );
                    WebhookOutcome::Closed {
                        invoice_id: invoice.id,
                        status,
                    }
                } else {
                    tracing::info!(
                        invoice_id = %invoice.id,
                        current = %invoice.status,
                        reported = %status,
                        "Invoice no longer pending; ignoring"
                    );
                    WebhookOutcome::Stale {
                        invoice_id: invoice.id,
                        status: invoice.status,
                    }
                }
            }
            GatewayEvent::Ignored => {
                return Ok(WebhookOutcome::Ignored {
                    status: payload.status.clone(),
                })
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }
}
