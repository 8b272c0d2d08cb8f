//! Billing engine configuration

use time::Duration;

use crate::error::{BillingError, BillingResult};

const DEFAULT_GATEWAY_BASE_URL: &str = "https://api.xendit.co";
const DEFAULT_CURRENCY: &str = "IDR";
const DEFAULT_INVOICE_EXPIRY_HOURS: i64 = 24;
const DEFAULT_GRACE_PERIOD_DAYS: i64 = 7;
const DEFAULT_TRIAL_DAYS: i64 = 14;

/// Credentials and endpoint of the hosted-invoice payment gateway
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Secret API key, sent as the basic-auth user name
    pub secret_key: String,
    /// Token the gateway sends back in the callback header of every webhook
    pub callback_token: String,
    pub base_url: String,
}

/// Configuration for the subscription billing engine
#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub gateway: GatewayConfig,
    /// ISO 4217 currency code for every invoice
    pub currency: String,
    /// How long a checkout invoice stays payable. Also the stale-invoice window.
    pub invoice_expiry: Duration,
    /// Days a `past_due` subscription keeps access after its period ends
    pub grace_period_days: i64,
    pub trial_days: i64,
    /// Base URL for success/failure redirects
    pub app_base_url: String,
}

/// Redirect targets handed to the gateway with each invoice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectUrls {
    pub success_url: String,
    pub failure_url: String,
}

impl BillingConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            gateway: GatewayConfig {
                secret_key: required("PAYMENT_GATEWAY_SECRET_KEY")?,
                callback_token: required("PAYMENT_GATEWAY_CALLBACK_TOKEN")?,
                base_url: std::env::var("PAYMENT_GATEWAY_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_GATEWAY_BASE_URL.to_string()),
            },
            currency: std::env::var("BILLING_CURRENCY")
                .unwrap_or_else(|_| DEFAULT_CURRENCY.to_string()),
            invoice_expiry: Duration::hours(positive_or_default(
                "INVOICE_EXPIRY_HOURS",
                DEFAULT_INVOICE_EXPIRY_HOURS,
            )?),
            grace_period_days: positive_or_default("GRACE_PERIOD_DAYS", DEFAULT_GRACE_PERIOD_DAYS)?,
            trial_days: positive_or_default("TRIAL_DAYS", DEFAULT_TRIAL_DAYS)?,
            app_base_url: std::env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        })
    }

    /// Config with defaults for everything but the gateway credentials
    pub fn with_gateway(gateway: GatewayConfig) -> Self {
        Self {
            gateway,
            currency: DEFAULT_CURRENCY.to_string(),
            invoice_expiry: Duration::hours(DEFAULT_INVOICE_EXPIRY_HOURS),
            grace_period_days: DEFAULT_GRACE_PERIOD_DAYS,
            trial_days: DEFAULT_TRIAL_DAYS,
            app_base_url: "http://localhost:3000".to_string(),
        }
    }

    pub fn grace_period(&self) -> Duration {
        Duration::days(self.grace_period_days)
    }

    pub fn redirect_urls(&self) -> RedirectUrls {
        let base = self.app_base_url.trim_end_matches('/');
        RedirectUrls {
            success_url: format!("{}/billing/success", base),
            failure_url: format!("{}/billing/failed", base),
        }
    }
}

fn required(key: &'static str) -> BillingResult<String> {
    std::env::var(key).map_err(|_| BillingError::Config(format!("{} not set", key)))
}

fn positive_or_default(key: &'static str, default: i64) -> BillingResult<i64> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => match raw.trim().parse::<i64>() {
            Ok(value) if value > 0 => Ok(value),
            _ => Err(BillingError::Config(format!(
                "{} must be a positive integer, got {:?}",
                key, raw
            ))),
        },
    }
}
