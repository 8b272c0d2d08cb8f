//! Billing error types

use staffly_shared::SubscriptionStatus;
use thiserror::Error;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    // =========================================================================
    // Not found
    // =========================================================================
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("Plan not found: {0}")]
    PlanNotFound(String),

    #[error("Invoice not found: {0}")]
    InvoiceNotFound(String),

    // =========================================================================
    // State preconditions
    // =========================================================================
    #[error("Subscription is {status}; cannot {operation}")]
    InvalidSubscriptionState {
        status: SubscriptionStatus,
        operation: &'static str,
    },

    #[error("Target plan is not an upgrade of the current plan")]
    NotAnUpgrade,

    #[error("Target plan is not a downgrade of the current plan")]
    NotADowngrade,

    #[error("A pending invoice already exists for this subscription")]
    PendingInvoiceExists,

    #[error("Requested {requested} seats exceeds the plan limit of {max}")]
    SeatLimitExceeded { requested: i32, max: i32 },

    #[error("Requested {requested} seats is below the {active} active employees")]
    SeatsBelowActiveEmployees { requested: i32, active: i64 },

    #[error("Upgrades are not allowed while the subscription is in its grace period")]
    CannotUpgradeDuringGracePeriod,

    #[error("Requested seat count equals the current seat count")]
    SameAsCurrentSeats,

    #[error("Invalid seat count: {0}")]
    InvalidSeatCount(i32),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // =========================================================================
    // Infrastructure
    // =========================================================================
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Webhook callback token verification failed")]
    WebhookTokenInvalid,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Errors detected before any gateway call and surfaced to the caller as-is.
    /// These are never retried.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            BillingError::SubscriptionNotFound(_)
                | BillingError::PlanNotFound(_)
                | BillingError::InvoiceNotFound(_)
                | BillingError::InvalidSubscriptionState { .. }
                | BillingError::NotAnUpgrade
                | BillingError::NotADowngrade
                | BillingError::PendingInvoiceExists
                | BillingError::SeatLimitExceeded { .. }
                | BillingError::SeatsBelowActiveEmployees { .. }
                | BillingError::CannotUpgradeDuringGracePeriod
                | BillingError::SameAsCurrentSeats
                | BillingError::InvalidSeatCount(_)
                | BillingError::InvalidInput(_)
        )
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        // Losing the race on the one-pending-invoice index is a precondition failure
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.constraint() == Some("idx_invoices_one_pending_per_subscription") {
                return BillingError::PendingInvoiceExists;
            }
        }
        BillingError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        BillingError::Gateway(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
