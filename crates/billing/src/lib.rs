// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError carries status and seat context
#![allow(clippy::too_many_arguments)] // Orchestrators thread the transaction through helpers
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Staffly Billing Module
//!
//! Subscription and billing lifecycle engine for the Staffly HR/payroll platform.
//!
//! ## Features
//!
//! - **Checkout**: Full-period invoices for new subscriptions, renewals and upgrades
//! - **Seat Changes**: Prorated mid-cycle increases, deferred reductions
//! - **Plan Changes**: Trials, scheduled downgrades
//! - **Webhooks**: Idempotent payment-status callbacks from the gateway
//! - **Cancellation**: Cancel with pending-invoice voiding
//! - **Lifecycle**: Trial expiry, grace period, stale invoices, pending changes
//! - **Entitlements**: Typed feature sets and access windows
//! - **Invariants**: Read-only consistency checks

pub mod cancellation;
pub mod catalog;
pub mod checkout;
pub mod config;
pub mod employees;
pub mod entitlement;
pub mod error;
pub mod gateway;
pub mod history;
pub mod invariants;
pub mod lifecycle;
pub mod models;
pub mod plan_change;
pub mod proration;
pub mod repository;
pub mod seats;
pub mod webhooks;

// Cancellation
pub use cancellation::{CancellationResult, CancellationService};

// Catalog
pub use catalog::PlanCatalog;

// Checkout
pub use checkout::{CheckoutRequest, CheckoutService};

// Config
pub use config::{BillingConfig, GatewayConfig, RedirectUrls};

// Employees
pub use employees::{EmployeeCounter, PgEmployeeCounter};

// Entitlement
pub use entitlement::{EntitlementService, SubscriptionSnapshot};

// Error
pub use error::{BillingError, BillingResult};

// Gateway
pub use gateway::{CreateInvoiceRequest, GatewayInvoice, PaymentGateway, XenditClient};

// History
pub use history::{BillingHistoryService, BillingSummary};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Lifecycle
pub use lifecycle::{LifecycleJob, LifecycleService, SweepOutcome};

// Models
pub use models::{Feature, Invoice, Plan, PlanSnapshot, RenewalTerms, Subscription};

// Plan changes
pub use plan_change::{PlanChangeService, ScheduledDowngrade};

// Seats
pub use seats::{SeatChangeOutcome, SeatChangeService};

// Webhooks
pub use webhooks::{WebhookOutcome, WebhookPayload, WebhookProcessor};

use sqlx::PgPool;
use std::sync::Arc;

/// Main billing service that combines all billing functionality
#[derive(Clone)]
pub struct BillingService {
    pub config: Arc<BillingConfig>,
    pub cancellation: CancellationService,
    pub catalog: PlanCatalog,
    pub checkout: CheckoutService,
    pub entitlement: EntitlementService,
    pub history: BillingHistoryService,
    pub invariants: InvariantChecker,
    pub lifecycle: LifecycleService,
    pub plan_change: PlanChangeService,
    pub seats: SeatChangeService,
    pub webhooks: WebhookProcessor,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let config = BillingConfig::from_env()?;
        let gateway = Arc::new(XenditClient::new(config.gateway.clone())?);
        let employees = Arc::new(PgEmployeeCounter::new(pool.clone()));
        Ok(Self::new(config, pool, gateway, employees))
    }

    /// Create a new billing service with explicit config and collaborators
    pub fn new(
        config: BillingConfig,
        pool: PgPool,
        gateway: Arc<dyn PaymentGateway>,
        employees: Arc<dyn EmployeeCounter>,
    ) -> Self {
        let config = Arc::new(config);

        Self {
            cancellation: CancellationService::new(pool.clone(), gateway.clone()),
            catalog: PlanCatalog::new(pool.clone()),
            checkout: CheckoutService::new(
                pool.clone(),
                config.clone(),
                gateway.clone(),
                employees.clone(),
            ),
            entitlement: EntitlementService::new(pool.clone(), config.clone()),
            history: BillingHistoryService::new(pool.clone()),
            invariants: InvariantChecker::new(pool.clone()),
            lifecycle: LifecycleService::new(
                pool.clone(),
                config.clone(),
                gateway.clone(),
                employees.clone(),
            ),
            plan_change: PlanChangeService::new(pool.clone(), config.clone(), employees.clone()),
            seats: SeatChangeService::new(pool.clone(), config.clone(), gateway, employees.clone()),
            webhooks: WebhookProcessor::new(pool, config.clone(), employees),
            config,
        }
    }
}
