//! Common types used across Staffly billing

use serde::{Deserialize, Serialize};
use time::Duration;

use crate::error::SharedError;

// =============================================================================
// Enums
// =============================================================================

/// Subscription status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trial,
    Active,
    PastDue,
    Cancelled,
    Expired,
}

impl Default for SubscriptionStatus {
    fn default() -> Self {
        Self::Trial
    }
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trial => "trial",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Cancellation is only valid from a running paid or trial subscription
    pub fn can_cancel(&self) -> bool {
        matches!(self, Self::Active | Self::Trial)
    }

    /// Statuses that require a fresh checkout rather than a renewal or upgrade
    pub fn needs_new_subscription(&self) -> bool {
        matches!(self, Self::Trial | Self::Cancelled | Self::Expired)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trial" => Ok(Self::Trial),
            "active" => Ok(Self::Active),
            "past_due" => Ok(Self::PastDue),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            _ => Err(SharedError::invalid("subscription status", s)),
        }
    }
}

/// Invoice status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Expired,
    Failed,
}

impl Default for InvoiceStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Expired => "expired",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Billing cycle for subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    #[default]
    Monthly,
    Yearly,
}

impl BillingCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    /// Months charged for one full period. Yearly billing charges 10 months for 12.
    pub fn months_charged(&self) -> i64 {
        match self {
            Self::Monthly => 1,
            Self::Yearly => 10,
        }
    }

    /// Day count used as the proration denominator
    pub fn total_days(&self) -> i64 {
        match self {
            Self::Monthly => 30,
            Self::Yearly => 365,
        }
    }

    /// Length of one paid period
    pub fn period_length(&self) -> Duration {
        Duration::days(self.total_days())
    }
}

impl std::fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BillingCycle {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "monthly" | "month" => Ok(Self::Monthly),
            "yearly" | "annual" | "year" => Ok(Self::Yearly),
            _ => Err(SharedError::invalid("billing cycle", s)),
        }
    }
}

/// Why an invoice was issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvoiceKind {
    NewSubscription,
    Renewal,
    Upgrade,
    SeatIncrease,
}

impl InvoiceKind {
    /// Prefix of the gateway external id, e.g. `upgrade-<subscription_id>-<unix_ts>`
    pub fn context(&self) -> &'static str {
        match self {
            Self::NewSubscription => "subscribe",
            Self::Renewal => "renew",
            Self::Upgrade => "upgrade",
            Self::SeatIncrease => "seats",
        }
    }

    pub fn is_prorated(&self) -> bool {
        matches!(self, Self::SeatIncrease)
    }
}

impl std::fmt::Display for InvoiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NewSubscription => write!(f, "new_subscription"),
            Self::Renewal => write!(f, "renewal"),
            Self::Upgrade => write!(f, "upgrade"),
            Self::SeatIncrease => write!(f, "seat_increase"),
        }
    }
}

/// Capability a plan grants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureCode {
    EmployeeDirectory,
    Attendance,
    Leave,
    Payroll,
    Scheduling,
    Reporting,
    CustomRoles,
    ApiAccess,
    AuditLog,
}

impl FeatureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmployeeDirectory => "employee_directory",
            Self::Attendance => "attendance",
            Self::Leave => "leave",
            Self::Payroll => "payroll",
            Self::Scheduling => "scheduling",
            Self::Reporting => "reporting",
            Self::CustomRoles => "custom_roles",
            Self::ApiAccess => "api_access",
            Self::AuditLog => "audit_log",
        }
    }
}

impl std::fmt::Display for FeatureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FeatureCode {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "employee_directory" => Ok(Self::EmployeeDirectory),
            "attendance" => Ok(Self::Attendance),
            "leave" => Ok(Self::Leave),
            "payroll" => Ok(Self::Payroll),
            "scheduling" => Ok(Self::Scheduling),
            "reporting" => Ok(Self::Reporting),
            "custom_roles" => Ok(Self::CustomRoles),
            "api_access" => Ok(Self::ApiAccess),
            "audit_log" => Ok(Self::AuditLog),
            _ => Err(SharedError::invalid("feature code", s)),
        }
    }
}
