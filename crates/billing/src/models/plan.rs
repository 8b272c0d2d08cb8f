//! Plan catalog rows

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Catalog plan. Never mutated by the billing engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub price_per_seat: Decimal,
    /// Higher is more capable
    pub tier_level: i32,
    /// `None` means unlimited
    pub max_seats: Option<i32>,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
}

impl Plan {
    /// Reject seat counts above this plan's cap
    pub fn check_seat_cap(&self, seats: i32) -> BillingResult<()> {
        match self.max_seats {
            Some(max) if seats > max => Err(BillingError::SeatLimitExceeded {
                requested: seats,
                max,
            }),
            _ => Ok(()),
        }
    }

    pub fn admits_seats(&self, seats: i64) -> bool {
        self.max_seats.map_or(true, |max| seats <= i64::from(max))
    }

    pub fn is_upgrade_from(&self, current: &Plan) -> bool {
        self.tier_level > current.tier_level
    }

    pub fn is_downgrade_from(&self, current: &Plan) -> bool {
        self.tier_level < current.tier_level
    }
}

/// Capability attached to one or more plans
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Feature {
    pub id: Uuid,
    pub code: String,
    pub name: String,
}
