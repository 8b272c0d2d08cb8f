//! Charge calculation
//!
//! Pure functions: the same inputs always produce the same amount.
//! Every amount is rounded half away from zero to two decimal places, and only once,
//! after all multiplications, so that intermediate fractions never accumulate error.

use rust_decimal::{Decimal, RoundingStrategy};
use staffly_shared::BillingCycle;
use time::{Duration, OffsetDateTime};

use crate::error::{BillingError, BillingResult};

/// Minimum lifetime of a prorated invoice at the gateway
pub const MIN_PRORATED_INVOICE_LIFETIME: Duration = Duration::hours(24);

const AMOUNT_SCALE: u32 = 2;

/// Inputs for one mid-cycle seat increase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProrationInput {
    pub price_per_seat: Decimal,
    pub current_seats: i32,
    pub new_seats: i32,
    pub days_remaining: i64,
    pub total_days: i64,
}

fn round_amount(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Full-period charge: `price_per_seat × seats × months charged for the cycle`.
/// Never prorated.
pub fn full_period_amount(price_per_seat: Decimal, seats: i32, cycle: BillingCycle) -> Decimal {
    round_amount(price_per_seat * Decimal::from(seats) * Decimal::from(cycle.months_charged()))
}

/// Whole days left in the period, never negative and never more than the cycle length
pub fn days_remaining(period_end: OffsetDateTime, now: OffsetDateTime, cycle: BillingCycle) -> i64 {
    (period_end - now).whole_days().clamp(0, cycle.total_days())
}

/// `price_per_seat × (new − current) × days_remaining / total_days`
pub fn prorated_amount(input: ProrationInput) -> BillingResult<Decimal> {
    if input.new_seats <= input.current_seats {
        return Err(BillingError::InvalidInput(format!(
            "proration needs an increase, got {} -> {} seats",
            input.current_seats, input.new_seats
        )));
    }
    if input.total_days <= 0 || input.days_remaining < 0 {
        return Err(BillingError::InvalidInput(format!(
            "invalid proration window: {} of {} days",
            input.days_remaining, input.total_days
        )));
    }

    let added_seats = Decimal::from(input.new_seats - input.current_seats);
    let amount = input.price_per_seat * added_seats * Decimal::from(input.days_remaining)
        / Decimal::from(input.total_days);

    Ok(round_amount(amount))
}

/// Prorated invoices stay payable until the period they pay for ends, but at least a day
pub fn prorated_invoice_lifetime(period_end: OffsetDateTime, now: OffsetDateTime) -> Duration {
    (period_end - now).max(MIN_PRORATED_INVOICE_LIFETIME)
}
