//! Mid-cycle upgrade proration.
//!
//! The charge is linear in the days left in the current cycle:
//!
//! ```text
//! amount = max(0, round((target - current) / total_days * days_remaining))
//! ```
//!
//! Monthly cycles are the calendar month of `now` (UTC). Yearly cycles run
//! from the first of `now`'s month to the same day one year later, anchored to
//! the calendar month rather than the subscription anniversary.
//!
//! Everything here is pure; callers pass `now` in.

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;

use super::error::BillingError;
use super::plans::{BillingInterval, PlanTier};
use crate::clock::{add_months, days_in_month, start_of_utc_month};

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Result of a proration calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProrationQuote {
    /// One-time charge in minor units. Zero means apply without charging.
    pub amount: i64,
    pub days_remaining: u32,
    pub total_days: u32,
}

impl ProrationQuote {
    /// Whether the upgrade can be applied immediately without payment.
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.amount == 0
    }
}

/// Compute the prorated charge for switching from `current_price` to
/// `target_price` at `now`.
pub fn prorated_upgrade(
    current_price: i64,
    target_price: i64,
    interval: BillingInterval,
    now: DateTime<Utc>,
) -> ProrationQuote {
    let (days_remaining, total_days) = match interval {
        BillingInterval::Month => {
            let total = days_in_month(now);
            (total.saturating_sub(now.day()), total)
        }
        BillingInterval::Year => {
            let start = start_of_utc_month(now);
            let end = add_months(start, 12);
            let total = ceil_days((end - start).num_milliseconds());
            let elapsed = ceil_days((now - start).num_milliseconds());
            (total.saturating_sub(elapsed), total)
        }
    };

    ProrationQuote {
        amount: prorate(target_price - current_price, days_remaining, total_days),
        days_remaining,
        total_days,
    }
}

/// Check upgrade legality, then price it.
///
/// The rank check happens before any arithmetic so a downgrade or sideways
/// move never produces a quote.
pub fn quote_upgrade(
    current: PlanTier,
    target: PlanTier,
    interval: BillingInterval,
    now: DateTime<Utc>,
) -> Result<ProrationQuote, BillingError> {
    if !current.is_upgrade_to(target) {
        return Err(BillingError::NotAnUpgrade {
            current: current.id().to_string(),
            target: target.id().to_string(),
        });
    }

    Ok(prorated_upgrade(
        current.price(interval),
        target.price(interval),
        interval,
        now,
    ))
}

/// `round(delta / total * remaining)` clamped at zero, rounding halves up.
///
/// Uses exact integer arithmetic so results do not depend on float error.
fn prorate(delta: i64, days_remaining: u32, total_days: u32) -> i64 {
    if delta <= 0 || days_remaining == 0 || total_days == 0 {
        return 0;
    }
    let numerator = i128::from(delta) * i128::from(days_remaining);
    let total = i128::from(total_days);
    ((2 * numerator + total) / (2 * total)) as i64
}

fn ceil_days(millis: i64) -> u32 {
    if millis <= 0 {
        return 0;
    }
    ((millis + MILLIS_PER_DAY - 1) / MILLIS_PER_DAY) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339).unwrap().to_utc()
    }

    #[test]
    fn test_monthly_mid_month_in_30_day_month() {
        let quote = prorated_upgrade(500_000, 2_000_000, BillingInterval::Month, at("2026-04-15T10:00:00Z"));
        assert_eq!(quote.total_days, 30);
        assert_eq!(quote.days_remaining, 15);
        assert_eq!(quote.amount, 750_000);
    }

    #[test]
    fn test_monthly_last_day_is_free() {
        let quote = prorated_upgrade(500_000, 2_000_000, BillingInterval::Month, at("2026-04-30T23:00:00Z"));
        assert_eq!(quote.days_remaining, 0);
        assert_eq!(quote.amount, 0);
        assert!(quote.is_free());
    }

    #[test]
    fn test_monthly_first_day() {
        let quote = prorated_upgrade(5_000, 20_000, BillingInterval::Month, at("2026-01-01T00:00:00Z"));
        assert_eq!(quote.total_days, 31);
        assert_eq!(quote.days_remaining, 30);
        // 15000 / 31 * 30 = 14516.13
        assert_eq!(quote.amount, 14_516);
    }

    #[test]
    fn test_monthly_february() {
        let quote = prorated_upgrade(20_000, 50_000, BillingInterval::Month, at("2026-02-14T00:00:00Z"));
        assert_eq!(quote.total_days, 28);
        assert_eq!(quote.days_remaining, 14);
        assert_eq!(quote.amount, 15_000);
    }

    #[test]
    fn test_yearly_window_anchored_to_month() {
        let quote = prorated_upgrade(48_000, 192_000, BillingInterval::Year, at("2026-03-15T12:00:00Z"));
        // 2026-03-01 .. 2027-03-01
        assert_eq!(quote.total_days, 365);
        // 14.5 days elapsed rounds up to 15
        assert_eq!(quote.days_remaining, 350);
        // 144000 / 365 * 350 = 138082.19
        assert_eq!(quote.amount, 138_082);
    }

    #[test]
    fn test_yearly_window_spanning_leap_day() {
        let quote = prorated_upgrade(0, 366_000, BillingInterval::Year, at("2027-06-01T00:00:00Z"));
        // 2027-06-01 .. 2028-06-01 contains 2028-02-29
        assert_eq!(quote.total_days, 366);
        assert_eq!(quote.days_remaining, 366);
        assert_eq!(quote.amount, 366_000);
    }

    #[test]
    fn test_price_decrease_never_charges() {
        let quote = prorated_upgrade(50_000, 20_000, BillingInterval::Month, at("2026-04-01T00:00:00Z"));
        assert_eq!(quote.amount, 0);
    }

    #[test]
    fn test_rounding_is_half_up() {
        assert_eq!(prorate(1, 1, 2), 1);
        assert_eq!(prorate(3, 1, 2), 2);
        assert_eq!(prorate(1, 1, 3), 0);
        assert_eq!(prorate(2, 1, 3), 1);
    }

    #[test]
    fn test_upgrade_legality_checked_first() {
        let now = at("2026-04-15T00:00:00Z");
        let err = quote_upgrade(PlanTier::Business, PlanTier::Pro, BillingInterval::Month, now).unwrap_err();
        assert!(matches!(err, BillingError::NotAnUpgrade { .. }));

        let err = quote_upgrade(PlanTier::Pro, PlanTier::Pro, BillingInterval::Month, now).unwrap_err();
        assert!(matches!(err, BillingError::NotAnUpgrade { .. }));

        let quote = quote_upgrade(PlanTier::Starter, PlanTier::Pro, BillingInterval::Month, now).unwrap();
        // (20000 - 5000) / 30 * 15
        assert_eq!(quote.amount, 7_500);
    }

    #[test]
    fn test_quote_uses_interval_prices() {
        let now = at("2026-03-01T00:00:00Z");
        let quote = quote_upgrade(PlanTier::Pro, PlanTier::Business, BillingInterval::Year, now).unwrap();
        assert_eq!(quote.total_days, 365);
        assert_eq!(quote.days_remaining, 365);
        assert_eq!(quote.amount, 480_000 - 192_000);
    }
}
