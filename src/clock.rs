//! Wall-clock abstraction.
//!
//! Quota windows, proration and webhook timestamp checks all depend on "now".
//! Components take an `Arc<dyn Clock>` so tests can pin time.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use std::sync::{PoisonError, RwLock};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Reads the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: RwLock<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    /// Clock pinned to midnight UTC on the given date.
    ///
    /// # Panics
    ///
    /// Panics if the date does not exist.
    pub fn at_date(year: i32, month: u32, day: u32) -> Self {
        Self::new(
            Utc.with_ymd_and_hms(year, month, day, 0, 0, 0)
                .single()
                .expect("valid calendar date"),
        )
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Midnight UTC on the first day of `now`'s month.
pub fn start_of_utc_month(now: DateTime<Utc>) -> DateTime<Utc> {
    first_of_month(now.year(), now.month())
}

/// Number of days in `now`'s calendar month.
pub fn days_in_month(now: DateTime<Utc>) -> u32 {
    let start = start_of_utc_month(now);
    let next = add_months(start, 1);
    (next - start).num_days() as u32
}

/// Midnight UTC on the first of the month `months` after `start`'s month.
pub(crate) fn add_months(start: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    let total = start.month0() + months;
    let year = start.year() + (total / 12) as i32;
    let month = total % 12 + 1;
    first_of_month(year, month)
}

fn first_of_month(year: i32, month: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339).unwrap().to_utc()
    }

    #[test]
    fn test_start_of_month() {
        assert_eq!(
            start_of_utc_month(at("2026-03-17T13:45:00Z")),
            at("2026-03-01T00:00:00Z")
        );
        // Local offsets do not matter, the window is UTC
        assert_eq!(
            start_of_utc_month(at("2026-04-01T02:00:00+09:00")),
            at("2026-03-01T00:00:00Z")
        );
    }

    #[test]
    fn test_days_in_month() {
        assert_eq!(days_in_month(at("2026-02-10T00:00:00Z")), 28);
        assert_eq!(days_in_month(at("2028-02-10T00:00:00Z")), 29);
        assert_eq!(days_in_month(at("2026-04-30T23:59:59Z")), 30);
        assert_eq!(days_in_month(at("2026-12-31T12:00:00Z")), 31);
    }

    #[test]
    fn test_add_months_rolls_over_year() {
        assert_eq!(add_months(at("2026-11-01T00:00:00Z"), 2), at("2027-01-01T00:00:00Z"));
        assert_eq!(add_months(at("2026-03-01T00:00:00Z"), 12), at("2027-03-01T00:00:00Z"));
    }

    #[test]
    fn test_fixed_clock_moves_only_when_told() {
        let clock = FixedClock::at_date(2026, 6, 15);
        assert_eq!(clock.now(), at("2026-06-15T00:00:00Z"));
        clock.advance(Duration::hours(36));
        assert_eq!(clock.now(), at("2026-06-16T12:00:00Z"));
        clock.set(at("2025-01-01T00:00:00Z"));
        assert_eq!(clock.now(), at("2025-01-01T00:00:00Z"));
    }
}
