//! Time source abstraction.
//!
//! Subscription dates are compared at day resolution against [`Clock::today`];
//! timeouts use [`Clock::now`].

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use parking_lot::Mutex;
use std::fmt;

/// Source of "now".
pub trait Clock: Send + Sync + fmt::Debug {
	fn now(&self) -> DateTime<Utc>;

	/// Calendar date of [`Clock::now`] in UTC.
	fn today(&self) -> NaiveDate {
		self.now().date_naive()
	}
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}

/// Settable clock for tests and dry runs.
///
/// # Example
///
/// ```rust
/// use chrono::TimeDelta;
/// use passgate_ledger::{Clock, ManualClock};
///
/// let clock = ManualClock::default();
/// let before = clock.now();
/// clock.advance(TimeDelta::days(2));
/// assert_eq!(clock.now() - before, TimeDelta::days(2));
/// ```
#[derive(Debug)]
pub struct ManualClock {
	now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
	pub fn new(now: DateTime<Utc>) -> Self {
		Self {
			now: Mutex::new(now),
		}
	}

	pub fn set(&self, now: DateTime<Utc>) {
		*self.now.lock() = now;
	}

	pub fn advance(&self, by: TimeDelta) {
		let mut now = self.now.lock();
		*now += by;
	}
}

impl Default for ManualClock {
	/// Starts at 2026-03-10 12:00:00 UTC.
	fn default() -> Self {
		let start = NaiveDate::from_ymd_opt(2026, 3, 10)
			.and_then(|date| date.and_hms_opt(12, 0, 0))
			.map(|naive| naive.and_utc())
			.unwrap_or_else(Utc::now);
		Self::new(start)
	}
}

impl Clock for ManualClock {
	fn now(&self) -> DateTime<Utc> {
		*self.now.lock()
	}
}
