//! Subscription extension rule.

use chrono::{Days, NaiveDate};

/// Computes the new subscription end after a purchase of `duration_days`.
///
/// An end dated today or later is still active and gets stacked on; a missing
/// or lapsed end restarts from `today`.
///
/// # Example
///
/// ```rust
/// use chrono::NaiveDate;
/// use passgate_ledger::extend_subscription;
///
/// let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
/// let renewed = extend_subscription(Some(today), today, 30);
/// assert_eq!(renewed, NaiveDate::from_ymd_opt(2026, 4, 9).unwrap());
/// ```
pub fn extend_subscription(
	current_end: Option<NaiveDate>,
	today: NaiveDate,
	duration_days: u32,
) -> NaiveDate {
	let base = match current_end {
		Some(end) if end >= today => end,
		_ => today,
	};
	base.checked_add_days(Days::new(u64::from(duration_days)))
		.unwrap_or(NaiveDate::MAX)
}
