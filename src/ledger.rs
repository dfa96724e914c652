//! Subscription ledger.
//!
//! ```rust
//! use passgate::ledger::extend_subscription;
//! use chrono::NaiveDate;
//!
//! let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
//! let end = extend_subscription(None, today, 30);
//! assert_eq!(end, NaiveDate::from_ymd_opt(2026, 4, 9).unwrap());
//! ```

pub use passgate_ledger::*;
