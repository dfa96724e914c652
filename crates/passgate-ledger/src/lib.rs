//! # passgate-ledger
//!
//! Durable per-user subscription state for passgate.
//!
//! The ledger is one mapping from [`UserId`] to [`UserRecord`], held in memory
//! by a [`RecordManager`] and flushed through a [`LedgerStore`] on every
//! mutation. A failed flush leaves the in-memory copy untouched, so the cache
//! never runs ahead of what is on disk.
//!
//! ## Example
//!
//! ```rust
//! use passgate_ledger::{
//! 	Clock, ManualClock, MemoryStore, PaymentStage, RecordManager, Tariff, UserId,
//! };
//! use std::sync::Arc;
//!
//! let clock = Arc::new(ManualClock::default());
//! let manager = RecordManager::open(Arc::new(MemoryStore::new()), clock.clone()).unwrap();
//! let user = UserId::from(42);
//!
//! manager.ensure_user(&user, Some("alice")).unwrap();
//! manager
//! 	.begin_purchase(&user, Tariff::new("30", 250, 30), PaymentStage::AwaitingGateway, None)
//! 	.unwrap();
//! let completion = manager.complete_purchase(&user).unwrap();
//!
//! assert_eq!(completion.subscription_end, clock.today() + chrono::Days::new(30));
//! ```

pub mod clock;
pub mod error;
pub mod extension;
pub mod manager;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{LedgerError, LedgerResult};
pub use extension::extend_subscription;
pub use manager::{Completion, RecordManager};
pub use store::{JsonFileStore, Ledger, LedgerStore, MemoryStore};
pub use types::{
	FailureReason, PaymentReference, PaymentStage, PendingPayment, Tariff, TariffId, UserId,
	UserRecord,
};
