//! # passgate
//!
//! Time-limited access credentials sold for money, tracked per user across
//! repeated purchases.
//!
//! passgate records pending purchases, reconciles each of them exactly once
//! against a payment authority (gateway polling or admin approval), extends
//! subscriptions, issues access links and keeps all of it in a crash-safe
//! JSON ledger.
//!
//! ## Feature Flags
//!
//! - `lifecycle` (default) - reconciliation engine, orchestrator, settings and
//!   credential issuers
//! - `test-utils` - scriptable in-memory payment gateway
//! - `full` - everything
//!
//! ## Crates
//!
//! - [`ledger`]: user records, subscription extension rule, ledger stores
//! - [`payment`]: payment authority trait, YooKassa gateway, manual authority
//! - [`credentials`]: credential issuer trait, Shadowsocks links
//! - [`lifecycle`]: the front-end entry points and the reconciliation engine
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use passgate::prelude::*;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load("passgate.toml".as_ref())?;
//! let records = Arc::new(RecordManager::open_or_empty(
//!     Arc::new(JsonFileStore::open(&settings.ledger_path)?),
//!     Arc::new(SystemClock),
//! ));
//! let issuer = Arc::new(ShadowsocksIssuer::new(settings.shadowsocks.clone())?);
//! let engine = Reconciler::new(
//!     records,
//!     Arc::new(YooKassaGateway::new(settings.gateway.to_config())?),
//!     issuer.clone(),
//!     Arc::new(LogNotifier),
//!     ReconcilerConfig {
//!         poll_interval: settings.poll_interval(),
//!         timeout: settings.poll_timeout(),
//!     },
//! );
//! engine.resume().await?;
//!
//! let lifecycle = Lifecycle::new(engine, issuer, LifecycleConfig::from_settings(&settings));
//! let ticket = lifecycle
//!     .on_start_purchase(&UserId::from(42), Some("alice"), "30")
//!     .await?;
//! println!("{:?}", ticket.instruction);
//! # Ok(())
//! # }
//! ```

pub mod ledger;
pub mod payment;

#[cfg(feature = "lifecycle")]
pub mod credentials;
#[cfg(feature = "lifecycle")]
pub mod lifecycle;

pub use passgate_ledger::{
	Clock, JsonFileStore, LedgerError, LedgerStore, ManualClock, MemoryStore, PaymentReference,
	PaymentStage, PendingPayment, RecordManager, SystemClock, Tariff, UserId, UserRecord,
};
pub use passgate_payment::{
	IntentStatus, ManualAuthority, PaymentAuthority, PaymentError, PaymentInstruction,
	SettlementMode, YooKassaGateway,
};

#[cfg(feature = "lifecycle")]
pub use passgate_credentials::{CredentialIssuer, IssuerError, ShadowsocksIssuer};
#[cfg(feature = "lifecycle")]
pub use passgate_lifecycle::{
	Lifecycle, LifecycleConfig, LifecycleError, LogNotifier, Notification, Notifier,
	PurchaseTicket, Reconciler, ReconcilerConfig, Settings, StatusView,
};

/// Everything needed to wire a deployment.
pub mod prelude {
	pub use passgate_ledger::{
		Clock, JsonFileStore, LedgerStore, MemoryStore, RecordManager, SystemClock, Tariff, UserId,
	};
	pub use passgate_payment::{
		ManualAuthority, PaymentAuthority, PaymentInstruction, SettlementMode, YooKassaGateway,
	};

	#[cfg(feature = "lifecycle")]
	pub use passgate_credentials::{CredentialIssuer, ShadowsocksIssuer};
	#[cfg(feature = "lifecycle")]
	pub use passgate_lifecycle::{
		Lifecycle, LifecycleConfig, LogNotifier, Notification, Notifier, Reconciler,
		ReconcilerConfig, Settings,
	};
}
