//! # passgate-lifecycle
//!
//! Subscription and payment lifecycle.
//!
//! - [`Lifecycle`]: entry points for the front-end (start purchase, manual
//!   payment confirmation, admin approval, status, credential reissue)
//! - [`Reconciler`]: drives pending payments to exactly one terminal outcome
//! - [`Settings`]: TOML and environment configuration
//! - [`Notifier`]: outbound channel for typed notifications
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use passgate_credentials::RecordingIssuer;
//! use passgate_ledger::{MemoryStore, RecordManager, SystemClock, UserId};
//! use passgate_lifecycle::{Lifecycle, LifecycleConfig, Reconciler, RecordingNotifier, Settings};
//! use passgate_payment::{ManualAuthority, PaymentInstruction, SettlementMode};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let mut settings = Settings::default();
//! settings.mode = SettlementMode::Manual;
//! settings.admins = vec!["1".to_string()];
//!
//! let records = Arc::new(RecordManager::open(Arc::new(MemoryStore::new()), Arc::new(SystemClock)).unwrap());
//! let issuer = Arc::new(RecordingIssuer::new());
//! let engine = Reconciler::new(
//!     records,
//!     Arc::new(ManualAuthority::default()),
//!     issuer.clone(),
//!     Arc::new(RecordingNotifier::new()),
//!     Default::default(),
//! );
//! let lifecycle = Lifecycle::new(engine, issuer, LifecycleConfig::from_settings(&settings));
//!
//! let user = UserId::from(42);
//! let ticket = lifecycle.on_start_purchase(&user, Some("alice"), "30").await.unwrap();
//! assert!(matches!(ticket.instruction, PaymentInstruction::Manual { .. }));
//!
//! lifecycle.on_user_asserts_paid(&user).await.unwrap();
//! lifecycle.on_admin_approve(&UserId::from(1), &user).await.unwrap();
//! assert!(lifecycle.on_status_query(&user).await.unwrap().active);
//! # });
//! ```

pub mod engine;
pub mod error;
pub mod notifier;
pub mod orchestrator;
pub mod settings;

pub use engine::{Reconciler, ReconcilerConfig};
pub use error::{LifecycleError, LifecycleResult};
pub use notifier::{
	ApprovalRequest, LogNotifier, Notification, Notifier, NotifyError, RecordingNotifier,
};
pub use orchestrator::{
	ApprovalPending, Lifecycle, LifecycleConfig, PendingView, PurchaseTicket, StatusView,
};
pub use settings::{
	GatewaySettings, LogFormat, LoggingSettings, Settings, SettingsError, TariffSettings,
};
