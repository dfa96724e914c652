//! # passgate-payment
//!
//! Payment authority adapters.
//!
//! A [`PaymentAuthority`] creates payment intents and reports their status.
//! Two implementations exist:
//!
//! - [`YooKassaGateway`]: automatic settlement through the YooKassa HTTP API.
//!   The caller polls [`PaymentAuthority::query_status`] until a terminal status.
//! - [`ManualAuthority`]: no gateway at all. The intent is a payment
//!   instruction for the user, and settlement is an admin decision.
//!
//! Each call makes exactly one attempt; retry policy belongs to the caller.

pub mod authority;
pub mod manual;
pub mod types;
pub mod yookassa;

pub use authority::PaymentAuthority;
pub use manual::ManualAuthority;
pub use types::error::PaymentError;
pub use types::intent::{
	IntentReceipt, IntentRequest, IntentStatus, PaymentInstruction, SettlementMode,
};
pub use yookassa::{YooKassaConfig, YooKassaGateway};
