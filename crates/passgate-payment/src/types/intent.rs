//! Payment intent types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// How a deployment settles payments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementMode {
	/// A gateway reports the outcome; the engine polls it
	Automatic,
	/// An admin approves the payment by hand
	Manual,
}

impl fmt::Display for SettlementMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SettlementMode::Automatic => f.write_str("automatic"),
			SettlementMode::Manual => f.write_str("manual"),
		}
	}
}

/// Parameters for creating a payment intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentRequest {
	pub user_id: String,
	/// Amount in whole currency units
	pub amount: u64,
	/// ISO 4217 code, e.g. "RUB"
	pub currency: String,
	pub description: String,
	pub metadata: BTreeMap<String, String>,
}

/// What the user has to do to pay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentInstruction {
	/// Hosted payment page
	Redirect { confirmation_url: String },
	/// Free-form instruction, e.g. a bank transfer
	Manual { text: String },
}

/// Outcome of creating an intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentReceipt {
	/// Authority-side id; `None` for manual settlement
	pub intent_id: Option<String>,
	pub instruction: PaymentInstruction,
}

/// Intent status as reported by the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentStatus {
	Pending,
	Succeeded,
	Canceled,
	Expired,
	Failed,
}

impl IntentStatus {
	/// Maps a provider status string.
	///
	/// `waiting_for_capture` counts as pending: the money is held but not
	/// yet captured.
	///
	/// # Example
	///
	/// ```rust
	/// use passgate_payment::IntentStatus;
	///
	/// assert_eq!(IntentStatus::from_provider("SUCCEEDED"), Some(IntentStatus::Succeeded));
	/// assert_eq!(IntentStatus::from_provider("waiting_for_capture"), Some(IntentStatus::Pending));
	/// assert_eq!(IntentStatus::from_provider("refunded"), None);
	/// ```
	pub fn from_provider(status: &str) -> Option<Self> {
		match status.trim().to_ascii_lowercase().as_str() {
			"pending" | "waiting_for_capture" => Some(IntentStatus::Pending),
			"succeeded" => Some(IntentStatus::Succeeded),
			"canceled" | "cancelled" => Some(IntentStatus::Canceled),
			"expired" => Some(IntentStatus::Expired),
			"failed" => Some(IntentStatus::Failed),
			_ => None,
		}
	}

	pub fn is_terminal(self) -> bool {
		!matches!(self, IntentStatus::Pending)
	}
}

impl fmt::Display for IntentStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			IntentStatus::Pending => "pending",
			IntentStatus::Succeeded => "succeeded",
			IntentStatus::Canceled => "canceled",
			IntentStatus::Expired => "expired",
			IntentStatus::Failed => "failed",
		};
		f.write_str(name)
	}
}
