//! Ledger data model.
//!
//! Field names of [`UserRecord`] follow the persisted JSON layout
//! (`username`, `is_paid`, `subscription_end`, `trial_used`,
//! `vpn_config_link`, `pending_payment`).

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Stable identifier of an end user in the external identity system.
///
/// # Example
///
/// ```rust
/// use passgate_ledger::UserId;
///
/// let id = UserId::from(1001);
/// assert_eq!(id.as_str(), "1001");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for UserId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for UserId {
	fn from(id: &str) -> Self {
		Self::new(id)
	}
}

impl From<String> for UserId {
	fn from(id: String) -> Self {
		Self(id)
	}
}

impl From<i64> for UserId {
	fn from(id: i64) -> Self {
		Self(id.to_string())
	}
}

/// Name of a tariff in the configured tariff table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TariffId(String);

impl TariffId {
	/// Identifier of the one-time trial tariff
	pub const TRIAL: &'static str = "trial";

	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	pub fn trial() -> Self {
		Self::new(Self::TRIAL)
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn is_trial(&self) -> bool {
		self.0 == Self::TRIAL
	}
}

impl fmt::Display for TariffId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for TariffId {
	fn from(id: &str) -> Self {
		Self::new(id)
	}
}

/// Tariff snapshot taken when a purchase starts.
///
/// The snapshot travels with the pending payment, so a tariff table edited
/// while a payment is in flight does not change what the buyer gets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tariff {
	pub id: TariffId,
	/// Price in whole currency units
	pub price: u64,
	pub duration_days: u32,
}

impl Tariff {
	pub fn new(id: impl Into<String>, price: u64, duration_days: u32) -> Self {
		Self {
			id: TariffId::new(id),
			price,
			duration_days,
		}
	}

	pub fn is_trial(&self) -> bool {
		self.id.is_trial()
	}
}

/// Local identifier of one purchase attempt.
///
/// # Example
///
/// ```rust
/// use passgate_ledger::PaymentReference;
///
/// let a = PaymentReference::new();
/// let b: PaymentReference = a.to_string().parse().unwrap();
/// assert_eq!(a, b);
/// assert_ne!(a, PaymentReference::new());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentReference(pub uuid::Uuid);

impl PaymentReference {
	pub fn new() -> Self {
		Self(uuid::Uuid::new_v4())
	}
}

impl Default for PaymentReference {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for PaymentReference {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for PaymentReference {
	type Err = uuid::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(Self(uuid::Uuid::parse_str(s)?))
	}
}

/// Where a pending payment is waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStage {
	/// Automatic mode: waiting for the gateway to report a terminal status
	AwaitingGateway,
	/// Manual mode: instruction sent, the user has not claimed payment yet
	AwaitingUserConfirmation,
	/// Manual mode: the user claims to have paid, an admin must approve
	AwaitingAdminApproval,
}

impl PaymentStage {
	pub fn is_manual(self) -> bool {
		!matches!(self, PaymentStage::AwaitingGateway)
	}
}

impl fmt::Display for PaymentStage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			PaymentStage::AwaitingGateway => "awaiting_gateway",
			PaymentStage::AwaitingUserConfirmation => "awaiting_user_confirmation",
			PaymentStage::AwaitingAdminApproval => "awaiting_admin_approval",
		};
		f.write_str(name)
	}
}

/// Why a pending payment ended without success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
	Canceled,
	Expired,
	Failed,
	TimedOut,
	/// Replaced by a newer purchase attempt after going stale
	Superseded,
}

impl fmt::Display for FailureReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			FailureReason::Canceled => "canceled",
			FailureReason::Expired => "expired",
			FailureReason::Failed => "failed",
			FailureReason::TimedOut => "timed_out",
			FailureReason::Superseded => "superseded",
		};
		f.write_str(name)
	}
}

/// A purchase attempt that has not reached a terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPayment {
	pub reference: PaymentReference,
	/// Payment authority's intent id; absent in manual mode
	#[serde(default)]
	pub intent_id: Option<String>,
	pub tariff: Tariff,
	pub created_at: DateTime<Utc>,
	pub stage: PaymentStage,
}

impl PendingPayment {
	pub fn new(tariff: Tariff, stage: PaymentStage, created_at: DateTime<Utc>) -> Self {
		Self {
			reference: PaymentReference::new(),
			intent_id: None,
			tariff,
			created_at,
			stage,
		}
	}

	/// Instant after which the payment counts as timed out.
	pub fn deadline(&self, budget: Duration) -> DateTime<Utc> {
		self.created_at
			.checked_add_signed(to_delta(budget))
			.unwrap_or(DateTime::<Utc>::MAX_UTC)
	}

	/// Returns true once `budget` has elapsed since `created_at`.
	pub fn is_stale(&self, now: DateTime<Utc>, budget: Duration) -> bool {
		now >= self.deadline(budget)
	}
}

fn to_delta(duration: Duration) -> TimeDelta {
	TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Per-user subscription state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
	/// Informational label only
	#[serde(default)]
	pub username: Option<String>,
	/// Set once any payment completes; entitlement uses `subscription_end`
	#[serde(default)]
	pub is_paid: bool,
	#[serde(default)]
	pub subscription_end: Option<NaiveDate>,
	/// Monotonic
	#[serde(default)]
	pub trial_used: bool,
	#[serde(default, rename = "vpn_config_link")]
	pub access_link: Option<String>,
	#[serde(default)]
	pub pending_payment: Option<PendingPayment>,
}

impl UserRecord {
	pub fn new(username: Option<&str>) -> Self {
		Self {
			username: username.filter(|name| !name.is_empty()).map(str::to_string),
			..Self::default()
		}
	}

	/// Entitlement window check at day resolution.
	///
	/// # Example
	///
	/// ```rust
	/// use chrono::NaiveDate;
	/// use passgate_ledger::UserRecord;
	///
	/// let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
	/// let mut record = UserRecord::new(None);
	/// assert!(!record.is_active(today));
	///
	/// record.subscription_end = Some(today);
	/// assert!(record.is_active(today));
	/// ```
	pub fn is_active(&self, today: NaiveDate) -> bool {
		self.subscription_end.is_some_and(|end| end >= today)
	}

	/// Whole days of entitlement left, counting today.
	pub fn remaining_days(&self, today: NaiveDate) -> u32 {
		match self.subscription_end {
			Some(end) if end >= today => {
				let days = (end - today).num_days() + 1;
				u32::try_from(days).unwrap_or(u32::MAX)
			}
			_ => 0,
		}
	}
}
