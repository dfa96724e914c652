//! Lifecycle error types

use passgate_credentials::IssuerError;
use passgate_ledger::{LedgerError, UserId};
use passgate_payment::{PaymentError, SettlementMode};
use thiserror::Error;

/// Errors returned by the lifecycle entry points
#[derive(Debug, Error)]
pub enum LifecycleError {
	/// Ledger rejected or failed to persist the operation
	#[error(transparent)]
	Ledger(#[from] LedgerError),

	/// Payment authority call failed
	#[error(transparent)]
	Payment(#[from] PaymentError),

	/// Credential issuer call failed
	#[error(transparent)]
	Issuer(#[from] IssuerError),

	/// Caller is not in the admin set
	#[error("{0} is not allowed to approve payments")]
	NotAuthorized(UserId),

	/// Tariff id not in the tariff table
	#[error("Unknown tariff: {0}")]
	UnknownTariff(String),

	/// Operation belongs to the other settlement mode
	#[error("Operation requires {expected} settlement")]
	WrongMode { expected: SettlementMode },

	/// User has no subscription running today
	#[error("User {0} has no active subscription")]
	NoActiveSubscription(UserId),
}

impl LifecycleError {
	/// Whether retrying the same call later may succeed.
	pub fn is_transient(&self) -> bool {
		match self {
			LifecycleError::Ledger(e) => e.is_storage(),
			LifecycleError::Payment(e) => e.is_transient(),
			LifecycleError::Issuer(IssuerError::Unavailable(_)) => true,
			_ => false,
		}
	}
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
