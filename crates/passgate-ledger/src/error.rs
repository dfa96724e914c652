//! Error types for ledger operations.

use crate::types::{PaymentReference, PaymentStage, UserId};
use thiserror::Error;

/// Result alias for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger operation errors.
#[derive(Debug, Error)]
pub enum LedgerError {
	/// The durable medium could not be read or written.
	///
	/// A mutation that fails with this error was not committed.
	#[error("Ledger storage unavailable: {0}")]
	StorageUnavailable(#[from] std::io::Error),

	/// No record exists for the user
	#[error("Unknown user: {0}")]
	UnknownUser(UserId),

	/// The user has no pending payment (or not the one named)
	#[error("No pending payment for user {0}")]
	NoPendingPayment(UserId),

	/// A fresh pending payment already exists
	#[error("User {user} already has pending payment {reference}")]
	AlreadyPending {
		user: UserId,
		reference: PaymentReference,
	},

	/// The one-time trial was already consumed
	#[error("Trial already used by user {0}")]
	TrialAlreadyUsed(UserId),

	/// The pending payment is not in a stage that allows the transition
	#[error("Pending payment of user {user} is {stage}")]
	UnexpectedStage { user: UserId, stage: PaymentStage },
}

impl LedgerError {
	/// Returns true for durable-store failures, which callers must surface.
	pub fn is_storage(&self) -> bool {
		matches!(self, LedgerError::StorageUnavailable(_))
	}

	/// Returns true when the ledger file is owned by another process.
	pub fn is_locked(&self) -> bool {
		matches!(self, LedgerError::StorageUnavailable(e) if e.kind() == std::io::ErrorKind::WouldBlock)
	}
}
