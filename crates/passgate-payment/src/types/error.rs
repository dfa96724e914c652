//! Error types for payment operations.

use thiserror::Error;

/// Payment operation errors.
#[derive(Debug, Error)]
pub enum PaymentError {
	/// Invalid parameters
	#[error("Invalid parameters: {0}")]
	InvalidParameters(String),

	/// Payment provider rejected the request or answered unexpectedly
	#[error("Payment provider error: {0}")]
	ProviderError(String),

	/// Network error
	#[error("Network error: {0}")]
	NetworkError(#[from] reqwest::Error),

	/// Serialization error
	#[error("Serialization error: {0}")]
	SerializationError(#[from] serde_json::Error),

	/// Payment not found
	#[error("Payment not found: {0}")]
	NotFound(String),

	/// The provider reported a status this adapter does not know
	#[error("Unexpected payment status: {0}")]
	UnexpectedStatus(String),

	/// The operation does not exist for this authority
	#[error("Operation not supported: {0}")]
	Unsupported(&'static str),
}

impl PaymentError {
	/// Network and provider hiccups are worth another attempt later.
	pub fn is_transient(&self) -> bool {
		matches!(
			self,
			PaymentError::NetworkError(_) | PaymentError::ProviderError(_)
		)
	}
}
