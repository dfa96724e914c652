use async_trait::async_trait;
use thiserror::Error;

/// Errors raised while issuing a credential
#[derive(Debug, Error)]
pub enum IssuerError {
	/// The backing service could not produce a credential right now
	#[error("Credential issuer unavailable: {0}")]
	Unavailable(String),

	/// The issuer is misconfigured
	#[error("Invalid issuer configuration: {0}")]
	Misconfigured(String),
}

/// Mints access credentials for paid users.
///
/// Implementations must be safe to call concurrently for different users and
/// may return a fresh credential on every call.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
	/// Issues a credential for `user_id` valid for `duration_days`.
	async fn issue(&self, user_id: &str, duration_days: u32) -> Result<String, IssuerError>;
}
