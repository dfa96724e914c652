//! In-memory issuer double.

use crate::{CredentialIssuer, IssuerError};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Issuer that hands out predictable links and records every call.
///
/// `fail_next(n)` makes the next `n` calls return [`IssuerError::Unavailable`].
#[derive(Debug, Default)]
pub struct RecordingIssuer {
	issued: Arc<RwLock<Vec<(String, u32)>>>,
	failures_left: AtomicUsize,
}

impl RecordingIssuer {
	pub fn new() -> Self {
		Self::default()
	}

	/// Makes the next `count` calls fail.
	pub fn fail_next(&self, count: usize) {
		self.failures_left.store(count, Ordering::SeqCst);
	}

	/// Successful issues as `(user_id, duration_days)`, oldest first.
	pub async fn issued(&self) -> Vec<(String, u32)> {
		self.issued.read().await.clone()
	}

	pub async fn issue_count(&self) -> usize {
		self.issued.read().await.len()
	}
}

#[async_trait]
impl CredentialIssuer for RecordingIssuer {
	async fn issue(&self, user_id: &str, duration_days: u32) -> Result<String, IssuerError> {
		let failing = self
			.failures_left
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
			.is_ok();
		if failing {
			return Err(IssuerError::Unavailable("Recording issuer told to fail".to_string()));
		}

		let mut issued = self.issued.write().await;
		issued.push((user_id.to_string(), duration_days));
		Ok(format!("test://{user_id}/{}", issued.len()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_fail_next_counts_down() {
		let issuer = RecordingIssuer::new();
		issuer.fail_next(2);

		assert!(issuer.issue("1", 3).await.is_err());
		assert!(issuer.issue("1", 3).await.is_err());
		assert_eq!(issuer.issue("1", 3).await.unwrap(), "test://1/1");
		assert_eq!(issuer.issued().await, vec![("1".to_string(), 3)]);
	}
}
