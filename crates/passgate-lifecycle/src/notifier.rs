//! Outbound notifications.
//!
//! The lifecycle never formats user-facing text. It hands typed
//! [`Notification`]s and [`ApprovalRequest`]s to a [`Notifier`] owned by the
//! front-end.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use passgate_ledger::{FailureReason, PaymentReference, Tariff, UserId};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;

/// Terminal outcome of a purchase, addressed to the buyer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
	/// Subscription extended and a fresh access link stored
	PaymentSucceeded {
		reference: PaymentReference,
		tariff: Tariff,
		subscription_end: NaiveDate,
		access_link: String,
	},
	/// Subscription extended but no link could be issued yet
	CredentialPending {
		reference: PaymentReference,
		tariff: Tariff,
		subscription_end: NaiveDate,
	},
	/// Purchase ended without payment
	PaymentEnded {
		reference: PaymentReference,
		tariff: Tariff,
		reason: FailureReason,
	},
}

impl Notification {
	pub fn reference(&self) -> PaymentReference {
		match self {
			Notification::PaymentSucceeded { reference, .. }
			| Notification::CredentialPending { reference, .. }
			| Notification::PaymentEnded { reference, .. } => *reference,
		}
	}
}

/// A manual payment waiting for an admin decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRequest {
	pub user: UserId,
	pub display_name: Option<String>,
	/// Handle the admin passes back when approving
	pub reference: PaymentReference,
	pub tariff: Tariff,
	pub currency: String,
	pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum NotifyError {
	#[error("Notification delivery failed: {0}")]
	Delivery(String),
}

/// Delivery channel to users and admins.
#[async_trait]
pub trait Notifier: Send + Sync {
	async fn notify(&self, user: &UserId, notification: Notification) -> Result<(), NotifyError>;

	async fn notify_admins(
		&self,
		admins: &[UserId],
		request: ApprovalRequest,
	) -> Result<(), NotifyError>;
}

/// Sends a notification, logging instead of propagating delivery failures.
pub(crate) async fn deliver(notifier: &dyn Notifier, user: &UserId, notification: Notification) {
	let reference = notification.reference();
	if let Err(e) = notifier.notify(user, notification).await {
		tracing::warn!(user = %user, reference = %reference, error = %e, "notification not delivered");
	}
}

/// Notifier that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
	async fn notify(&self, user: &UserId, notification: Notification) -> Result<(), NotifyError> {
		tracing::info!(user = %user, ?notification, "notification");
		Ok(())
	}

	async fn notify_admins(
		&self,
		admins: &[UserId],
		request: ApprovalRequest,
	) -> Result<(), NotifyError> {
		tracing::info!(admins = admins.len(), ?request, "approval request");
		Ok(())
	}
}

/// Notifier that keeps everything it was asked to send.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
	sent: Arc<RwLock<Vec<(UserId, Notification)>>>,
	approvals: Arc<RwLock<Vec<(Vec<UserId>, ApprovalRequest)>>>,
	fail_next: AtomicBool,
}

impl RecordingNotifier {
	pub fn new() -> Self {
		Self::default()
	}

	/// Makes the next delivery fail after recording it.
	pub fn set_fail_next(&self, fail: bool) {
		self.fail_next.store(fail, Ordering::SeqCst);
	}

	pub async fn notifications(&self) -> Vec<(UserId, Notification)> {
		self.sent.read().await.clone()
	}

	pub async fn notifications_for(&self, user: &UserId) -> Vec<Notification> {
		self.sent
			.read()
			.await
			.iter()
			.filter(|(to, _)| to == user)
			.map(|(_, notification)| notification.clone())
			.collect()
	}

	pub async fn approval_requests(&self) -> Vec<(Vec<UserId>, ApprovalRequest)> {
		self.approvals.read().await.clone()
	}

	fn take_failure(&self) -> Result<(), NotifyError> {
		if self.fail_next.swap(false, Ordering::SeqCst) {
			return Err(NotifyError::Delivery("recording notifier told to fail".to_string()));
		}
		Ok(())
	}
}

#[async_trait]
impl Notifier for RecordingNotifier {
	async fn notify(&self, user: &UserId, notification: Notification) -> Result<(), NotifyError> {
		self.sent.write().await.push((user.clone(), notification));
		self.take_failure()
	}

	async fn notify_admins(
		&self,
		admins: &[UserId],
		request: ApprovalRequest,
	) -> Result<(), NotifyError> {
		self.approvals.write().await.push((admins.to_vec(), request));
		self.take_failure()
	}
}
