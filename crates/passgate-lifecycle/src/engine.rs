//! Reconciliation engine.
//!
//! Drives every pending payment to exactly one terminal outcome. Automatic
//! payments get one supervised poll task each, keyed by payment reference;
//! manual payments are settled through [`Reconciler::settle`] when an admin
//! approves them.
//!
//! Every terminal transition goes through the reference-guarded ledger
//! operations, so a task that lost a race (or outlived a superseded payment)
//! resolves nothing and sends nothing.

use crate::error::{LifecycleError, LifecycleResult};
use crate::notifier::{Notification, Notifier, deliver};
use parking_lot::Mutex;
use passgate_credentials::{CredentialIssuer, IssuerError};
use passgate_ledger::{
	Completion, FailureReason, LedgerError, PaymentReference, PaymentStage, PendingPayment,
	RecordManager, UserId,
};
use passgate_payment::{IntentStatus, PaymentAuthority};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};

/// Poll cadence and settlement budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
	pub poll_interval: Duration,
	/// Measured from the payment's `created_at`
	pub timeout: Duration,
}

impl Default for ReconcilerConfig {
	fn default() -> Self {
		Self {
			poll_interval: Duration::from_secs(4),
			timeout: Duration::from_secs(300),
		}
	}
}

struct Inner {
	records: Arc<RecordManager>,
	authority: Arc<dyn PaymentAuthority>,
	issuer: Arc<dyn CredentialIssuer>,
	notifier: Arc<dyn Notifier>,
	config: ReconcilerConfig,
	tasks: Mutex<HashMap<PaymentReference, JoinHandle<()>>>,
	shutdown_tx: broadcast::Sender<()>,
	closed: AtomicBool,
}

/// Owner of the poll tasks and of the success and failure paths.
///
/// Cloning is cheap and every clone drives the same set of tasks.
#[derive(Clone)]
pub struct Reconciler {
	inner: Arc<Inner>,
}

impl Reconciler {
	pub fn new(
		records: Arc<RecordManager>,
		authority: Arc<dyn PaymentAuthority>,
		issuer: Arc<dyn CredentialIssuer>,
		notifier: Arc<dyn Notifier>,
		config: ReconcilerConfig,
	) -> Self {
		let (shutdown_tx, _) = broadcast::channel(1);
		Self {
			inner: Arc::new(Inner {
				records,
				authority,
				issuer,
				notifier,
				config,
				tasks: Mutex::new(HashMap::new()),
				shutdown_tx,
				closed: AtomicBool::new(false),
			}),
		}
	}

	pub fn config(&self) -> ReconcilerConfig {
		self.inner.config
	}

	pub fn records(&self) -> &Arc<RecordManager> {
		&self.inner.records
	}

	pub fn authority(&self) -> &Arc<dyn PaymentAuthority> {
		&self.inner.authority
	}

	pub fn notifier(&self) -> &Arc<dyn Notifier> {
		&self.inner.notifier
	}

	/// Starts polling the automatic payment `pending` of `user`.
	///
	/// Returns `false` if a live task already polls this reference, the
	/// payment has no intent id, or the engine has been shut down.
	pub fn spawn_poller(&self, user: &UserId, pending: &PendingPayment) -> bool {
		let Some(intent_id) = pending.intent_id.clone() else {
			tracing::warn!(
				user = %user,
				reference = %pending.reference,
				"cannot poll a payment without an intent id"
			);
			return false;
		};
		if self.inner.closed.load(Ordering::SeqCst) {
			tracing::debug!(
				user = %user,
				reference = %pending.reference,
				"engine shut down, poller not started"
			);
			return false;
		}

		let mut tasks = self.inner.tasks.lock();
		if tasks
			.get(&pending.reference)
			.is_some_and(|handle| !handle.is_finished())
		{
			tracing::debug!(
				user = %user,
				reference = %pending.reference,
				"poller already running"
			);
			return false;
		}

		let deadline = self.tokio_deadline(pending);
		let shutdown = self.inner.shutdown_tx.subscribe();
		let handle = tokio::spawn(poll(
			Arc::clone(&self.inner),
			user.clone(),
			pending.reference,
			intent_id,
			deadline,
			shutdown,
		));
		tasks.insert(pending.reference, handle);
		tracing::info!(user = %user, reference = %pending.reference, "poller started");
		true
	}

	/// Whether a live task polls `reference`.
	pub fn is_polling(&self, reference: PaymentReference) -> bool {
		self.inner
			.tasks
			.lock()
			.get(&reference)
			.is_some_and(|handle| !handle.is_finished())
	}

	pub fn active_pollers(&self) -> usize {
		self.inner
			.tasks
			.lock()
			.values()
			.filter(|handle| !handle.is_finished())
			.count()
	}

	/// Re-attaches pollers to automatic payments found in the ledger.
	///
	/// Deadlines keep counting from each payment's `created_at`. An automatic
	/// payment that never received an intent id cannot settle and is failed.
	/// Returns the number of pollers started.
	pub async fn resume(&self) -> LifecycleResult<usize> {
		let mut started = 0;
		for (user, pending) in self.inner.records.pending_payments() {
			if pending.stage != PaymentStage::AwaitingGateway {
				continue;
			}
			if pending.intent_id.is_some() {
				if self.spawn_poller(&user, &pending) {
					started += 1;
				}
			} else {
				self.fail(&user, pending.reference, FailureReason::Failed)
					.await?;
			}
		}
		tracing::info!(pollers = started, "pending payments resumed");
		Ok(started)
	}

	/// Success path: extend the subscription, issue a link, notify.
	///
	/// Fails with [`LedgerError::NoPendingPayment`] if `reference` is no
	/// longer pending. Issuer or link-flush failures do not fail the call;
	/// the user gets [`Notification::CredentialPending`] instead.
	pub async fn settle(
		&self,
		user: &UserId,
		reference: PaymentReference,
	) -> LifecycleResult<Notification> {
		settle(&self.inner, user, reference).await
	}

	/// Clears `reference` with `reason` and notifies the user once.
	///
	/// Returns `false` when the payment was no longer pending.
	pub async fn fail(
		&self,
		user: &UserId,
		reference: PaymentReference,
		reason: FailureReason,
	) -> LifecycleResult<bool> {
		fail(&self.inner, user, reference, reason).await
	}

	/// Resolves a stale automatic payment that no task polls.
	///
	/// Asks the payment authority once and settles or fails the payment on a
	/// final status. A payment that is still pending, or whose status cannot
	/// be read, is failed with [`FailureReason::TimedOut`]. Returns `false`
	/// when the payment was no longer pending.
	pub async fn conclude(&self, user: &UserId, pending: &PendingPayment) -> LifecycleResult<bool> {
		let Some(intent_id) = pending.intent_id.as_deref() else {
			return fail(&self.inner, user, pending.reference, FailureReason::TimedOut).await;
		};
		let status = match self.inner.authority.query_status(intent_id).await {
			Ok(status) => status,
			Err(e) => {
				tracing::warn!(
					user = %user,
					reference = %pending.reference,
					error = %e,
					"final status query failed"
				);
				IntentStatus::Pending
			}
		};
		if status == IntentStatus::Succeeded {
			return match settle(&self.inner, user, pending.reference).await {
				Ok(_) => Ok(true),
				Err(LifecycleError::Ledger(LedgerError::NoPendingPayment(_))) => Ok(false),
				Err(e) => Err(e),
			};
		}
		let reason = failure_reason(status).unwrap_or(FailureReason::TimedOut);
		fail(&self.inner, user, pending.reference, reason).await
	}

	/// Stops every poll task and waits for them to exit.
	///
	/// Pending payments stay in the ledger for [`Reconciler::resume`].
	pub async fn shutdown(&self) {
		self.inner.closed.store(true, Ordering::SeqCst);
		let _ = self.inner.shutdown_tx.send(());

		let handles: Vec<_> = self.inner.tasks.lock().drain().collect();
		for (reference, handle) in handles {
			if let Err(e) = handle.await {
				tracing::error!(reference = %reference, error = %e, "poller panicked");
			}
		}
		tracing::info!("reconciler stopped");
	}

	fn tokio_deadline(&self, pending: &PendingPayment) -> Instant {
		let clock = self.inner.records.clock();
		let remaining = (pending.deadline(self.inner.config.timeout) - clock.now())
			.to_std()
			.unwrap_or(Duration::ZERO);
		let now = Instant::now();
		now.checked_add(remaining).unwrap_or(now + self.inner.config.timeout)
	}
}

async fn poll(
	inner: Arc<Inner>,
	user: UserId,
	reference: PaymentReference,
	intent_id: String,
	deadline: Instant,
	mut shutdown: broadcast::Receiver<()>,
) {
	// Set once the gateway reported success but the ledger refused it.
	let mut paid = false;
	loop {
		let nap = inner
			.config
			.poll_interval
			.min(deadline.saturating_duration_since(Instant::now()));
		tokio::select! {
			_ = shutdown.recv() => {
				tracing::debug!(user = %user, reference = %reference, "poller stopped by shutdown");
				return;
			}
			_ = sleep(nap) => {}
		}

		if !still_pending(&inner, &user, reference) {
			tracing::debug!(
				user = %user,
				reference = %reference,
				"payment resolved elsewhere, poller exits"
			);
			break;
		}

		match inner.authority.query_status(&intent_id).await {
			Ok(IntentStatus::Succeeded) => match settle(&inner, &user, reference).await {
				Ok(_) => break,
				Err(LifecycleError::Ledger(LedgerError::NoPendingPayment(_))) => {
					tracing::debug!(user = %user, reference = %reference, "duplicate success ignored");
					break;
				}
				Err(e) => {
					paid = true;
					tracing::error!(
						user = %user,
						reference = %reference,
						error = %e,
						"failed to record successful payment, will retry"
					);
				}
			},
			Ok(IntentStatus::Pending) => {
				tracing::debug!(user = %user, reference = %reference, "payment still pending");
			}
			Ok(status) => {
				let reason = failure_reason(status).unwrap_or(FailureReason::Failed);
				if let Err(e) = fail(&inner, &user, reference, reason).await {
					tracing::error!(
						user = %user,
						reference = %reference,
						error = %e,
						"failed to record ended payment"
					);
				}
				break;
			}
			Err(e) => {
				tracing::warn!(user = %user, reference = %reference, error = %e, "status query failed");
			}
		}

		if Instant::now() >= deadline {
			if paid {
				tracing::error!(
					user = %user,
					reference = %reference,
					"successful payment still unrecorded at deadline, left pending"
				);
			} else if let Err(e) = fail(&inner, &user, reference, FailureReason::TimedOut).await {
				tracing::error!(
					user = %user,
					reference = %reference,
					error = %e,
					"failed to record timed out payment"
				);
			}
			break;
		}
	}

	inner.tasks.lock().remove(&reference);
}

/// Failure reason for a final unsuccessful status.
fn failure_reason(status: IntentStatus) -> Option<FailureReason> {
	match status {
		IntentStatus::Canceled => Some(FailureReason::Canceled),
		IntentStatus::Expired => Some(FailureReason::Expired),
		IntentStatus::Failed => Some(FailureReason::Failed),
		IntentStatus::Pending | IntentStatus::Succeeded => None,
	}
}

fn still_pending(inner: &Inner, user: &UserId, reference: PaymentReference) -> bool {
	inner
		.records
		.snapshot(user)
		.ok()
		.and_then(|record| record.pending_payment)
		.is_some_and(|pending| pending.reference == reference)
}

async fn settle(
	inner: &Inner,
	user: &UserId,
	reference: PaymentReference,
) -> LifecycleResult<Notification> {
	let Completion {
		reference,
		tariff,
		subscription_end,
	} = inner.records.complete_purchase_for(user, reference)?;

	let notification = match issue_link(inner, user, tariff.duration_days).await {
		Some(access_link) => Notification::PaymentSucceeded {
			reference,
			tariff,
			subscription_end,
			access_link,
		},
		None => Notification::CredentialPending {
			reference,
			tariff,
			subscription_end,
		},
	};
	deliver(inner.notifier.as_ref(), user, notification.clone()).await;
	Ok(notification)
}

/// Issues and stores a link, retrying issuance once.
async fn issue_link(inner: &Inner, user: &UserId, duration_days: u32) -> Option<String> {
	let link = match issue_with_retry(inner.issuer.as_ref(), user, duration_days).await {
		Ok(link) => link,
		Err(e) => {
			tracing::error!(user = %user, error = %e, "credential issuance failed, link pending");
			return None;
		}
	};
	if let Err(e) = inner.records.set_access_link(user, &link) {
		tracing::error!(user = %user, error = %e, "failed to store access link, link pending");
		return None;
	}
	Some(link)
}

pub(crate) async fn issue_with_retry(
	issuer: &dyn CredentialIssuer,
	user: &UserId,
	duration_days: u32,
) -> Result<String, IssuerError> {
	match issuer.issue(user.as_str(), duration_days).await {
		Ok(link) => Ok(link),
		Err(e) => {
			tracing::warn!(user = %user, error = %e, "credential issuance failed, retrying once");
			issuer.issue(user.as_str(), duration_days).await
		}
	}
}

async fn fail(
	inner: &Inner,
	user: &UserId,
	reference: PaymentReference,
	reason: FailureReason,
) -> LifecycleResult<bool> {
	let Some(pending) = inner.records.fail_purchase_for(user, reference, reason)? else {
		tracing::debug!(
			user = %user,
			reference = %reference,
			reason = %reason,
			"payment already resolved"
		);
		return Ok(false);
	};
	let notification = Notification::PaymentEnded {
		reference: pending.reference,
		tariff: pending.tariff,
		reason,
	};
	deliver(inner.notifier.as_ref(), user, notification).await;
	Ok(true)
}
