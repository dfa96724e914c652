//! User Record Manager.
//!
//! [`RecordManager`] is the only writer of user records. Every mutation runs
//! under one lock: read the record, apply the change to a copy, flush the
//! whole ledger, and only then publish the copy to the cache. A failed flush
//! rolls the cache back to the previous record.

use crate::clock::Clock;
use crate::error::{LedgerError, LedgerResult};
use crate::extension::extend_subscription;
use crate::store::{Ledger, LedgerStore};
use crate::types::{
	FailureReason, PaymentReference, PaymentStage, PendingPayment, Tariff, UserId, UserRecord,
};
use chrono::NaiveDate;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Result of a completed purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
	pub reference: PaymentReference,
	pub tariff: Tariff,
	pub subscription_end: NaiveDate,
}

/// Owner of the in-memory ledger cache.
pub struct RecordManager {
	store: Arc<dyn LedgerStore>,
	clock: Arc<dyn Clock>,
	cache: Mutex<Ledger>,
}

impl RecordManager {
	/// Loads the ledger from `store`.
	pub fn open(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> LedgerResult<Self> {
		let ledger = store.load()?;
		tracing::info!(users = ledger.len(), store = %store.describe(), "ledger loaded");
		Ok(Self {
			store,
			clock,
			cache: Mutex::new(ledger),
		})
	}

	/// Loads the ledger, starting from an empty one if the store is unreadable.
	///
	/// The unreadable medium is not touched until the first mutation flushes.
	pub fn open_or_empty(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
		let ledger = match store.load() {
			Ok(ledger) => ledger,
			Err(e) => {
				tracing::warn!(
					error = %e,
					store = %store.describe(),
					"ledger unreadable, starting from an empty ledger"
				);
				Ledger::new()
			}
		};
		Self {
			store,
			clock,
			cache: Mutex::new(ledger),
		}
	}

	pub fn clock(&self) -> &Arc<dyn Clock> {
		&self.clock
	}

	/// Creates a default record for `user` if none exists.
	///
	/// Returns `true` when a record was created.
	pub fn ensure_user(&self, user: &UserId, display_name: Option<&str>) -> LedgerResult<bool> {
		let mut cache = self.cache.lock();
		if cache.contains_key(user) {
			return Ok(false);
		}
		cache.insert(user.clone(), UserRecord::new(display_name));
		if let Err(e) = self.store.save(&cache) {
			cache.remove(user);
			tracing::error!(user = %user, error = %e, "failed to persist new user");
			return Err(e);
		}
		tracing::info!(user = %user, "user registered");
		Ok(true)
	}

	/// Attaches a new pending payment for `tariff`.
	///
	/// A pending payment older than `stale_after` is superseded; a fresher one
	/// rejects the purchase with [`LedgerError::AlreadyPending`]. `None` never
	/// treats a pending payment as stale.
	pub fn begin_purchase(
		&self,
		user: &UserId,
		tariff: Tariff,
		stage: PaymentStage,
		stale_after: Option<Duration>,
	) -> LedgerResult<PendingPayment> {
		let now = self.clock.now();
		self.mutate(user, |record| {
			if tariff.is_trial() && record.trial_used {
				return Err(LedgerError::TrialAlreadyUsed(user.clone()));
			}
			if let Some(existing) = &record.pending_payment {
				let stale = stale_after.is_some_and(|budget| existing.is_stale(now, budget));
				if !stale {
					return Err(LedgerError::AlreadyPending {
						user: user.clone(),
						reference: existing.reference,
					});
				}
				tracing::info!(
					user = %user,
					reference = %existing.reference,
					reason = %FailureReason::Superseded,
					"stale pending payment replaced"
				);
			}
			let pending = PendingPayment::new(tariff, stage, now);
			record.pending_payment = Some(pending.clone());
			Ok(pending)
		})
	}

	/// Attaches the payment authority's intent id to the pending payment `reference`.
	///
	/// Returns `false` without touching anything if that payment is no longer
	/// pending (it may have been resolved concurrently).
	pub fn record_intent_id(
		&self,
		user: &UserId,
		reference: PaymentReference,
		intent_id: &str,
	) -> LedgerResult<bool> {
		self.mutate(user, |record| match &mut record.pending_payment {
			Some(pending) if pending.reference == reference => {
				pending.intent_id = Some(intent_id.to_string());
				Ok(true)
			}
			_ => Ok(false),
		})
	}

	/// Completes whatever payment is pending for `user`.
	pub fn complete_purchase(&self, user: &UserId) -> LedgerResult<Completion> {
		self.complete(user, None)
	}

	/// Completes the pending payment `reference`.
	///
	/// Fails with [`LedgerError::NoPendingPayment`] if it was already resolved
	/// or superseded, so a repeated success can never extend twice.
	pub fn complete_purchase_for(
		&self,
		user: &UserId,
		reference: PaymentReference,
	) -> LedgerResult<Completion> {
		self.complete(user, Some(reference))
	}

	fn complete(
		&self,
		user: &UserId,
		reference: Option<PaymentReference>,
	) -> LedgerResult<Completion> {
		let today = self.clock.today();
		let completion = self.mutate(user, |record| {
			let pending = take_pending(record, reference)
				.ok_or_else(|| LedgerError::NoPendingPayment(user.clone()))?;
			let end = extend_subscription(
				record.subscription_end,
				today,
				pending.tariff.duration_days,
			);
			record.subscription_end = Some(end);
			record.is_paid = true;
			if pending.tariff.is_trial() {
				record.trial_used = true;
			}
			Ok(Completion {
				reference: pending.reference,
				tariff: pending.tariff,
				subscription_end: end,
			})
		})?;
		tracing::info!(
			user = %user,
			reference = %completion.reference,
			tariff = %completion.tariff.id,
			subscription_end = %completion.subscription_end,
			"purchase completed"
		);
		Ok(completion)
	}

	/// Clears whatever payment is pending for `user`.
	///
	/// Idempotent: returns `None` when nothing was pending.
	pub fn fail_purchase(
		&self,
		user: &UserId,
		reason: FailureReason,
	) -> LedgerResult<Option<PendingPayment>> {
		self.fail(user, None, reason)
	}

	/// Clears the pending payment `reference`, if it is still the pending one.
	pub fn fail_purchase_for(
		&self,
		user: &UserId,
		reference: PaymentReference,
		reason: FailureReason,
	) -> LedgerResult<Option<PendingPayment>> {
		self.fail(user, Some(reference), reason)
	}

	fn fail(
		&self,
		user: &UserId,
		reference: Option<PaymentReference>,
		reason: FailureReason,
	) -> LedgerResult<Option<PendingPayment>> {
		let cleared = self.mutate(user, |record| Ok(take_pending(record, reference)))?;
		if let Some(pending) = &cleared {
			tracing::info!(
				user = %user,
				reference = %pending.reference,
				reason = %reason,
				"pending payment cleared"
			);
		}
		Ok(cleared)
	}

	/// Moves a manual payment from awaiting user confirmation to awaiting admin approval.
	///
	/// Returns the pending payment and whether this call made the transition.
	pub fn mark_awaiting_approval(&self, user: &UserId) -> LedgerResult<(PendingPayment, bool)> {
		self.mutate(user, |record| {
			let pending = record
				.pending_payment
				.as_mut()
				.ok_or_else(|| LedgerError::NoPendingPayment(user.clone()))?;
			match pending.stage {
				PaymentStage::AwaitingUserConfirmation => {
					pending.stage = PaymentStage::AwaitingAdminApproval;
					Ok((pending.clone(), true))
				}
				PaymentStage::AwaitingAdminApproval => Ok((pending.clone(), false)),
				stage @ PaymentStage::AwaitingGateway => Err(LedgerError::UnexpectedStage {
					user: user.clone(),
					stage,
				}),
			}
		})
	}

	/// Stores the last issued access link.
	pub fn set_access_link(&self, user: &UserId, link: &str) -> LedgerResult<()> {
		self.mutate(user, |record| {
			record.access_link = Some(link.to_string());
			Ok(())
		})
	}

	/// Copy of the record for `user`.
	pub fn snapshot(&self, user: &UserId) -> LedgerResult<UserRecord> {
		self.cache
			.lock()
			.get(user)
			.cloned()
			.ok_or_else(|| LedgerError::UnknownUser(user.clone()))
	}

	/// Copy of the whole ledger.
	pub fn snapshot_all(&self) -> Ledger {
		self.cache.lock().clone()
	}

	/// Every pending payment, by user.
	pub fn pending_payments(&self) -> Vec<(UserId, PendingPayment)> {
		self.cache
			.lock()
			.iter()
			.filter_map(|(user, record)| {
				record
					.pending_payment
					.clone()
					.map(|pending| (user.clone(), pending))
			})
			.collect()
	}

	pub fn len(&self) -> usize {
		self.cache.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.cache.lock().is_empty()
	}

	/// Read-modify-flush of one record under the writer lock.
	///
	/// Unchanged records are not flushed. On flush failure the cached record
	/// is restored before the error is returned.
	fn mutate<T>(
		&self,
		user: &UserId,
		apply: impl FnOnce(&mut UserRecord) -> LedgerResult<T>,
	) -> LedgerResult<T> {
		let mut cache = self.cache.lock();
		let current = cache
			.get(user)
			.ok_or_else(|| LedgerError::UnknownUser(user.clone()))?;
		let mut next = current.clone();
		let output = apply(&mut next)?;
		if next == *current {
			return Ok(output);
		}

		let previous = cache.insert(user.clone(), next);
		if let Err(e) = self.store.save(&cache) {
			if let Some(previous) = previous {
				cache.insert(user.clone(), previous);
			}
			tracing::error!(user = %user, error = %e, "ledger flush failed, mutation discarded");
			return Err(e);
		}
		Ok(output)
	}
}

fn take_pending(
	record: &mut UserRecord,
	reference: Option<PaymentReference>,
) -> Option<PendingPayment> {
	let named = match (&record.pending_payment, reference) {
		(Some(pending), Some(expected)) => pending.reference == expected,
		_ => true,
	};
	if named {
		record.pending_payment.take()
	} else {
		None
	}
}
