//! Front-end entry points.
//!
//! [`Lifecycle`] validates preconditions, records state through the
//! [`RecordManager`] and hands pending payments to the [`Reconciler`]. It
//! returns typed results; rendering them is the front-end's job.

use crate::engine::{Reconciler, issue_with_retry};
use crate::error::{LifecycleError, LifecycleResult};
use crate::notifier::{ApprovalRequest, Notification};
use crate::settings::{Settings, TariffSettings};
use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexMap;
use passgate_credentials::CredentialIssuer;
use passgate_ledger::{
	FailureReason, LedgerError, PaymentReference, PaymentStage, PendingPayment, RecordManager,
	Tariff, UserId, UserRecord,
};
use passgate_payment::{IntentRequest, PaymentInstruction, SettlementMode};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Catalogue and policy values the entry points need.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
	pub tariffs: IndexMap<String, TariffSettings>,
	pub currency: String,
	pub admins: Vec<UserId>,
	pub manual_timeout: Option<Duration>,
}

impl LifecycleConfig {
	pub fn from_settings(settings: &Settings) -> Self {
		Self {
			tariffs: settings.tariffs.clone(),
			currency: settings.currency.clone(),
			admins: settings.admin_ids(),
			manual_timeout: settings.manual_timeout(),
		}
	}

	fn tariff(&self, id: &str) -> Option<(Tariff, &str)> {
		self.tariffs.get(id).map(|tariff| {
			(
				Tariff::new(id, tariff.price, tariff.duration_days),
				tariff.description.as_str(),
			)
		})
	}
}

/// What the user needs to pay for a started purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseTicket {
	pub reference: PaymentReference,
	pub tariff: Tariff,
	pub currency: String,
	pub mode: SettlementMode,
	pub intent_id: Option<String>,
	pub instruction: PaymentInstruction,
}

/// Result of a user saying they paid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalPending {
	pub reference: PaymentReference,
	/// `false` when admins had already been asked for this payment
	pub admins_notified: bool,
}

/// Pending payment as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingView {
	pub reference: PaymentReference,
	pub tariff: Tariff,
	pub stage: PaymentStage,
	pub created_at: DateTime<Utc>,
}

impl From<PendingPayment> for PendingView {
	fn from(pending: PendingPayment) -> Self {
		Self {
			reference: pending.reference,
			tariff: pending.tariff,
			stage: pending.stage,
			created_at: pending.created_at,
		}
	}
}

/// Subscription state of one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusView {
	pub user: UserId,
	pub registered: bool,
	pub active: bool,
	pub subscription_end: Option<NaiveDate>,
	/// Counting today
	pub remaining_days: u32,
	pub trial_used: bool,
	pub access_link: Option<String>,
	pub pending: Option<PendingView>,
}

impl StatusView {
	/// View of a stored record as of `today`; `None` is an unregistered user.
	pub fn from_stored(user: &UserId, record: Option<UserRecord>, today: NaiveDate) -> Self {
		let registered = record.is_some();
		let record = record.unwrap_or_default();
		Self {
			user: user.clone(),
			registered,
			active: record.is_active(today),
			subscription_end: record.subscription_end,
			remaining_days: record.remaining_days(today),
			trial_used: record.trial_used,
			access_link: record.access_link,
			pending: record.pending_payment.map(PendingView::from),
		}
	}
}

/// Lifecycle orchestrator.
#[derive(Clone)]
pub struct Lifecycle {
	engine: Reconciler,
	issuer: Arc<dyn CredentialIssuer>,
	config: Arc<LifecycleConfig>,
}

impl Lifecycle {
	pub fn new(
		engine: Reconciler,
		issuer: Arc<dyn CredentialIssuer>,
		config: LifecycleConfig,
	) -> Self {
		Self {
			engine,
			issuer,
			config: Arc::new(config),
		}
	}

	pub fn engine(&self) -> &Reconciler {
		&self.engine
	}

	pub fn records(&self) -> &Arc<RecordManager> {
		self.engine.records()
	}

	pub fn mode(&self) -> SettlementMode {
		self.engine.authority().mode()
	}

	/// Tariffs in display order.
	pub fn tariffs(&self) -> impl Iterator<Item = (&str, &TariffSettings)> {
		self.config
			.tariffs
			.iter()
			.map(|(id, tariff)| (id.as_str(), tariff))
	}

	/// Starts a purchase of `tariff_id` for `user`.
	///
	/// Registers the user if needed, records the pending payment, creates the
	/// payment intent and, in automatic mode, starts polling it. A stale
	/// pending payment nobody polls is resolved first and its owner notified.
	/// If the intent cannot be created the pending payment is cleared again.
	pub async fn on_start_purchase(
		&self,
		user: &UserId,
		display_name: Option<&str>,
		tariff_id: &str,
	) -> LifecycleResult<PurchaseTicket> {
		let (tariff, description) = self
			.config
			.tariff(tariff_id)
			.ok_or_else(|| LifecycleError::UnknownTariff(tariff_id.to_string()))?;

		let records = self.records();
		records.ensure_user(user, display_name)?;
		self.expire_if_stale(user).await?;

		let mode = self.mode();
		let stage = match mode {
			SettlementMode::Automatic => PaymentStage::AwaitingGateway,
			SettlementMode::Manual => PaymentStage::AwaitingUserConfirmation,
		};
		let mut pending = records.begin_purchase(user, tariff.clone(), stage, None)?;

		let request = IntentRequest {
			user_id: user.to_string(),
			amount: tariff.price,
			currency: self.config.currency.clone(),
			description: if description.is_empty() {
				format!("Subscription {}", tariff.id)
			} else {
				description.to_string()
			},
			metadata: BTreeMap::from([
				("user_id".to_string(), user.to_string()),
				("tariff".to_string(), tariff.id.to_string()),
				("days".to_string(), tariff.duration_days.to_string()),
				("reference".to_string(), pending.reference.to_string()),
			]),
		};
		let receipt = match self.engine.authority().create_intent(request).await {
			Ok(receipt) => receipt,
			Err(e) => {
				tracing::warn!(
					user = %user,
					reference = %pending.reference,
					error = %e,
					"payment intent not created"
				);
				records.fail_purchase_for(user, pending.reference, FailureReason::Failed)?;
				return Err(e.into());
			}
		};

		if let Some(intent_id) = &receipt.intent_id {
			if !records.record_intent_id(user, pending.reference, intent_id)? {
				return Err(LedgerError::NoPendingPayment(user.clone()).into());
			}
			pending.intent_id = Some(intent_id.clone());
		}
		if mode == SettlementMode::Automatic {
			self.engine.spawn_poller(user, &pending);
		}

		tracing::info!(
			user = %user,
			reference = %pending.reference,
			tariff = %tariff.id,
			mode = %mode,
			"purchase started"
		);
		Ok(PurchaseTicket {
			reference: pending.reference,
			tariff,
			currency: self.config.currency.clone(),
			mode,
			intent_id: receipt.intent_id,
			instruction: receipt.instruction,
		})
	}

	/// Records the user's claim that a manual payment was made and asks the
	/// admins to approve it. Admins are asked once per payment.
	pub async fn on_user_asserts_paid(&self, user: &UserId) -> LifecycleResult<ApprovalPending> {
		self.require_mode(SettlementMode::Manual)?;
		self.expire_if_stale(user).await?;

		let (pending, transitioned) = self.records().mark_awaiting_approval(user)?;
		if transitioned {
			let display_name = self.records().snapshot(user)?.username;
			let request = ApprovalRequest {
				user: user.clone(),
				display_name,
				reference: pending.reference,
				tariff: pending.tariff.clone(),
				currency: self.config.currency.clone(),
				created_at: pending.created_at,
			};
			if let Err(e) = self
				.engine
				.notifier()
				.notify_admins(&self.config.admins, request)
				.await
			{
				tracing::warn!(
					user = %user,
					reference = %pending.reference,
					error = %e,
					"approval request not delivered"
				);
			}
			tracing::info!(user = %user, reference = %pending.reference, "manual payment awaiting approval");
		}
		Ok(ApprovalPending {
			reference: pending.reference,
			admins_notified: transitioned,
		})
	}

	/// Approves the manual payment pending for `target`.
	///
	/// Only identities in the admin set may approve; anyone else gets
	/// [`LifecycleError::NotAuthorized`] and the payment is left untouched.
	pub async fn on_admin_approve(
		&self,
		admin: &UserId,
		target: &UserId,
	) -> LifecycleResult<Notification> {
		if !self.config.admins.contains(admin) {
			tracing::warn!(admin = %admin, target = %target, "approval by non-admin rejected");
			return Err(LifecycleError::NotAuthorized(admin.clone()));
		}
		self.require_mode(SettlementMode::Manual)?;
		self.expire_if_stale(target).await?;

		let pending = self
			.records()
			.snapshot(target)?
			.pending_payment
			.ok_or_else(|| LedgerError::NoPendingPayment(target.clone()))?;
		if !pending.stage.is_manual() {
			return Err(LedgerError::UnexpectedStage {
				user: target.clone(),
				stage: pending.stage,
			}
			.into());
		}

		tracing::info!(
			admin = %admin,
			target = %target,
			reference = %pending.reference,
			"manual payment approved"
		);
		self.engine.settle(target, pending.reference).await
	}

	/// Current subscription state of `user`.
	///
	/// A pending payment past its budget with no live poller is resolved
	/// first. Unknown users get an inactive view and no record is created.
	pub async fn on_status_query(&self, user: &UserId) -> LifecycleResult<StatusView> {
		let today = self.records().clock().today();
		match self.expire_if_stale(user).await {
			Ok(()) | Err(LifecycleError::Ledger(LedgerError::UnknownUser(_))) => {}
			Err(e) => return Err(e),
		}
		match self.records().snapshot(user) {
			Ok(record) => Ok(StatusView::from_stored(user, Some(record), today)),
			Err(LedgerError::UnknownUser(_)) => Ok(StatusView::from_stored(user, None, today)),
			Err(e) => Err(e.into()),
		}
	}

	/// Issues a fresh access link covering the rest of an active subscription.
	pub async fn reissue_credential(&self, user: &UserId) -> LifecycleResult<String> {
		let today = self.records().clock().today();
		let record = self.records().snapshot(user)?;
		if !record.is_active(today) {
			return Err(LifecycleError::NoActiveSubscription(user.clone()));
		}

		let link =
			issue_with_retry(self.issuer.as_ref(), user, record.remaining_days(today)).await?;
		self.records().set_access_link(user, &link)?;
		tracing::info!(user = %user, "access link reissued");
		Ok(link)
	}

	/// Resolves every stale pending payment that no poller owns.
	///
	/// Automatic payments get one last status query and may still settle.
	/// Returns the number of payments resolved.
	pub async fn expire_stale(&self) -> LifecycleResult<usize> {
		let mut resolved = 0;
		for (user, pending) in self.records().pending_payments() {
			if self.expire_pending(&user, &pending).await? {
				resolved += 1;
			}
		}
		Ok(resolved)
	}

	async fn expire_if_stale(&self, user: &UserId) -> LifecycleResult<()> {
		if let Some(pending) = self.records().snapshot(user)?.pending_payment {
			self.expire_pending(user, &pending).await?;
		}
		Ok(())
	}

	async fn expire_pending(&self, user: &UserId, pending: &PendingPayment) -> LifecycleResult<bool> {
		let budget = match pending.stage {
			PaymentStage::AwaitingGateway => Some(self.engine.config().timeout),
			PaymentStage::AwaitingUserConfirmation | PaymentStage::AwaitingAdminApproval => {
				self.config.manual_timeout
			}
		};
		let now = self.records().clock().now();
		let stale = budget.is_some_and(|budget| pending.is_stale(now, budget));
		if !stale || self.engine.is_polling(pending.reference) {
			return Ok(false);
		}
		if pending.stage == PaymentStage::AwaitingGateway {
			self.engine.conclude(user, pending).await
		} else {
			self.engine
				.fail(user, pending.reference, FailureReason::Expired)
				.await
		}
	}

	fn require_mode(&self, expected: SettlementMode) -> LifecycleResult<()> {
		if self.mode() == expected {
			Ok(())
		} else {
			Err(LifecycleError::WrongMode { expected })
		}
	}
}
