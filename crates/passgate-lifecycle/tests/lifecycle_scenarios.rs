//! End-to-end purchase flows through the orchestrator.

use chrono::{Days, TimeDelta};
use passgate_credentials::RecordingIssuer;
use passgate_ledger::{
	Clock, FailureReason, JsonFileStore, LedgerError, LedgerStore, ManualClock, MemoryStore,
	PaymentStage, PendingPayment, RecordManager, Tariff, UserId,
};
use passgate_lifecycle::{
	Lifecycle, LifecycleConfig, LifecycleError, Notification, Reconciler, ReconcilerConfig,
	RecordingNotifier, Settings,
};
use passgate_payment::{
	IntentRequest, IntentStatus, ManualAuthority, PaymentAuthority, PaymentInstruction,
	SettlementMode,
};
use passgate_payment_mocks::{MockGateway, StatusStep};
use rstest::*;
use std::sync::Arc;
use std::time::Duration;

struct World {
	clock: Arc<ManualClock>,
	records: Arc<RecordManager>,
	gateway: Arc<MockGateway>,
	issuer: Arc<RecordingIssuer>,
	notifier: Arc<RecordingNotifier>,
	lifecycle: Lifecycle,
}

impl World {
	fn build(
		records: Arc<RecordManager>,
		clock: Arc<ManualClock>,
		authority: Arc<dyn PaymentAuthority>,
		gateway: Arc<MockGateway>,
		settings: &Settings,
		config: ReconcilerConfig,
	) -> Self {
		let issuer = Arc::new(RecordingIssuer::new());
		let notifier = Arc::new(RecordingNotifier::new());
		let engine = Reconciler::new(
			records.clone(),
			authority,
			issuer.clone(),
			notifier.clone(),
			config,
		);
		let lifecycle = Lifecycle::new(engine, issuer.clone(), LifecycleConfig::from_settings(settings));
		Self {
			clock,
			records,
			gateway,
			issuer,
			notifier,
			lifecycle,
		}
	}

	fn automatic(script: Vec<StatusStep>, timeout: Duration) -> Self {
		let clock = Arc::new(ManualClock::default());
		let records =
			Arc::new(RecordManager::open(Arc::new(MemoryStore::new()), clock.clone()).unwrap());
		let gateway = Arc::new(MockGateway::with_script(script));
		Self::build(
			records,
			clock,
			gateway.clone(),
			gateway,
			&Settings::default(),
			fast(timeout),
		)
	}

	fn manual(manual_timeout_secs: Option<u64>) -> Self {
		let clock = Arc::new(ManualClock::default());
		let records =
			Arc::new(RecordManager::open(Arc::new(MemoryStore::new()), clock.clone()).unwrap());
		let settings = Settings {
			mode: SettlementMode::Manual,
			admins: vec![ADMIN.to_string()],
			manual_timeout_secs,
			..Settings::default()
		};
		Self::build(
			records,
			clock,
			Arc::new(ManualAuthority::default()),
			Arc::new(MockGateway::new()),
			&settings,
			ReconcilerConfig::default(),
		)
	}

	async fn wait_idle(&self) {
		for _ in 0..400 {
			if self.lifecycle.engine().active_pollers() == 0 {
				return;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
		panic!("pollers did not finish");
	}
}

const ADMIN: &str = "900";

fn fast(timeout: Duration) -> ReconcilerConfig {
	ReconcilerConfig {
		poll_interval: Duration::from_millis(5),
		timeout,
	}
}

fn buyer() -> UserId {
	UserId::from(100)
}

#[tokio::test]
async fn test_thirty_day_purchase_succeeds_on_next_poll() {
	// Arrange
	let world = World::automatic(
		vec![StatusStep::Status(IntentStatus::Succeeded)],
		Duration::from_secs(5),
	);

	// Act
	let ticket = world
		.lifecycle
		.on_start_purchase(&buyer(), Some("alice"), "30")
		.await
		.unwrap();
	world.wait_idle().await;

	// Assert
	assert_eq!(ticket.tariff.price, 250);
	assert_eq!(ticket.currency, "RUB");
	assert!(matches!(ticket.instruction, PaymentInstruction::Redirect { .. }));
	let request = world
		.gateway
		.request_for(ticket.intent_id.as_deref().unwrap())
		.await
		.unwrap();
	assert_eq!(request.amount, 250);
	assert_eq!(request.metadata["tariff"], "30");
	assert_eq!(request.metadata["days"], "30");

	let record = world.records.snapshot(&buyer()).unwrap();
	assert_eq!(
		record.subscription_end,
		Some(world.clock.today() + Days::new(30))
	);
	assert!(!record.trial_used);
	assert!(record.is_paid);
	assert!(record.pending_payment.is_none());
	assert_eq!(world.issuer.issue_count().await, 1);
	let sent = world.notifier.notifications_for(&buyer()).await;
	assert!(matches!(sent.as_slice(), [Notification::PaymentSucceeded { .. }]));
}

#[tokio::test]
async fn test_canceled_trial_leaves_trial_available() {
	// Arrange
	let world = World::automatic(
		vec![StatusStep::Status(IntentStatus::Canceled)],
		Duration::from_secs(5),
	);

	// Act
	world
		.lifecycle
		.on_start_purchase(&buyer(), None, "trial")
		.await
		.unwrap();
	world.wait_idle().await;

	// Assert
	let record = world.records.snapshot(&buyer()).unwrap();
	assert!(record.pending_payment.is_none());
	assert!(!record.trial_used);
	assert!(record.subscription_end.is_none());
	assert_eq!(world.issuer.issue_count().await, 0);
	let sent = world.notifier.notifications_for(&buyer()).await;
	assert!(matches!(
		sent.as_slice(),
		[Notification::PaymentEnded { reason: FailureReason::Canceled, .. }]
	));
}

#[tokio::test]
async fn test_trial_is_single_use() {
	// Arrange
	let world = World::automatic(
		vec![StatusStep::Status(IntentStatus::Succeeded)],
		Duration::from_secs(5),
	);
	world
		.lifecycle
		.on_start_purchase(&buyer(), None, "trial")
		.await
		.unwrap();
	world.wait_idle().await;

	// Act
	let second = world
		.lifecycle
		.on_start_purchase(&buyer(), None, "trial")
		.await;

	// Assert
	assert!(world.records.snapshot(&buyer()).unwrap().trial_used);
	assert!(matches!(
		second,
		Err(LifecycleError::Ledger(LedgerError::TrialAlreadyUsed(_)))
	));
	assert_eq!(world.gateway.intent_count().await, 1);
}

#[tokio::test]
async fn test_renewal_stacks_on_active_subscription() {
	// Arrange
	let world = World::automatic(
		vec![StatusStep::Status(IntentStatus::Succeeded)],
		Duration::from_secs(5),
	);
	world
		.lifecycle
		.on_start_purchase(&buyer(), None, "30")
		.await
		.unwrap();
	world.wait_idle().await;
	world.clock.advance(TimeDelta::days(20));

	// Act
	world
		.lifecycle
		.on_start_purchase(&buyer(), None, "30")
		.await
		.unwrap();
	world.wait_idle().await;

	// Assert
	let status = world.lifecycle.on_status_query(&buyer()).await.unwrap();
	assert_eq!(
		status.subscription_end,
		Some(world.clock.today() + Days::new(40))
	);
	assert_eq!(status.access_link.as_deref(), Some("test://100/2"));
}

#[tokio::test]
async fn test_second_purchase_while_pending_is_rejected() {
	// Arrange
	let world = World::automatic(vec![], Duration::from_secs(60));
	world
		.lifecycle
		.on_start_purchase(&buyer(), None, "30")
		.await
		.unwrap();

	// Act
	let second = world
		.lifecycle
		.on_start_purchase(&buyer(), None, "90")
		.await;

	// Assert
	assert!(matches!(
		second,
		Err(LifecycleError::Ledger(LedgerError::AlreadyPending { .. }))
	));
	assert_eq!(world.gateway.intent_count().await, 1);
	world.lifecycle.engine().shutdown().await;
}

impl World {
	/// Leaves an automatic payment with a gateway intent in the ledger and no
	/// poller, as a process that stopped mid-payment would.
	async fn abandoned_payment(&self, tariff: Tariff) -> PendingPayment {
		self.records.ensure_user(&buyer(), None).unwrap();
		let mut pending = self
			.records
			.begin_purchase(&buyer(), tariff.clone(), PaymentStage::AwaitingGateway, None)
			.unwrap();
		let receipt = self
			.gateway
			.create_intent(IntentRequest {
				user_id: buyer().to_string(),
				amount: tariff.price,
				currency: "RUB".to_string(),
				description: tariff.id.to_string(),
				metadata: Default::default(),
			})
			.await
			.unwrap();
		let intent_id = receipt.intent_id.unwrap();
		self.records
			.record_intent_id(&buyer(), pending.reference, &intent_id)
			.unwrap();
		pending.intent_id = Some(intent_id);
		pending
	}
}

#[tokio::test]
async fn test_stale_pending_payment_is_superseded() {
	// Arrange
	let world = World::automatic(
		vec![StatusStep::Status(IntentStatus::Pending)],
		Duration::from_secs(60),
	);
	let old = world.abandoned_payment(Tariff::new("30", 250, 30)).await;
	world.clock.advance(TimeDelta::seconds(61));

	// Act
	let ticket = world
		.lifecycle
		.on_start_purchase(&buyer(), None, "90")
		.await
		.unwrap();

	// Assert
	assert_ne!(ticket.reference, old.reference);
	let pending = world
		.records
		.snapshot(&buyer())
		.unwrap()
		.pending_payment
		.unwrap();
	assert_eq!(pending.reference, ticket.reference);
	assert_eq!(pending.tariff.id.as_str(), "90");
	let ended: Vec<_> = world
		.notifier
		.notifications_for(&buyer())
		.await
		.into_iter()
		.filter(|note| note.reference() == old.reference)
		.collect();
	assert!(matches!(
		ended.as_slice(),
		[Notification::PaymentEnded { reason: FailureReason::TimedOut, .. }]
	));
	world.lifecycle.engine().shutdown().await;
}

#[tokio::test]
async fn test_stale_payment_paid_at_gateway_is_credited_before_new_purchase() {
	// Arrange
	let world = World::automatic(
		vec![StatusStep::Status(IntentStatus::Pending)],
		Duration::from_secs(60),
	);
	let old = world.abandoned_payment(Tariff::new("30", 250, 30)).await;
	world
		.gateway
		.script_intent(
			old.intent_id.as_deref().unwrap(),
			[StatusStep::Status(IntentStatus::Succeeded)],
		)
		.await
		.unwrap();
	world.clock.advance(TimeDelta::seconds(61));

	// Act
	world
		.lifecycle
		.on_start_purchase(&buyer(), None, "90")
		.await
		.unwrap();

	// Assert
	let record = world.records.snapshot(&buyer()).unwrap();
	assert_eq!(
		record.subscription_end,
		Some(world.clock.today() + Days::new(30))
	);
	let sent = world.notifier.notifications_for(&buyer()).await;
	assert!(matches!(
		sent.as_slice(),
		[Notification::PaymentSucceeded { reference, .. }] if *reference == old.reference
	));
	world.lifecycle.engine().shutdown().await;
}

#[tokio::test]
async fn test_status_query_credits_stale_payment_the_gateway_settled() {
	// Arrange
	let world = World::automatic(
		vec![StatusStep::Status(IntentStatus::Succeeded)],
		Duration::from_secs(300),
	);
	let old = world.abandoned_payment(Tariff::new("30", 250, 30)).await;
	world.clock.advance(TimeDelta::seconds(301));

	// Act
	let status = world.lifecycle.on_status_query(&buyer()).await.unwrap();

	// Assert
	assert_eq!(world.gateway.query_count(), 1);
	assert!(status.active);
	assert!(status.pending.is_none());
	assert_eq!(
		status.subscription_end,
		Some(world.clock.today() + Days::new(30))
	);
	let sent = world.notifier.notifications_for(&buyer()).await;
	assert!(matches!(
		sent.as_slice(),
		[Notification::PaymentSucceeded { reference, .. }] if *reference == old.reference
	));
}

#[tokio::test]
async fn test_expire_stale_times_out_payment_still_pending_at_gateway() {
	// Arrange
	let world = World::automatic(
		vec![StatusStep::Status(IntentStatus::Pending)],
		Duration::from_secs(300),
	);
	world.abandoned_payment(Tariff::new("30", 250, 30)).await;
	world.clock.advance(TimeDelta::seconds(301));

	// Act
	let resolved = world.lifecycle.expire_stale().await.unwrap();

	// Assert
	assert_eq!(resolved, 1);
	assert_eq!(world.gateway.query_count(), 1);
	let record = world.records.snapshot(&buyer()).unwrap();
	assert!(record.pending_payment.is_none());
	assert!(record.subscription_end.is_none());
	let sent = world.notifier.notifications_for(&buyer()).await;
	assert!(matches!(
		sent.as_slice(),
		[Notification::PaymentEnded { reason: FailureReason::TimedOut, .. }]
	));
}

#[tokio::test]
async fn test_payment_left_pending_times_out_once() {
	// Arrange
	let world = World::automatic(vec![], Duration::from_millis(40));

	// Act
	world
		.lifecycle
		.on_start_purchase(&buyer(), None, "30")
		.await
		.unwrap();
	world.wait_idle().await;

	// Assert
	assert!(
		world
			.records
			.snapshot(&buyer())
			.unwrap()
			.pending_payment
			.is_none()
	);
	let sent = world.notifier.notifications_for(&buyer()).await;
	assert!(matches!(
		sent.as_slice(),
		[Notification::PaymentEnded { reason: FailureReason::TimedOut, .. }]
	));
}

#[tokio::test]
async fn test_intent_creation_failure_clears_pending() {
	// Arrange
	let world = World::automatic(vec![], Duration::from_secs(5));
	world.gateway.set_fail_next(true).await;

	// Act
	let result = world
		.lifecycle
		.on_start_purchase(&buyer(), None, "30")
		.await;

	// Assert
	assert!(matches!(result, Err(LifecycleError::Payment(_))));
	assert!(
		world
			.records
			.snapshot(&buyer())
			.unwrap()
			.pending_payment
			.is_none()
	);
	assert_eq!(world.lifecycle.engine().active_pollers(), 0);
}

#[rstest]
#[case("365")]
#[case("")]
#[tokio::test]
async fn test_unknown_tariff_is_rejected(#[case] tariff: &str) {
	let world = World::automatic(vec![], Duration::from_secs(5));

	let result = world
		.lifecycle
		.on_start_purchase(&buyer(), None, tariff)
		.await;

	assert!(matches!(result, Err(LifecycleError::UnknownTariff(id)) if id == tariff));
	assert!(world.records.is_empty());
}

#[tokio::test]
async fn test_manual_flow_requires_admin_approval() {
	// Arrange
	let world = World::manual(None);
	let ticket = world
		.lifecycle
		.on_start_purchase(&buyer(), Some("bob"), "90")
		.await
		.unwrap();

	// Act
	let first = world.lifecycle.on_user_asserts_paid(&buyer()).await.unwrap();
	let again = world.lifecycle.on_user_asserts_paid(&buyer()).await.unwrap();
	let outcome = world
		.lifecycle
		.on_admin_approve(&UserId::from(ADMIN), &buyer())
		.await
		.unwrap();

	// Assert
	assert!(ticket.intent_id.is_none());
	assert!(matches!(ticket.instruction, PaymentInstruction::Manual { .. }));
	assert!(first.admins_notified);
	assert!(!again.admins_notified);
	let approvals = world.notifier.approval_requests().await;
	assert_eq!(approvals.len(), 1);
	assert_eq!(approvals[0].0, vec![UserId::from(ADMIN)]);
	assert_eq!(approvals[0].1.reference, ticket.reference);
	assert_eq!(approvals[0].1.display_name.as_deref(), Some("bob"));
	assert!(matches!(outcome, Notification::PaymentSucceeded { .. }));
	let record = world.records.snapshot(&buyer()).unwrap();
	assert_eq!(
		record.subscription_end,
		Some(world.clock.today() + Days::new(90))
	);
	assert!(record.pending_payment.is_none());
}

#[tokio::test]
async fn test_non_admin_cannot_approve() {
	// Arrange
	let world = World::manual(None);
	world
		.lifecycle
		.on_start_purchase(&buyer(), None, "30")
		.await
		.unwrap();
	world.lifecycle.on_user_asserts_paid(&buyer()).await.unwrap();
	let before = world.records.snapshot(&buyer()).unwrap();

	// Act
	let result = world
		.lifecycle
		.on_admin_approve(&buyer(), &buyer())
		.await;

	// Assert
	assert!(matches!(result, Err(LifecycleError::NotAuthorized(_))));
	assert_eq!(world.records.snapshot(&buyer()).unwrap(), before);
	assert!(world.notifier.notifications().await.is_empty());
}

#[tokio::test]
async fn test_approve_twice_credits_once() {
	let world = World::manual(None);
	world
		.lifecycle
		.on_start_purchase(&buyer(), None, "30")
		.await
		.unwrap();
	let admin = UserId::from(ADMIN);

	world.lifecycle.on_admin_approve(&admin, &buyer()).await.unwrap();
	let second = world.lifecycle.on_admin_approve(&admin, &buyer()).await;

	assert!(matches!(
		second,
		Err(LifecycleError::Ledger(LedgerError::NoPendingPayment(_)))
	));
	assert_eq!(
		world.records.snapshot(&buyer()).unwrap().subscription_end,
		Some(world.clock.today() + Days::new(30))
	);
	assert_eq!(world.issuer.issue_count().await, 1);
}

#[tokio::test]
async fn test_manual_operations_rejected_in_automatic_mode() {
	let world = World::automatic(vec![], Duration::from_secs(5));

	let result = world.lifecycle.on_user_asserts_paid(&buyer()).await;

	assert!(matches!(
		result,
		Err(LifecycleError::WrongMode {
			expected: SettlementMode::Manual
		})
	));
}

#[tokio::test]
async fn test_status_query_expires_stale_manual_payment() {
	// Arrange
	let world = World::manual(Some(3600));
	world
		.lifecycle
		.on_start_purchase(&buyer(), None, "30")
		.await
		.unwrap();
	world.clock.advance(TimeDelta::hours(2));

	// Act
	let status = world.lifecycle.on_status_query(&buyer()).await.unwrap();

	// Assert
	assert!(status.pending.is_none());
	assert!(!status.active);
	let sent = world.notifier.notifications_for(&buyer()).await;
	assert!(matches!(
		sent.as_slice(),
		[Notification::PaymentEnded { reason: FailureReason::Expired, .. }]
	));
}

#[tokio::test]
async fn test_status_query_for_unknown_user_creates_nothing() {
	let world = World::manual(None);

	let status = world.lifecycle.on_status_query(&buyer()).await.unwrap();

	assert!(!status.registered);
	assert!(!status.active);
	assert_eq!(status.remaining_days, 0);
	assert!(world.records.is_empty());
}

#[tokio::test]
async fn test_reissue_requires_active_subscription() {
	// Arrange
	let world = World::manual(None);
	world.records.ensure_user(&buyer(), None).unwrap();

	// Act
	let result = world.lifecycle.reissue_credential(&buyer()).await;

	// Assert
	assert!(matches!(result, Err(LifecycleError::NoActiveSubscription(_))));
}

#[tokio::test]
async fn test_reissue_replaces_link_for_remaining_days() {
	// Arrange
	let world = World::manual(None);
	world
		.lifecycle
		.on_start_purchase(&buyer(), None, "30")
		.await
		.unwrap();
	world
		.lifecycle
		.on_admin_approve(&UserId::from(ADMIN), &buyer())
		.await
		.unwrap();
	world.clock.advance(TimeDelta::days(10));

	// Act
	let link = world.lifecycle.reissue_credential(&buyer()).await.unwrap();

	// Assert
	let record = world.records.snapshot(&buyer()).unwrap();
	assert_eq!(record.access_link.as_deref(), Some(link.as_str()));
	assert_eq!(
		world.issuer.issued().await.last(),
		Some(&(buyer().to_string(), 21))
	);
}

#[tokio::test]
async fn test_resume_finishes_payment_left_in_ledger() {
	// Arrange: first process records a pending payment and stops
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("users_data.json");
	let clock = Arc::new(ManualClock::default());
	let gateway = Arc::new(MockGateway::new());
	{
		let records = Arc::new(
			RecordManager::open(Arc::new(JsonFileStore::open(&path).unwrap()), clock.clone())
				.unwrap(),
		);
		let world = World::build(
			records,
			clock.clone(),
			gateway.clone(),
			gateway.clone(),
			&Settings::default(),
			fast(Duration::from_secs(60)),
		);
		world
			.lifecycle
			.on_start_purchase(&buyer(), None, "30")
			.await
			.unwrap();
		world.lifecycle.engine().shutdown().await;
	}
	let intent_id = gateway.last_intent_id().await.unwrap();
	gateway
		.script_intent(&intent_id, [StatusStep::Status(IntentStatus::Succeeded)])
		.await
		.unwrap();

	// Act: second process starts from the same file
	let store = JsonFileStore::open(&path).unwrap();
	let records = Arc::new(RecordManager::open(Arc::new(store), clock.clone()).unwrap());
	let world = World::build(
		records,
		clock.clone(),
		gateway.clone(),
		gateway,
		&Settings::default(),
		fast(Duration::from_secs(60)),
	);
	let resumed = world.lifecycle.engine().resume().await.unwrap();
	world.wait_idle().await;

	// Assert
	assert_eq!(resumed, 1);
	let reloaded = JsonFileStore::read_only(&path).load().unwrap();
	let record = &reloaded[&buyer()];
	assert!(record.pending_payment.is_none());
	assert_eq!(record.subscription_end, Some(clock.today() + Days::new(30)));
	assert!(record.access_link.is_some());
	assert_eq!(world.notifier.notifications().await.len(), 1);
}
