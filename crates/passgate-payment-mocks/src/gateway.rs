//! Scriptable in-memory gateway.

use async_trait::async_trait;
use passgate_payment::{
	IntentReceipt, IntentRequest, IntentStatus, PaymentAuthority, PaymentError,
	PaymentInstruction, SettlementMode,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// One answer of a status script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusStep {
	/// Report this status
	Status(IntentStatus),
	/// Fail the query with a transient provider error
	Error,
}

impl From<IntentStatus> for StatusStep {
	fn from(status: IntentStatus) -> Self {
		StatusStep::Status(status)
	}
}

#[derive(Debug)]
struct MockIntent {
	request: IntentRequest,
	/// The last step repeats forever once reached
	script: VecDeque<StatusStep>,
}

/// Mock automatic gateway.
///
/// Every created intent gets a copy of the current default script; each status
/// query consumes one step of its script, and the final step repeats. An empty
/// script answers `pending` forever.
pub struct MockGateway {
	intents: Arc<RwLock<HashMap<String, MockIntent>>>,
	order: Arc<RwLock<Vec<String>>>,
	default_script: Arc<RwLock<Vec<StatusStep>>>,
	fail_next: Arc<RwLock<bool>>,
	queries: AtomicUsize,
}

impl MockGateway {
	/// Creates a gateway whose intents stay pending.
	pub fn new() -> Self {
		Self {
			intents: Arc::new(RwLock::new(HashMap::new())),
			order: Arc::new(RwLock::new(Vec::new())),
			default_script: Arc::new(RwLock::new(Vec::new())),
			fail_next: Arc::new(RwLock::new(false)),
			queries: AtomicUsize::new(0),
		}
	}

	/// Creates a gateway whose intents follow `script`.
	pub fn with_script(script: impl IntoIterator<Item = StatusStep>) -> Self {
		Self {
			default_script: Arc::new(RwLock::new(script.into_iter().collect())),
			..Self::new()
		}
	}

	/// Script applied to intents created from now on.
	pub async fn set_default_script(&self, script: impl IntoIterator<Item = StatusStep>) {
		*self.default_script.write().await = script.into_iter().collect();
	}

	/// Replaces the script of an existing intent.
	pub async fn script_intent(
		&self,
		intent_id: &str,
		script: impl IntoIterator<Item = StatusStep>,
	) -> Result<(), PaymentError> {
		let mut intents = self.intents.write().await;
		let intent = intents
			.get_mut(intent_id)
			.ok_or_else(|| PaymentError::NotFound(intent_id.to_string()))?;
		intent.script = script.into_iter().collect();
		Ok(())
	}

	/// Configures whether the next intent creation should fail.
	pub async fn set_fail_next(&self, fail: bool) {
		*self.fail_next.write().await = fail;
	}

	/// Gets the number of created intents.
	pub async fn intent_count(&self) -> usize {
		self.intents.read().await.len()
	}

	/// Id of the most recently created intent.
	pub async fn last_intent_id(&self) -> Option<String> {
		self.order.read().await.last().cloned()
	}

	/// Request an intent was created from.
	pub async fn request_for(&self, intent_id: &str) -> Option<IntentRequest> {
		self.intents
			.read()
			.await
			.get(intent_id)
			.map(|intent| intent.request.clone())
	}

	/// Number of status queries answered so far, errors included.
	pub fn query_count(&self) -> usize {
		self.queries.load(Ordering::SeqCst)
	}
}

impl Default for MockGateway {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl PaymentAuthority for MockGateway {
	fn mode(&self) -> SettlementMode {
		SettlementMode::Automatic
	}

	async fn create_intent(&self, request: IntentRequest) -> Result<IntentReceipt, PaymentError> {
		{
			let mut fail_next = self.fail_next.write().await;
			if *fail_next {
				*fail_next = false;
				return Err(PaymentError::ProviderError(
					"Mock configured to fail".to_string(),
				));
			}
		}

		if request.amount == 0 {
			return Err(PaymentError::InvalidParameters(
				"Amount must be greater than zero".to_string(),
			));
		}

		let id = format!("pay_mock_{}", Uuid::new_v4());
		let script = self.default_script.read().await.iter().copied().collect();
		self.intents
			.write()
			.await
			.insert(id.clone(), MockIntent { request, script });
		self.order.write().await.push(id.clone());

		Ok(IntentReceipt {
			intent_id: Some(id.clone()),
			instruction: PaymentInstruction::Redirect {
				confirmation_url: format!("https://checkout.mock/{id}"),
			},
		})
	}

	async fn query_status(&self, intent_id: &str) -> Result<IntentStatus, PaymentError> {
		self.queries.fetch_add(1, Ordering::SeqCst);
		let mut intents = self.intents.write().await;
		let intent = intents
			.get_mut(intent_id)
			.ok_or_else(|| PaymentError::NotFound(intent_id.to_string()))?;

		let step = if intent.script.len() > 1 {
			intent.script.pop_front()
		} else {
			intent.script.front().copied()
		};
		match step.unwrap_or(StatusStep::Status(IntentStatus::Pending)) {
			StatusStep::Status(status) => Ok(status),
			StatusStep::Error => Err(PaymentError::ProviderError(
				"Mock gateway unavailable".to_string(),
			)),
		}
	}
}
