//! Payment authority trait.

use crate::types::error::PaymentError;
use crate::types::intent::{IntentReceipt, IntentRequest, IntentStatus, SettlementMode};
use async_trait::async_trait;

/// Capability to create payment intents and ask for their status.
///
/// Implementations must be thread-safe: the reconciliation engine queries
/// from one task per pending payment.
#[async_trait]
pub trait PaymentAuthority: Send + Sync {
	/// Settlement mode this authority drives.
	fn mode(&self) -> SettlementMode;

	/// Creates a payment intent for `request`.
	async fn create_intent(&self, request: IntentRequest) -> Result<IntentReceipt, PaymentError>;

	/// Current status of an intent created by this authority.
	async fn query_status(&self, intent_id: &str) -> Result<IntentStatus, PaymentError>;
}
