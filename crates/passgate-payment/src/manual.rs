//! Manual settlement.
//!
//! There is no gateway: the "intent" is an instruction telling the user how
//! to pay, and an admin confirms receipt.

use crate::authority::PaymentAuthority;
use crate::types::error::PaymentError;
use crate::types::intent::{
	IntentReceipt, IntentRequest, IntentStatus, PaymentInstruction, SettlementMode,
};
use async_trait::async_trait;

pub const DEFAULT_INSTRUCTION: &str =
	"Transfer {amount} {currency} for \"{description}\", then confirm the payment.";

/// Manual payment authority.
///
/// # Example
///
/// ```rust
/// use passgate_payment::{IntentRequest, ManualAuthority};
///
/// let authority = ManualAuthority::new("Send {amount} {currency} to card 0000");
/// let text = authority.render(&IntentRequest {
/// 	user_id: "1".to_string(),
/// 	amount: 250,
/// 	currency: "RUB".to_string(),
/// 	description: "VPN 30 days".to_string(),
/// 	metadata: Default::default(),
/// });
/// assert_eq!(text, "Send 250 RUB to card 0000");
/// ```
#[derive(Debug, Clone)]
pub struct ManualAuthority {
	template: String,
}

impl ManualAuthority {
	/// `template` may use `{amount}`, `{currency}` and `{description}`.
	pub fn new(template: impl Into<String>) -> Self {
		Self {
			template: template.into(),
		}
	}

	pub fn render(&self, request: &IntentRequest) -> String {
		self.template
			.replace("{amount}", &request.amount.to_string())
			.replace("{currency}", &request.currency)
			.replace("{description}", &request.description)
	}
}

impl Default for ManualAuthority {
	fn default() -> Self {
		Self::new(DEFAULT_INSTRUCTION)
	}
}

#[async_trait]
impl PaymentAuthority for ManualAuthority {
	fn mode(&self) -> SettlementMode {
		SettlementMode::Manual
	}

	async fn create_intent(&self, request: IntentRequest) -> Result<IntentReceipt, PaymentError> {
		Ok(IntentReceipt {
			intent_id: None,
			instruction: PaymentInstruction::Manual {
				text: self.render(&request),
			},
		})
	}

	async fn query_status(&self, _intent_id: &str) -> Result<IntentStatus, PaymentError> {
		Err(PaymentError::Unsupported(
			"manual payments are settled by admin approval",
		))
	}
}
