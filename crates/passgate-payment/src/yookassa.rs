//! YooKassa payment gateway.
//!
//! Payments are created with `capture = true` and a redirect confirmation, so
//! a successful payment goes straight from `pending` to `succeeded`.

use crate::authority::PaymentAuthority;
use crate::types::error::PaymentError;
use crate::types::intent::{
	IntentReceipt, IntentRequest, IntentStatus, PaymentInstruction, SettlementMode,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.yookassa.ru/v3";

/// Gateway credentials and endpoints.
#[derive(Clone)]
pub struct YooKassaConfig {
	pub shop_id: String,
	pub secret_key: String,
	pub api_base: String,
	/// Where the hosted page sends the user after paying
	pub return_url: String,
	pub request_timeout: Duration,
}

impl YooKassaConfig {
	pub fn new(shop_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
		Self {
			shop_id: shop_id.into(),
			secret_key: secret_key.into(),
			api_base: DEFAULT_API_BASE.to_string(),
			return_url: "https://example.com/return".to_string(),
			request_timeout: Duration::from_secs(15),
		}
	}

	pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
		self.api_base = api_base.into();
		self
	}

	pub fn with_return_url(mut self, return_url: impl Into<String>) -> Self {
		self.return_url = return_url.into();
		self
	}
}

// The secret key never reaches logs.
impl fmt::Debug for YooKassaConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("YooKassaConfig")
			.field("shop_id", &self.shop_id)
			.field("secret_key", &"***")
			.field("api_base", &self.api_base)
			.field("return_url", &self.return_url)
			.field("request_timeout", &self.request_timeout)
			.finish()
	}
}

#[derive(Debug, Serialize)]
struct Amount<'a> {
	value: String,
	currency: &'a str,
}

#[derive(Debug, Serialize)]
struct Confirmation<'a> {
	#[serde(rename = "type")]
	kind: &'static str,
	return_url: &'a str,
}

#[derive(Debug, Serialize)]
struct CreatePayment<'a> {
	amount: Amount<'a>,
	confirmation: Confirmation<'a>,
	capture: bool,
	description: &'a str,
	metadata: &'a BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PaymentObject {
	id: String,
	status: String,
	#[serde(default)]
	confirmation: Option<ConfirmationObject>,
}

#[derive(Debug, Deserialize)]
struct ConfirmationObject {
	#[serde(default)]
	confirmation_url: Option<String>,
}

/// Automatic payment authority backed by the YooKassa REST API.
pub struct YooKassaGateway {
	client: reqwest::Client,
	config: YooKassaConfig,
}

impl YooKassaGateway {
	pub fn new(config: YooKassaConfig) -> Result<Self, PaymentError> {
		let client = reqwest::Client::builder()
			.timeout(config.request_timeout)
			.build()?;
		Ok(Self { client, config })
	}

	fn url(&self, path: &str) -> String {
		format!("{}/{}", self.config.api_base.trim_end_matches('/'), path)
	}

	async fn read_payment(response: reqwest::Response) -> Result<PaymentObject, PaymentError> {
		let status = response.status();
		let body = response.text().await?;
		if !status.is_success() {
			return Err(PaymentError::ProviderError(format!("HTTP {status}: {body}")));
		}
		Ok(serde_json::from_str(&body)?)
	}
}

#[async_trait]
impl PaymentAuthority for YooKassaGateway {
	fn mode(&self) -> SettlementMode {
		SettlementMode::Automatic
	}

	async fn create_intent(&self, request: IntentRequest) -> Result<IntentReceipt, PaymentError> {
		if request.amount == 0 {
			return Err(PaymentError::InvalidParameters(
				"Amount must be greater than zero".to_string(),
			));
		}

		let body = CreatePayment {
			amount: Amount {
				value: format!("{}.00", request.amount),
				currency: &request.currency,
			},
			confirmation: Confirmation {
				kind: "redirect",
				return_url: &self.config.return_url,
			},
			capture: true,
			description: &request.description,
			metadata: &request.metadata,
		};

		let response = self
			.client
			.post(self.url("payments"))
			.basic_auth(&self.config.shop_id, Some(&self.config.secret_key))
			.header("Idempotence-Key", uuid::Uuid::new_v4().to_string())
			.json(&body)
			.send()
			.await?;
		let payment = Self::read_payment(response).await?;

		let confirmation_url = payment
			.confirmation
			.and_then(|c| c.confirmation_url)
			.ok_or_else(|| {
				PaymentError::ProviderError(format!(
					"payment {} has no confirmation url",
					payment.id
				))
			})?;
		tracing::info!(
			intent_id = %payment.id,
			user_id = %request.user_id,
			amount = request.amount,
			"payment intent created"
		);

		Ok(IntentReceipt {
			intent_id: Some(payment.id),
			instruction: PaymentInstruction::Redirect { confirmation_url },
		})
	}

	async fn query_status(&self, intent_id: &str) -> Result<IntentStatus, PaymentError> {
		let response = self
			.client
			.get(self.url(&format!("payments/{intent_id}")))
			.basic_auth(&self.config.shop_id, Some(&self.config.secret_key))
			.send()
			.await?;
		if response.status() == reqwest::StatusCode::NOT_FOUND {
			return Err(PaymentError::NotFound(intent_id.to_string()));
		}
		let payment = Self::read_payment(response).await?;
		IntentStatus::from_provider(&payment.status)
			.ok_or(PaymentError::UnexpectedStatus(payment.status))
	}
}
