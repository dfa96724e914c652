//! Shadowsocks `ss://` link issuer.

use crate::{CredentialIssuer, IssuerError};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cipher used when none is configured.
pub const DEFAULT_METHOD: &str = "chacha20-ietf-poly1305";

/// Server port used when none is configured.
pub const DEFAULT_PORT: u16 = 8388;

const PASSWORD_LEN: usize = 16;

/// Server coordinates embedded into every link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowsocksSettings {
	pub host: String,
	pub port: u16,
	pub method: String,
}

impl Default for ShadowsocksSettings {
	fn default() -> Self {
		Self {
			host: "127.0.0.1".to_string(),
			port: DEFAULT_PORT,
			method: DEFAULT_METHOD.to_string(),
		}
	}
}

/// Issues `ss://<base64url(method:password@host:port)>#User<id>` links with a
/// random password per call.
///
/// # Example
///
/// ```
/// use passgate_credentials::{CredentialIssuer, ShadowsocksIssuer, ShadowsocksSettings};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let issuer = ShadowsocksIssuer::new(ShadowsocksSettings {
///     host: "vpn.example.com".to_string(),
///     ..Default::default()
/// })
/// .unwrap();
/// let link = issuer.issue("42", 30).await.unwrap();
/// assert!(link.starts_with("ss://"));
/// assert!(link.ends_with("#User42"));
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct ShadowsocksIssuer {
	settings: ShadowsocksSettings,
}

impl ShadowsocksIssuer {
	/// Builds an issuer, rejecting an empty host or method.
	pub fn new(settings: ShadowsocksSettings) -> Result<Self, IssuerError> {
		if settings.host.trim().is_empty() {
			return Err(IssuerError::Misconfigured("host is empty".to_string()));
		}
		if settings.method.trim().is_empty() {
			return Err(IssuerError::Misconfigured("method is empty".to_string()));
		}
		Ok(Self { settings })
	}

	pub fn settings(&self) -> &ShadowsocksSettings {
		&self.settings
	}

	fn link(&self, user_id: &str, password: &str) -> String {
		let ShadowsocksSettings { host, port, method } = &self.settings;
		let userinfo = format!("{method}:{password}@{host}:{port}");
		format!("ss://{}#User{user_id}", URL_SAFE_NO_PAD.encode(userinfo))
	}
}

fn random_password() -> String {
	let mut password = Uuid::new_v4().simple().to_string();
	password.truncate(PASSWORD_LEN);
	password
}

#[async_trait]
impl CredentialIssuer for ShadowsocksIssuer {
	async fn issue(&self, user_id: &str, duration_days: u32) -> Result<String, IssuerError> {
		let link = self.link(user_id, &random_password());
		tracing::debug!(user_id, duration_days, "Issued shadowsocks link");
		Ok(link)
	}
}
