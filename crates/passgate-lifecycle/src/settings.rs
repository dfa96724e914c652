//! Deployment settings.
//!
//! Settings come from a TOML file where every field is optional, followed by
//! `PASSGATE_*` environment overrides for scalar values. A missing file yields
//! the defaults.
//!
//! ```toml
//! mode = "manual"
//! admins = ["1001"]
//!
//! [tariffs.30]
//! price = 250
//! duration_days = 30
//! description = "30 days"
//! ```

use indexmap::IndexMap;
use passgate_credentials::ShadowsocksSettings;
use passgate_ledger::{Tariff, TariffId, UserId};
use passgate_payment::{SettlementMode, YooKassaConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "PASSGATE_";

/// Errors raised while loading or validating settings
#[derive(Debug, Error)]
pub enum SettingsError {
	/// The settings file exists but could not be read
	#[error("Failed to read {}: {source}", .path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	/// The settings file is not valid TOML for [`Settings`]
	#[error("Invalid settings file: {0}")]
	Parse(#[from] toml::de::Error),

	/// An environment override could not be parsed
	#[error("Invalid value for {key}: {message}")]
	InvalidEnv { key: String, message: String },

	/// A value violates a constraint
	#[error("Invalid setting '{key}': {message}")]
	Invalid { key: String, message: String },
}

impl SettingsError {
	fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
		SettingsError::Invalid {
			key: key.into(),
			message: message.into(),
		}
	}
}

/// One purchasable option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TariffSettings {
	pub price: u64,
	pub duration_days: u32,
	#[serde(default)]
	pub description: String,
}

/// Automatic gateway credentials and endpoints.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
	pub shop_id: String,
	pub secret_key: String,
	pub api_base: String,
	pub return_url: String,
	pub request_timeout_secs: u64,
}

impl Default for GatewaySettings {
	fn default() -> Self {
		let defaults = YooKassaConfig::new("", "");
		Self {
			shop_id: defaults.shop_id,
			secret_key: defaults.secret_key,
			api_base: defaults.api_base,
			return_url: defaults.return_url,
			request_timeout_secs: defaults.request_timeout.as_secs(),
		}
	}
}

impl GatewaySettings {
	pub fn to_config(&self) -> YooKassaConfig {
		let mut config = YooKassaConfig::new(&self.shop_id, &self.secret_key)
			.with_api_base(&self.api_base)
			.with_return_url(&self.return_url);
		config.request_timeout = Duration::from_secs(self.request_timeout_secs);
		config
	}
}

impl fmt::Debug for GatewaySettings {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("GatewaySettings")
			.field("shop_id", &self.shop_id)
			.field("secret_key", &"***")
			.field("api_base", &self.api_base)
			.field("return_url", &self.return_url)
			.field("request_timeout_secs", &self.request_timeout_secs)
			.finish()
	}
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
	#[default]
	Pretty,
	Compact,
	Json,
}

impl std::str::FromStr for LogFormat {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"pretty" => Ok(LogFormat::Pretty),
			"compact" => Ok(LogFormat::Compact),
			"json" => Ok(LogFormat::Json),
			other => Err(format!("unknown log format '{other}'")),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
	/// Default level, e.g. "info"
	pub level: String,
	/// Per-module levels, e.g. `passgate_lifecycle = "debug"`
	pub filters: BTreeMap<String, String>,
	pub format: LogFormat,
}

impl Default for LoggingSettings {
	fn default() -> Self {
		Self {
			level: "info".to_string(),
			filters: BTreeMap::new(),
			format: LogFormat::default(),
		}
	}
}

impl LoggingSettings {
	/// Filter directive in `EnvFilter` syntax.
	pub fn filter_directive(&self) -> String {
		let mut directive = self.level.clone();
		for (module, level) in &self.filters {
			directive.push_str(&format!(",{module}={level}"));
		}
		directive
	}
}

/// Everything a deployment can configure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
	pub mode: SettlementMode,
	pub currency: String,
	pub tariffs: IndexMap<String, TariffSettings>,
	pub poll_interval_secs: u64,
	pub poll_timeout_secs: u64,
	/// Manual payments older than this may be superseded or expired
	pub manual_timeout_secs: Option<u64>,
	pub admins: Vec<String>,
	pub ledger_path: PathBuf,
	pub gateway: GatewaySettings,
	/// Template with `{amount}`, `{currency}` and `{description}` placeholders
	pub manual_instruction: Option<String>,
	pub shadowsocks: ShadowsocksSettings,
	pub logging: LoggingSettings,
}

impl Default for Settings {
	fn default() -> Self {
		let tariffs = [
			(TariffId::TRIAL, 1, 3, "Trial, 3 days"),
			("30", 250, 30, "30 days"),
			("90", 500, 90, "90 days"),
			("180", 900, 180, "180 days"),
		]
		.into_iter()
		.map(|(id, price, duration_days, description)| {
			(
				id.to_string(),
				TariffSettings {
					price,
					duration_days,
					description: description.to_string(),
				},
			)
		})
		.collect();

		Self {
			mode: SettlementMode::Automatic,
			currency: "RUB".to_string(),
			tariffs,
			poll_interval_secs: 4,
			poll_timeout_secs: 300,
			manual_timeout_secs: None,
			admins: Vec::new(),
			ledger_path: PathBuf::from("users_data.json"),
			gateway: GatewaySettings::default(),
			manual_instruction: None,
			shadowsocks: ShadowsocksSettings::default(),
			logging: LoggingSettings::default(),
		}
	}
}

impl Settings {
	/// Loads `path`, applies process environment overrides and validates.
	pub fn load(path: &Path) -> Result<Self, SettingsError> {
		let mut settings = Self::from_file(path)?;
		settings.apply_env(|key| std::env::var(key).ok())?;
		settings.validate()?;
		Ok(settings)
	}

	/// Parses `path` without overrides or validation. A missing file yields defaults.
	pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
		match std::fs::read_to_string(path) {
			Ok(text) => Self::from_toml_str(&text),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				tracing::debug!(path = %path.display(), "settings file not found, using defaults");
				Ok(Self::default())
			}
			Err(source) => Err(SettingsError::Io {
				path: path.to_path_buf(),
				source,
			}),
		}
	}

	pub fn from_toml_str(text: &str) -> Result<Self, SettingsError> {
		Ok(toml::from_str(text)?)
	}

	/// Applies `PASSGATE_*` overrides looked up through `lookup`.
	///
	/// `PASSGATE_ADMINS` is a comma-separated list.
	pub fn apply_env(
		&mut self,
		lookup: impl Fn(&str) -> Option<String>,
	) -> Result<(), SettingsError> {
		let get = |name: &str| {
			let key = format!("{ENV_PREFIX}{name}");
			lookup(&key).map(|value| (key, value))
		};

		if let Some((key, value)) = get("MODE") {
			self.mode = match value.trim().to_ascii_lowercase().as_str() {
				"automatic" => SettlementMode::Automatic,
				"manual" => SettlementMode::Manual,
				other => {
					return Err(SettingsError::InvalidEnv {
						key,
						message: format!("unknown mode '{other}'"),
					});
				}
			};
		}
		if let Some((_, value)) = get("CURRENCY") {
			self.currency = value;
		}
		if let Some((key, value)) = get("POLL_INTERVAL_SECS") {
			self.poll_interval_secs = parse_env(&key, &value)?;
		}
		if let Some((key, value)) = get("POLL_TIMEOUT_SECS") {
			self.poll_timeout_secs = parse_env(&key, &value)?;
		}
		if let Some((key, value)) = get("MANUAL_TIMEOUT_SECS") {
			self.manual_timeout_secs = Some(parse_env(&key, &value)?);
		}
		if let Some((_, value)) = get("ADMINS") {
			self.admins = value
				.split(',')
				.map(str::trim)
				.filter(|admin| !admin.is_empty())
				.map(str::to_string)
				.collect();
		}
		if let Some((_, value)) = get("LEDGER_PATH") {
			self.ledger_path = PathBuf::from(value);
		}
		if let Some((_, value)) = get("GATEWAY_SHOP_ID") {
			self.gateway.shop_id = value;
		}
		if let Some((_, value)) = get("GATEWAY_SECRET_KEY") {
			self.gateway.secret_key = value;
		}
		if let Some((_, value)) = get("GATEWAY_API_BASE") {
			self.gateway.api_base = value;
		}
		if let Some((_, value)) = get("GATEWAY_RETURN_URL") {
			self.gateway.return_url = value;
		}
		if let Some((_, value)) = get("SHADOWSOCKS_HOST") {
			self.shadowsocks.host = value;
		}
		if let Some((key, value)) = get("SHADOWSOCKS_PORT") {
			self.shadowsocks.port = parse_env(&key, &value)?;
		}
		if let Some((_, value)) = get("LOG_LEVEL") {
			self.logging.level = value;
		}
		if let Some((key, value)) = get("LOG_FORMAT") {
			self.logging.format = value
				.parse()
				.map_err(|message| SettingsError::InvalidEnv { key, message })?;
		}
		Ok(())
	}

	/// Checks cross-field constraints.
	pub fn validate(&self) -> Result<(), SettingsError> {
		if self.tariffs.is_empty() {
			return Err(SettingsError::invalid("tariffs", "at least one tariff is required"));
		}
		for (id, tariff) in &self.tariffs {
			if tariff.price == 0 {
				return Err(SettingsError::invalid(
					format!("tariffs.{id}.price"),
					"must be greater than zero",
				));
			}
			if tariff.duration_days == 0 {
				return Err(SettingsError::invalid(
					format!("tariffs.{id}.duration_days"),
					"must be greater than zero",
				));
			}
		}
		if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
			return Err(SettingsError::invalid(
				"currency",
				"must be a three-letter ISO 4217 code",
			));
		}
		if self.poll_interval_secs == 0 {
			return Err(SettingsError::invalid("poll_interval_secs", "must be greater than zero"));
		}
		if self.poll_timeout_secs < self.poll_interval_secs {
			return Err(SettingsError::invalid(
				"poll_timeout_secs",
				"must not be shorter than poll_interval_secs",
			));
		}
		if self.manual_timeout_secs == Some(0) {
			return Err(SettingsError::invalid("manual_timeout_secs", "must be greater than zero"));
		}
		match self.mode {
			SettlementMode::Automatic => {
				if self.gateway.shop_id.trim().is_empty() || self.gateway.secret_key.trim().is_empty()
				{
					return Err(SettingsError::invalid(
						"gateway",
						"shop_id and secret_key are required in automatic mode",
					));
				}
			}
			SettlementMode::Manual => {
				if self.admins.is_empty() {
					return Err(SettingsError::invalid(
						"admins",
						"at least one admin is required in manual mode",
					));
				}
			}
		}
		Ok(())
	}

	/// Tariff snapshot for `id`.
	pub fn tariff(&self, id: &str) -> Option<Tariff> {
		self.tariffs
			.get(id)
			.map(|tariff| Tariff::new(id, tariff.price, tariff.duration_days))
	}

	pub fn admin_ids(&self) -> Vec<UserId> {
		self.admins
			.iter()
			.map(|admin| UserId::from(admin.as_str()))
			.collect()
	}

	pub fn poll_interval(&self) -> Duration {
		Duration::from_secs(self.poll_interval_secs)
	}

	pub fn poll_timeout(&self) -> Duration {
		Duration::from_secs(self.poll_timeout_secs)
	}

	pub fn manual_timeout(&self) -> Option<Duration> {
		self.manual_timeout_secs.map(Duration::from_secs)
	}
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, SettingsError>
where
	T::Err: fmt::Display,
{
	value
		.trim()
		.parse()
		.map_err(|e: T::Err| SettingsError::InvalidEnv {
			key: key.to_string(),
			message: e.to_string(),
		})
}
