//! Argument parsing, settings and logging setup.

use std::io;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use passgate_lifecycle::{LogFormat, LoggingSettings, Settings};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands;

#[derive(Parser, Debug)]
#[command(name = "passgate", version, about = "Subscription ledger and payment reconciliation")]
pub struct Cli {
	/// Settings file (TOML). Missing file means defaults.
	#[arg(short, long, default_value = "passgate.toml")]
	pub config: PathBuf,

	/// Override the ledger file path.
	#[arg(long)]
	pub ledger: Option<PathBuf>,

	/// Override the log level.
	#[arg(long)]
	pub log_level: Option<String>,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
	/// Resume pending payments and keep reconciling until interrupted
	Run,

	/// Show the subscription state of one user
	Status {
		#[arg(value_name = "USER_ID")]
		user: String,
	},

	/// List every user in the ledger
	List {
		/// Only users with a pending payment
		#[arg(long)]
		pending: bool,
	},

	/// Resolve pending payments older than their settlement budget
	ExpireStale,

	/// Issue a fresh access link for an active subscription
	Reissue {
		#[arg(value_name = "USER_ID")]
		user: String,
	},

	/// Approve a manual payment on behalf of an admin
	Approve {
		/// Admin identity performing the approval
		#[arg(long)]
		admin: String,

		#[arg(value_name = "USER_ID")]
		user: String,
	},

	/// Validate settings and print them with secrets redacted
	CheckConfig,
}

pub async fn run(args: Cli) -> anyhow::Result<()> {
	let settings = load_settings(&args)?;
	init_tracing(&settings.logging);
	tracing::debug!(config = %args.config.display(), "settings loaded");

	match args.command {
		Command::Run => commands::serve(&settings).await,
		Command::Status { user } => commands::status(&settings, &user).await,
		Command::List { pending } => commands::list(&settings, pending),
		Command::ExpireStale => commands::expire_stale(&settings).await,
		Command::Reissue { user } => commands::reissue(&settings, &user).await,
		Command::Approve { admin, user } => commands::approve(&settings, &admin, &user).await,
		Command::CheckConfig => {
			println!("{settings:#?}");
			Ok(())
		}
	}
}

/// Settings file, then environment, then command-line overrides.
fn load_settings(args: &Cli) -> anyhow::Result<Settings> {
	let mut settings = Settings::from_file(&args.config)
		.with_context(|| format!("loading {}", args.config.display()))?;
	settings.apply_env(|key| std::env::var(key).ok())?;
	apply_overrides(&mut settings, args);
	settings.validate()?;
	Ok(settings)
}

fn apply_overrides(settings: &mut Settings, args: &Cli) {
	if let Some(ledger) = &args.ledger {
		settings.ledger_path = ledger.clone();
	}
	if let Some(level) = &args.log_level {
		settings.logging.level = level.clone();
	}
}

fn init_tracing(config: &LoggingSettings) {
	let filter = EnvFilter::try_new(config.filter_directive())
		.unwrap_or_else(|_| EnvFilter::new("info"));

	match config.format {
		LogFormat::Json => {
			tracing_subscriber::registry()
				.with(filter)
				.with(fmt::layer().json().with_writer(io::stderr))
				.init();
		}
		LogFormat::Compact => {
			tracing_subscriber::registry()
				.with(filter)
				.with(fmt::layer().compact().with_writer(io::stderr))
				.init();
		}
		LogFormat::Pretty => {
			tracing_subscriber::registry()
				.with(filter)
				.with(fmt::layer().with_writer(io::stderr))
				.init();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use clap::CommandFactory;
	use rstest::rstest;

	#[rstest]
	fn test_cli_definition_is_consistent() {
		Cli::command().debug_assert();
	}

	#[rstest]
	#[case(&["passgate", "run"], Command::Run)]
	#[case(&["passgate", "status", "42"], Command::Status { user: "42".to_string() })]
	#[case(&["passgate", "list", "--pending"], Command::List { pending: true })]
	#[case(&["passgate", "expire-stale"], Command::ExpireStale)]
	#[case(&["passgate", "reissue", "42"], Command::Reissue { user: "42".to_string() })]
	#[case(
		&["passgate", "approve", "--admin", "1", "42"],
		Command::Approve { admin: "1".to_string(), user: "42".to_string() }
	)]
	#[case(&["passgate", "check-config"], Command::CheckConfig)]
	fn test_subcommands_parse(#[case] argv: &[&str], #[case] expected: Command) {
		// Act
		let cli = Cli::try_parse_from(argv).unwrap();

		// Assert
		assert_eq!(cli.command, expected);
		assert_eq!(cli.config, PathBuf::from("passgate.toml"));
	}

	#[rstest]
	fn test_command_line_overrides_win() {
		// Arrange
		let cli = Cli::try_parse_from([
			"passgate",
			"--ledger",
			"/tmp/ledger.json",
			"--log-level",
			"debug",
			"list",
		])
		.unwrap();
		let mut settings = Settings::default();

		// Act
		apply_overrides(&mut settings, &cli);

		// Assert
		assert_eq!(settings.ledger_path, PathBuf::from("/tmp/ledger.json"));
		assert_eq!(settings.logging.level, "debug");
	}

	#[rstest]
	fn test_missing_subcommand_is_an_error() {
		assert!(Cli::try_parse_from(["passgate"]).is_err());
	}
}
