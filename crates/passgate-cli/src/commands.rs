//! Subcommand implementations.

use std::sync::Arc;

use anyhow::Context;
use passgate_credentials::{CredentialIssuer, ShadowsocksIssuer};
use passgate_ledger::{
	Clock, JsonFileStore, Ledger, LedgerError, LedgerStore, RecordManager, SystemClock, UserId,
};
use passgate_lifecycle::{
	Lifecycle, LifecycleConfig, LogNotifier, Notification, Reconciler, ReconcilerConfig, Settings,
	StatusView,
};
use passgate_payment::{ManualAuthority, PaymentAuthority, SettlementMode, YooKassaGateway};
use tracing::{info, warn};

/// How to treat an unreadable ledger file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recovery {
	/// Refuse to start
	Strict,
	/// Start from an empty ledger and log a warning
	StartEmpty,
}

/// Opens the ledger for exclusive use. Fails while another process owns it.
fn open_records(settings: &Settings, recovery: Recovery) -> anyhow::Result<Arc<RecordManager>> {
	let store = Arc::new(
		JsonFileStore::open(&settings.ledger_path)
			.with_context(|| format!("opening ledger {}", settings.ledger_path.display()))?,
	);
	let clock = Arc::new(SystemClock);
	let records = match recovery {
		Recovery::Strict => RecordManager::open(store, clock)
			.with_context(|| format!("opening ledger {}", settings.ledger_path.display()))?,
		Recovery::StartEmpty => RecordManager::open_or_empty(store, clock),
	};
	Ok(Arc::new(records))
}

/// Reads the ledger without taking ownership of it.
fn inspect_ledger(settings: &Settings) -> anyhow::Result<Ledger> {
	JsonFileStore::read_only(&settings.ledger_path)
		.load()
		.with_context(|| format!("reading ledger {}", settings.ledger_path.display()))
}

fn is_locked(error: &anyhow::Error) -> bool {
	error
		.downcast_ref::<LedgerError>()
		.is_some_and(LedgerError::is_locked)
}

fn build_lifecycle(settings: &Settings, recovery: Recovery) -> anyhow::Result<Lifecycle> {
	let records = open_records(settings, recovery)?;
	let authority: Arc<dyn PaymentAuthority> = match settings.mode {
		SettlementMode::Automatic => Arc::new(YooKassaGateway::new(settings.gateway.to_config())?),
		SettlementMode::Manual => Arc::new(match &settings.manual_instruction {
			Some(template) => ManualAuthority::new(template.clone()),
			None => ManualAuthority::default(),
		}),
	};
	let issuer: Arc<dyn CredentialIssuer> =
		Arc::new(ShadowsocksIssuer::new(settings.shadowsocks.clone())?);
	let engine = Reconciler::new(
		records,
		authority,
		issuer.clone(),
		Arc::new(LogNotifier),
		ReconcilerConfig {
			poll_interval: settings.poll_interval(),
			timeout: settings.poll_timeout(),
		},
	);
	Ok(Lifecycle::new(
		engine,
		issuer,
		LifecycleConfig::from_settings(settings),
	))
}

pub async fn serve(settings: &Settings) -> anyhow::Result<()> {
	let lifecycle = build_lifecycle(settings, Recovery::StartEmpty)?;
	let engine = lifecycle.engine().clone();
	let resumed = engine.resume().await?;
	info!(
		mode = %settings.mode,
		resumed,
		ledger = %settings.ledger_path.display(),
		"passgate running"
	);

	shutdown_signal().await;
	info!("shutdown signal received");
	engine.shutdown().await;
	Ok(())
}

/// Prints the status of `user`. While a running instance owns the ledger the
/// stored state is shown as is.
pub async fn status(settings: &Settings, user: &str) -> anyhow::Result<()> {
	let view = status_view(settings, &UserId::from(user)).await?;
	print!("{}", render_status(&view));
	Ok(())
}

async fn status_view(settings: &Settings, user: &UserId) -> anyhow::Result<StatusView> {
	match build_lifecycle(settings, Recovery::Strict) {
		Ok(lifecycle) => Ok(lifecycle.on_status_query(user).await?),
		Err(e) if is_locked(&e) => {
			info!(
				ledger = %settings.ledger_path.display(),
				"ledger owned by a running instance, showing stored state"
			);
			let mut ledger = inspect_ledger(settings)?;
			Ok(StatusView::from_stored(
				user,
				ledger.remove(user),
				SystemClock.today(),
			))
		}
		Err(e) => Err(e),
	}
}

pub fn list(settings: &Settings, pending_only: bool) -> anyhow::Result<()> {
	let ledger = inspect_ledger(settings)?;
	let today = SystemClock.today();
	for (user, record) in ledger {
		if pending_only && record.pending_payment.is_none() {
			continue;
		}
		let end = record
			.subscription_end
			.map_or_else(|| "-".to_string(), |end| end.to_string());
		let pending = record
			.pending_payment
			.as_ref()
			.map_or_else(|| "-".to_string(), |p| format!("{} ({})", p.tariff.id, p.stage));
		println!(
			"{user}\t{}\t{end}\t{}\t{pending}",
			record.username.as_deref().unwrap_or("-"),
			if record.is_active(today) { "active" } else { "inactive" },
		);
	}
	Ok(())
}

pub async fn expire_stale(settings: &Settings) -> anyhow::Result<()> {
	let lifecycle = build_lifecycle(settings, Recovery::Strict)?;
	let resolved = lifecycle.expire_stale().await?;
	println!("resolved {resolved} stale pending payment(s)");
	Ok(())
}

pub async fn reissue(settings: &Settings, user: &str) -> anyhow::Result<()> {
	let lifecycle = build_lifecycle(settings, Recovery::Strict)?;
	let link = lifecycle.reissue_credential(&UserId::from(user)).await?;
	println!("{link}");
	Ok(())
}

pub async fn approve(settings: &Settings, admin: &str, user: &str) -> anyhow::Result<()> {
	let lifecycle = build_lifecycle(settings, Recovery::Strict)?;
	let outcome = lifecycle
		.on_admin_approve(&UserId::from(admin), &UserId::from(user))
		.await?;
	match outcome {
		Notification::PaymentSucceeded {
			subscription_end,
			access_link,
			..
		} => println!("approved, subscription until {subscription_end}\n{access_link}"),
		Notification::CredentialPending {
			subscription_end, ..
		} => {
			warn!(user, "access link could not be issued");
			println!("approved, subscription until {subscription_end}, link pending");
		}
		Notification::PaymentEnded { reason, .. } => println!("payment ended: {reason}"),
	}
	Ok(())
}

fn render_status(view: &StatusView) -> String {
	let mut out = format!("user:          {}\n", view.user);
	if !view.registered {
		out.push_str("registered:    no\n");
		return out;
	}
	match view.subscription_end {
		Some(end) if view.active => out.push_str(&format!(
			"subscription:  active until {end} ({} day(s) left)\n",
			view.remaining_days
		)),
		Some(end) => out.push_str(&format!("subscription:  expired on {end}\n")),
		None => out.push_str("subscription:  none\n"),
	}
	out.push_str(&format!(
		"trial used:    {}\n",
		if view.trial_used { "yes" } else { "no" }
	));
	if let Some(link) = &view.access_link {
		out.push_str(&format!("access link:   {link}\n"));
	}
	if let Some(pending) = &view.pending {
		out.push_str(&format!(
			"pending:       {} ({}) since {}, reference {}\n",
			pending.tariff.id, pending.stage, pending.created_at, pending.reference
		));
	}
	out
}

async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(e) = tokio::signal::ctrl_c().await {
			warn!("failed to listen for Ctrl+C: {e}");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
			Ok(mut sig) => {
				sig.recv().await;
			}
			Err(e) => {
				warn!("failed to listen for SIGTERM: {e}");
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {}
		_ = terminate => {}
	}
}
