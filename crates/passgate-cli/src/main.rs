//! passgate operator CLI
//!
//! ```bash
//! passgate --config passgate.toml run
//! passgate status 123456789
//! passgate list
//! passgate expire-stale
//! passgate reissue 123456789
//! passgate approve --admin 1001 123456789
//! ```

mod cli;
mod commands;

use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = cli::Cli::parse();
	cli::run(args).await
}
