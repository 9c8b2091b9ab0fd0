//! Bitemporal-DB: command-line entry point

use anyhow::Context;
use bitemporal_db::cli::{execute, Cli};
use bitemporal_db::db::TaskDB;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let config = cli.config().context("failed to load configuration")?;
    let db = TaskDB::open(&config)
        .with_context(|| format!("failed to open task log in {}", config.data_dir.display()))?;

    let output = execute(&db, cli.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
