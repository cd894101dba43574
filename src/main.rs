//! councildocs - bulk document downloader for council planning portals.

mod cli;

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::progress::ProgressAwareWriter;
use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let settings = cli.load_settings()?;

    init_logging(cli.debug, settings.log_file.as_deref())?;

    cli::run(cli, settings).await
}

fn init_logging(debug: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    let default_filter = if debug {
        "councildocs=debug"
    } else {
        "councildocs=info"
    };

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(ProgressAwareWriter))
        .with(file_layer)
        .init();

    Ok(())
}
