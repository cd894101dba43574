//! Command-line interface for councildocs.

pub mod progress;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use console::style;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use councildocs::config::{Config, ConfigError, Settings};
use councildocs::scrapers::{Extractor, HttpClient};
use councildocs::services::filter::{self, FilterConfig};
use councildocs::services::report::format_bytes;
use councildocs::services::{
    CacheStore, DiscoverySource, DocumentDiscovery, DownloadConfig, DownloadEvent,
    DownloadService, ExecutionMode, FilterOutcome, RunSummary,
};

use progress::DownloadProgress;

#[derive(Parser, Debug)]
#[command(name = "councildocs")]
#[command(about = "Download documents from a council planning portal")]
#[command(version)]
pub struct Cli {
    /// Config file (TOML, YAML or JSON; default ./councildocs.toml)
    #[arg(short, long, env = "COUNCILDOCS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Download with a pool of parallel workers
    #[arg(short, long)]
    pub parallel: bool,

    /// Number of parallel workers (implies --parallel)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// First document index to process (0-based)
    #[arg(long, default_value = "0")]
    pub start: usize,

    /// Index after the last document to process
    #[arg(long)]
    pub end: Option<usize>,

    /// Maximum number of documents to process (0 = all)
    #[arg(short, long)]
    pub batch: Option<usize>,

    /// Ignore and do not write the document cache
    #[arg(long)]
    pub no_cache: bool,

    /// Re-download files that already exist
    #[arg(long)]
    pub overwrite: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Disable progress bars
    #[arg(long)]
    pub no_progress: bool,
}

impl Cli {
    /// Load the config file and apply command-line overrides.
    pub fn load_settings(&self) -> Result<Settings, ConfigError> {
        let mut settings = Config::discover(self.config.as_deref())?.into_settings();
        self.apply_overrides(&mut settings);
        settings.validate()?;
        Ok(settings)
    }

    fn apply_overrides(&self, settings: &mut Settings) {
        if let Some(workers) = self.workers {
            settings.max_workers = workers;
        }
        if let Some(batch) = self.batch {
            settings.batch_size = batch;
        }
        if self.no_cache {
            settings.use_cache = false;
        }
        if self.overwrite {
            settings.overwrite = true;
        }
    }

    pub fn execution_mode(&self, settings: &Settings) -> ExecutionMode {
        if self.parallel || self.workers.is_some() {
            ExecutionMode::Parallel {
                workers: settings.max_workers,
            }
        } else {
            ExecutionMode::Sequential
        }
    }
}

/// Discover, filter and download. Per-document failures are reported, not
/// returned; an error here means nothing could be downloaded at all.
pub async fn run(cli: Cli, settings: Settings) -> anyhow::Result<()> {
    info!("Starting document download for {}", settings.council_name);

    let client = HttpClient::from_settings(&settings).context("Failed to build HTTP client")?;
    let extractor = Extractor::from_settings(&settings);
    let cache = CacheStore::from_settings(&settings);

    let discovered = DocumentDiscovery::new(&client, &extractor, &cache)
        .discover(&settings.start_url)
        .await
        .with_context(|| format!("No documents could be read from {}", settings.start_url))?;
    if discovered.source == DiscoverySource::Cache {
        info!("Using cached document list");
    }

    let filter_config = FilterConfig::from_settings(&settings).with_range(cli.start, cli.end);
    let dropped = discovered.dropped;
    let selected = filter::apply(discovered.documents, &filter_config);
    info!("{}", selection_message(dropped, &selected));
    if selected.records.is_empty() {
        warn!("No documents to download");
        return Ok(());
    }

    let mode = cli.execution_mode(&settings);
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let client = client.with_referer(settings.start_url.clone());
    let service = DownloadService::new(client, DownloadConfig::from_settings(&settings, mode))
        .with_cancellation(cancel);

    let (event_tx, event_rx) = mpsc::channel::<DownloadEvent>(100);
    let progress_display = (!cli.no_progress)
        .then(|| Arc::new(DownloadProgress::new(mode.worker_count(), selected.records.len() as u64)));
    let event_handler = tokio::spawn(progress::handle_events(event_rx, progress_display.clone()));

    let summary = service.run(selected.records, event_tx).await;

    let _ = event_handler.await;
    if let Some(progress) = progress_display {
        progress.finish().await;
    }

    summary.log();
    print_summary(&summary);
    Ok(())
}

/// One line accounting for every entry the page listed.
fn selection_message(dropped: usize, selected: &FilterOutcome) -> String {
    format!(
        "Selected {} of {} matching documents ({} duplicates, {} other types, {} unreadable entries)",
        selected.records.len(),
        selected.matched,
        selected.duplicates,
        selected.excluded,
        dropped
    )
}

/// Cancel `token` on Ctrl-C. Tasks already running are allowed to finish.
fn spawn_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, waiting for in-flight downloads to finish");
            token.cancel();
        }
    });
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!(
        "{} {} downloaded ({})",
        style("✓").green(),
        summary.succeeded,
        format_bytes(summary.bytes_downloaded)
    );
    println!("{} {} skipped (already present)", style("→").cyan(), summary.skipped);
    if summary.failed > 0 {
        println!("{} {} failed:", style("✗").red(), summary.failed);
        for failure in &summary.failures {
            println!("    {}: {}", failure.filename, failure.error);
        }
    }
    if summary.not_attempted > 0 {
        println!("{} {} not attempted", style("!").yellow(), summary.not_attempted);
    }
    println!(
        "  {:.1}s, {:.2} docs/sec",
        summary.elapsed.as_secs_f64(),
        summary.docs_per_second()
    );
}
