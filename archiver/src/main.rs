// Archiver binary entry point

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use common::archiver::{run_concurrent, Archiver, RunOptions};
use common::bootstrap::{init_archive_root, init_ssh_connector, load_settings, validate_settings};
use common::telemetry::init_logging;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = load_settings(&cli.config)?;

    let log_level = if cli.verbose {
        "debug"
    } else {
        settings.observability.log_level.as_str()
    };
    init_logging(log_level, settings.observability.json)?;
    validate_settings(&settings, &cli.config)?;

    init_archive_root(&settings, cli.dry_run)?;

    let today = cli
        .today
        .unwrap_or_else(|| chrono::Local::now().date_naive());
    let concurrency = cli.concurrency.unwrap_or(settings.concurrency).max(1);
    let options = RunOptions {
        dry_run: cli.dry_run,
        remove_remote: cli.remove,
        verbose: cli.verbose,
    };

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let archiver = Arc::new(
        Archiver::new(
            settings.archive_dir.clone(),
            init_ssh_connector(&settings, cli.use_ssh_agent),
            options,
            today,
        )
        .with_shutdown_flag(Arc::clone(&shutdown_flag)),
    );

    // Stop after the file in flight; a second Ctrl+C falls back to the default handler
    let flag = Arc::clone(&shutdown_flag);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                warn!("Shutdown signal received, finishing current transfer");
                flag.store(true, Ordering::SeqCst);
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
        }
    });

    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("archive_run", run_id = %run_id, today = %today);
    info!(
        parent: &span,
        dry_run = options.dry_run,
        remove = options.remove_remote,
        concurrency = concurrency,
        "Starting archive run"
    );

    let summary = run_concurrent(archiver, settings.services(), concurrency)
        .instrument(span.clone())
        .await;

    info!(
        parent: &span,
        units = summary.units.len(),
        failed_units = summary.failed_units(),
        archived = summary.archived_files(),
        failed_files = summary.failed_files(),
        pruned = summary.pruned_files(),
        "Archive run complete"
    );

    if cli.json {
        let json =
            serde_json::to_string_pretty(&summary).context("Failed to serialize run summary")?;
        println!("{}", json);
    }

    Ok(())
}
