//! night-sync - Main entry point
//!
//! Copies a night of telescope data to the archive host, verifies it and
//! marks the removable drive copy for deletion once everything checks out.

use anyhow::{Context, Result};
use clap::Parser;
use night_sync::executor::NightBatch;
use night_sync::fs::layout::NightDate;
use night_sync::remote::SshSession;
use night_sync::{utils, Config, Telescope};
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Telescope which took the data
    #[arg(short, long, value_enum)]
    telescope: Telescope,

    /// Night to process: YYYYMMDDUT, "today" or "yesterday" (UTC).
    /// Omit to process every pending night on the removable drive.
    #[arg(short, long)]
    date: Option<NightDate>,

    /// Debug-level console output
    #[arg(short, long)]
    verbose: bool,

    /// Do not copy files that are missing or differ on the archive host
    #[arg(long)]
    no_copy: bool,

    /// Only run the final check for the night, trusting the existing transfer log
    #[arg(long)]
    skip_file_checksums: bool,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)
            .with_context(|| format!("loading {}", config_path.display()))?
    } else {
        Config::default()
    };
    config.apply_env_overrides()?;
    if args.no_copy {
        config.sync.copy = false;
    }
    if args.skip_file_checksums {
        config.sync.skip_file_checksums = true;
    }

    // Initialize logging
    let log_level = if args.verbose {
        "debug"
    } else {
        args.log_level.as_deref().unwrap_or(&config.log.level)
    };
    utils::logger::init(log_level)?;

    tracing::info!(
        "Starting night-sync v{} (telescope: {})",
        env!("CARGO_PKG_VERSION"),
        args.telescope
    );

    // A telescope without a site entry is fatal before anything else runs
    config.site(args.telescope)?;
    tracing::info!("Archive destination: {}", config.remote_destination());

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let telescope = args.telescope;
    let date = args.date;
    let batch_cancel = cancel.clone();

    let summary = tokio::task::spawn_blocking(move || -> night_sync::Result<_> {
        let mut session = SshSession::connect(&config.remote)?;
        let batch = NightBatch::new(&config, telescope);
        let nights = batch.pending_nights(date);
        batch.run(&mut session, nights, &batch_cancel)
    })
    .await??;

    if summary.interrupted() {
        tracing::warn!("Stopped early on shutdown request");
    }
    tracing::info!("night-sync finished");
    Ok(())
}

/// Cancel on the first SIGINT/SIGTERM; the pipeline stops between files.
/// A second Ctrl+C exits immediately.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, finishing current file"),
        _ = terminate => tracing::info!("Received SIGTERM, finishing current file"),
    }

    cancel.cancel();

    if signal::ctrl_c().await.is_ok() {
        tracing::warn!("Second SIGINT, exiting now");
        std::process::exit(130);
    }
}
