//! autotracker CLI entry point.

mod args;
mod bridge;
mod config;

use std::collections::BTreeMap;

use anyhow::Context;
use autotracker_core::state::TrackerState;
use clap::Parser;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::args::{Cli, Commands, TrackArgs};
use crate::bridge::{Notification, Tracker};
use crate::config::TrackerConfig;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let result = match cli.command {
        Commands::Track(args) => run_tracker(&args),
        Commands::Items => print_items(),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Log to stderr so stdout carries only notifications.
///
/// Filter priority: `--log-level`, then `RUST_LOG`, then `info`.
fn init_tracing(log_level: Option<&str>) {
    let filter = match log_level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|e| {
            eprintln!("Invalid --log-level '{}': {}, using info", level, e);
            EnvFilter::new("info")
        }),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Print every tracked identifier grouped by kind.
fn print_items() -> anyhow::Result<()> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for entity in TrackerState::new().snapshot() {
        let kind = serde_json::to_value(entity.kind)?
            .as_str()
            .unwrap_or_default()
            .to_string();
        groups.entry(kind).or_default().push(entity.identifier);
    }
    println!("{}", serde_json::to_string_pretty(&groups)?);
    Ok(())
}

/// Run the tracker with graceful signal handling.
///
/// Handles SIGINT (Ctrl+C) and SIGTERM; pending notifications are written
/// before exit.
fn run_tracker(args: &TrackArgs) -> anyhow::Result<()> {
    let config = TrackerConfig::resolve(args);
    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;

    let result = runtime.block_on(async {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let printer = tokio::spawn(print_notifications(notify_rx));
        let controls = bridge::control::spawn_stdin();
        let tracker = Tracker::new(config, notify_tx);

        let tracked = tokio::select! {
            result = tracker.run(controls) => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down gracefully");
                Ok(())
            }
            _ = sigterm() => {
                info!("Received SIGTERM, shutting down gracefully");
                Ok(())
            }
        };
        // The tracker is dropped here, which closes the notification channel
        let printed = printer.await.context("Notification printer panicked")?;
        tracked.and(printed)
    });

    // The stdin reader blocks on a read that cannot be cancelled
    runtime.shutdown_background();
    result
}

/// Write each notification to stdout as one JSON line.
async fn print_notifications(
    mut notifications: mpsc::UnboundedReceiver<Notification>,
) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(notification) = notifications.recv().await {
        let line =
            serde_json::to_string(&notification).context("Failed to serialize notification")?;
        stdout
            .write_all(line.as_bytes())
            .await
            .context("Failed to write notification")?;
        stdout
            .write_all(b"\n")
            .await
            .context("Failed to write newline")?;
        stdout.flush().await.context("Failed to flush stdout")?;
    }
    Ok(())
}

/// Wait for SIGTERM signal (Unix only).
///
/// If signal registration fails, logs a warning and waits indefinitely.
#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(
                "Failed to register SIGTERM handler: {}, tracker will only respond to SIGINT",
                e
            );
            std::future::pending::<()>().await;
        }
    }
}

/// SIGTERM is not available on non-Unix platforms; use a never-completing future.
#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await;
}
