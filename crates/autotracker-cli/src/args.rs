//! CLI argument parsing with clap derive macros.

use clap::{Parser, Subcommand};

/// Chrono Trigger randomizer autotracker.
///
/// Reads game memory through a QUsb2Snes-compatible bridge and reports which
/// characters, bosses and key items have been obtained. Changes are written
/// to stdout as JSON lines; logs go to stderr.
#[derive(Debug, Parser)]
#[command(name = "autotracker", version)]
pub struct Cli {
    /// Log filter (e.g. debug, autotracker_core=trace); overrides RUST_LOG
    #[arg(long, global = true, value_name = "FILTER")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Connect to the bridge and track until stopped
    #[command(after_help = "\
Examples:
  autotracker track                                  # Bridge on ws://localhost:8080
  autotracker track --endpoint ws://192.168.1.5:8080 # Bridge on another machine
  autotracker track --interval-ms 1000               # Poll every second
  autotracker track --no-connect                     # Wait for 'connect' on stdin

Control (one command per line on stdin):
  toggle <identifier>   Manually flip an entity (moonstone cycles 3 stages)
  status                Print the state of every entity
  disconnect            Close the bridge connection
  connect               Open a fresh bridge connection
  quit                  Exit")]
    Track(TrackArgs),

    /// List every tracked identifier grouped by kind
    Items,
}

#[derive(Debug, clap::Args)]
pub struct TrackArgs {
    /// Bridge WebSocket URL [env: AUTOTRACKER_ENDPOINT] [default: ws://localhost:8080]
    #[arg(short, long, value_name = "URL")]
    pub endpoint: Option<String>,

    /// Device discovery and polling period in milliseconds
    /// [env: AUTOTRACKER_INTERVAL_MS] [default: 3000]
    #[arg(short, long, value_name = "MS")]
    pub interval_ms: Option<u64>,

    /// Give up on an unanswered read after this many milliseconds, 0 disables
    /// [env: AUTOTRACKER_READ_TIMEOUT_MS] [default: 10000]
    #[arg(long, value_name = "MS")]
    pub read_timeout_ms: Option<u64>,

    /// Start disconnected and wait for a `connect` control command
    #[arg(long)]
    pub no_connect: bool,
}
