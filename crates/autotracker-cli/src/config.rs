//! Tracker configuration resolution.
//!
//! Every setting is taken from, in order:
//! 1. The command-line flag
//! 2. An `AUTOTRACKER_*` environment variable (ignores empty or invalid values)
//! 3. The built-in default
//!
//! | Setting | Flag | Env | Default |
//! |---------|------|-----|---------|
//! | Bridge URL | `--endpoint` | `AUTOTRACKER_ENDPOINT` | `ws://localhost:8080` |
//! | Period | `--interval-ms` | `AUTOTRACKER_INTERVAL_MS` | 3000 |
//! | Read timeout | `--read-timeout-ms` | `AUTOTRACKER_READ_TIMEOUT_MS` | 10000, 0 disables |

use std::env;
use std::time::Duration;

use autotracker_core::protocol::DEFAULT_ENDPOINT;

use crate::args::TrackArgs;

pub const ENDPOINT_ENV: &str = "AUTOTRACKER_ENDPOINT";
pub const INTERVAL_ENV: &str = "AUTOTRACKER_INTERVAL_MS";
pub const READ_TIMEOUT_ENV: &str = "AUTOTRACKER_READ_TIMEOUT_MS";

pub const DEFAULT_INTERVAL_MS: u64 = 3000;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 10_000;

/// Resolved settings for one `track` run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    pub endpoint: String,
    /// Period of both the discovery and the poll timer.
    pub interval: Duration,
    /// `None` when stalled reads are never timed out.
    pub read_timeout: Option<Duration>,
    pub auto_connect: bool,
}

impl TrackerConfig {
    pub fn resolve(args: &TrackArgs) -> Self {
        Self {
            endpoint: resolve_endpoint(args.endpoint.as_deref()),
            interval: resolve_interval(args.interval_ms),
            read_timeout: resolve_read_timeout(args.read_timeout_ms),
            auto_connect: !args.no_connect,
        }
    }
}

/// Non-empty value of an environment variable.
fn env_value(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        Ok(_) => {
            tracing::warn!("{} is empty, ignoring", name);
            None
        }
        Err(_) => None,
    }
}

fn env_millis(name: &str) -> Option<u64> {
    let value = env_value(name)?;
    match value.parse::<u64>() {
        Ok(ms) => Some(ms),
        Err(_) => {
            tracing::warn!("{}='{}' is not a number of milliseconds, ignoring", name, value);
            None
        }
    }
}

fn is_websocket_url(url: &str) -> bool {
    url.starts_with("ws://") || url.starts_with("wss://")
}

/// Bridge URL from flag, env, or default. Non-WebSocket URLs are skipped.
pub fn resolve_endpoint(flag: Option<&str>) -> String {
    let candidates = [
        flag.map(|f| ("--endpoint", f.to_string())),
        env_value(ENDPOINT_ENV).map(|v| (ENDPOINT_ENV, v)),
    ];

    for (source, url) in candidates.into_iter().flatten() {
        if is_websocket_url(&url) {
            return url;
        }
        tracing::warn!(
            "Invalid endpoint '{}' from {}, expected ws:// or wss://",
            url,
            source
        );
    }
    DEFAULT_ENDPOINT.to_string()
}

/// Timer period from flag, env, or default. Zero is rejected.
pub fn resolve_interval(flag: Option<u64>) -> Duration {
    let candidates = [
        flag.map(|ms| ("--interval-ms", ms)),
        env_millis(INTERVAL_ENV).map(|ms| (INTERVAL_ENV, ms)),
    ];

    for (source, ms) in candidates.into_iter().flatten() {
        if ms > 0 {
            return Duration::from_millis(ms);
        }
        tracing::warn!("Interval from {} must be greater than 0, ignoring", source);
    }
    Duration::from_millis(DEFAULT_INTERVAL_MS)
}

/// Read timeout from flag, env, or default. Zero disables the timeout.
pub fn resolve_read_timeout(flag: Option<u64>) -> Option<Duration> {
    let ms = flag
        .or_else(|| env_millis(READ_TIMEOUT_ENV))
        .unwrap_or(DEFAULT_READ_TIMEOUT_MS);
    (ms > 0).then(|| Duration::from_millis(ms))
}
