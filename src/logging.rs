// src/logging.rs

//! Logging setup for applications embedding `cellulario`, using `tracing` +
//! `tracing-subscriber`.
//!
//! The library itself only emits events; it never installs a subscriber.
//!
//! Priority for determining the log level:
//! 1. the `level` argument (if provided)
//! 2. `CELLULARIO_LOG` environment variable (e.g. "info", "debug")
//! 3. default to `info`
//!
//! Logs are sent to STDERR so that stdout stays free for program output.

use anyhow::{anyhow, Result};
use tracing_subscriber::fmt;

/// Environment variable consulted when no explicit level is given.
pub const LOG_ENV_VAR: &str = "CELLULARIO_LOG";

/// Initialise the global logging subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(level: Option<&str>) -> Result<()> {
    let level = resolve_level(level, std::env::var(LOG_ENV_VAR).ok().as_deref());

    fmt()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("installing tracing subscriber: {e}"))?;

    Ok(())
}

fn resolve_level(explicit: Option<&str>, env: Option<&str>) -> tracing::Level {
    explicit
        .and_then(parse_level_str)
        .or_else(|| env.and_then(parse_level_str))
        .unwrap_or(tracing::Level::INFO)
}

fn parse_level_str(s: &str) -> Option<tracing::Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}
