//! Telemetry initialisation for the `docseal` CLI.
//!
//! Structured JSON logs go to stderr; stdout carries only command output.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Initialise the tracing subscriber at `log_level`.
///
/// `RUST_LOG`, when set, takes precedence over `log_level`.
///
/// # Errors
///
/// Returns an error if the subscriber has already been set.
pub fn init(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .json()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialise docseal tracing subscriber: {e}"))
}
