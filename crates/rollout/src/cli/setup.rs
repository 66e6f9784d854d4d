//! Logging initialization for the CLI.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured `level`. Output goes to stderr
/// so it never mixes with the JSON written to stdout.
///
/// # Errors
/// Returns an error if the level is not a valid filter or a subscriber is already set.
pub fn init_tracing(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| anyhow::anyhow!("Invalid log level '{level}': {e}"))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {e}"))
}
