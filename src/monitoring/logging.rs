//! Structured logging setup.
//!
//! The runtime logs through `tracing`; this installs the process-wide
//! `tracing-subscriber` fmt subscriber. Embedders that already install their
//! own subscriber simply skip this call.

use crate::config::{LogFormat, LoggingConfig};
use crate::core::{Error, Result};
use tracing_subscriber::EnvFilter;

/// Build the filter: `RUST_LOG` when set, otherwise the configured level.
pub fn env_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level)
        .map_err(|e| Error::Config(format!("invalid log level '{}': {}", level, e)))
}

/// Install the global subscriber.
///
/// Fails with `Error::Config` if a global subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(&config.level)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match config.format {
        LogFormat::Text => builder.with_target(true).try_init(),
        LogFormat::Json => builder.json().with_current_span(false).try_init(),
    };

    installed.map_err(|e| Error::Config(format!("logging already initialised: {}", e)))
}
