//! Logging setup.

use crate::config::LoggingConfig;
use crate::errors::ConfigError;
use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber configured by `config`.
///
/// Returns `Ok(false)` if a global subscriber was already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<bool, ConfigError> {
    let filter = EnvFilter::try_new(&config.filter)
        .map_err(|e| ConfigError::invalid_value("filter", e.to_string()))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target);

    let installed = if config.json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };
    Ok(installed)
}
