//! Tracing subscriber setup

use feedline_core::{LoggingConfig, SyncError};
use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber.
///
/// `RUST_LOG` overrides the configured level when set. Returns `Ok(false)`
/// when another subscriber was installed first.
pub fn init(config: &LoggingConfig) -> Result<bool, SyncError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| SyncError::config(format!("logging.level {:?}: {e}", config.level)))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    let installed = if config.json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };
    Ok(installed)
}
