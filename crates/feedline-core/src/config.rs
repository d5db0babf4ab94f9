//! Client configuration
//!
//! Layered the usual way: built-in defaults, then an optional TOML file, then
//! `FEEDLINE_*` environment variables, then validation.
//!
//! ```toml
//! [sync]
//! mutation_timeout_ms = 10000
//!
//! [routing]
//! overlay_min_width = 768
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::SyncError;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "FEEDLINE_";

/// Default remote write timeout.
pub const DEFAULT_MUTATION_TIMEOUT_MS: u64 = 10_000;

/// Default viewport width at which overlays become available.
pub const DEFAULT_OVERLAY_MIN_WIDTH: u32 = 768;

/// Default log filter.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Synchronization settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Remote writes not answered within this many milliseconds fail.
    pub mutation_timeout_ms: u64,
}

impl SyncConfig {
    /// The mutation timeout as a duration.
    pub fn mutation_timeout(&self) -> Duration {
        Duration::from_millis(self.mutation_timeout_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mutation_timeout_ms: DEFAULT_MUTATION_TIMEOUT_MS,
        }
    }
}

/// Routing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Viewports at least this wide (CSS px) can show overlays.
    pub overlay_min_width: u32,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            overlay_min_width: DEFAULT_OVERLAY_MIN_WIDTH,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `feedline_app=debug`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            json: false,
        }
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedlineConfig {
    /// Synchronization settings
    pub sync: SyncConfig,
    /// Routing settings
    pub routing: RoutingConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl FeedlineConfig {
    /// Parse a TOML document. Missing sections take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, SyncError> {
        toml::from_str(content).map_err(|e| SyncError::config(format!("invalid TOML: {e}")))
    }

    /// Load from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, SyncError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Apply `FEEDLINE_*` variables from the process environment.
    pub fn merge_with_env(&mut self) -> Result<(), SyncError> {
        self.merge_vars(std::env::vars())
    }

    /// Apply `FEEDLINE_SECTION_KEY=value` pairs; other variables are ignored.
    pub fn merge_vars<I>(&mut self, vars: I) -> Result<(), SyncError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(rest) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let rest = rest.to_ascii_lowercase();
            let Some((section, key)) = rest.split_once('_') else {
                continue;
            };
            self.set_from_string(&format!("{section}.{key}"), &value)?;
        }
        Ok(())
    }

    /// Set one value by dotted key, e.g. `sync.mutation_timeout_ms`.
    pub fn set_from_string(&mut self, key: &str, value: &str) -> Result<(), SyncError> {
        match key {
            "sync.mutation_timeout_ms" => self.sync.mutation_timeout_ms = parse(key, value)?,
            "routing.overlay_min_width" => self.routing.overlay_min_width = parse(key, value)?,
            "logging.level" => self.logging.level = value.to_string(),
            "logging.json" => self.logging.json = parse(key, value)?,
            _ => return Err(SyncError::config(format!("unknown key '{key}'"))),
        }
        Ok(())
    }

    /// Reject values the client cannot run with.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.sync.mutation_timeout_ms == 0 {
            return Err(SyncError::config("sync.mutation_timeout_ms must be > 0"));
        }
        if self.routing.overlay_min_width == 0 {
            return Err(SyncError::config("routing.overlay_min_width must be > 0"));
        }
        if self.logging.level.trim().is_empty() {
            return Err(SyncError::config("logging.level must not be empty"));
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, SyncError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| SyncError::config(format!("invalid value '{value}' for {key}: {e}")))
}
