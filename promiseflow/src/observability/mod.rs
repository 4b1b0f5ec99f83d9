//! Tracing subscriber setup for binaries and tests.
//!
//! The library itself only emits through `tracing` macros; installing a
//! subscriber is left to the application.

use crate::errors::PromiseError;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Fallback filter directive when `RUST_LOG` is not set.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
    /// Whether to include thread names (useful to tell worker and timer threads apart).
    #[serde(default = "default_thread_names")]
    pub thread_names: bool,
}

fn default_filter() -> String {
    "info".to_string()
}

fn default_thread_names() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            format: LogFormat::default(),
            thread_names: default_thread_names(),
        }
    }
}

impl LoggingConfig {
    /// Creates a configuration with the given fallback filter.
    #[must_use]
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            ..Self::default()
        }
    }

    /// Switches to JSON output.
    #[must_use]
    pub const fn json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    /// Builds the env filter, preferring `RUST_LOG` when it is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the fallback directive cannot be parsed.
    pub fn env_filter(&self) -> Result<EnvFilter, PromiseError> {
        EnvFilter::try_from_default_env().or_else(|_| {
            EnvFilter::try_new(&self.filter).map_err(|e| {
                PromiseError::invalid_argument(format!("log filter '{}': {e}", self.filter))
            })
        })
    }
}

/// Installs a global subscriber.
///
/// # Errors
///
/// Returns an error if the filter is invalid or a global subscriber is
/// already installed.
pub fn try_init_tracing(config: &LoggingConfig) -> Result<(), PromiseError> {
    let filter = config.env_filter()?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_names(config.thread_names),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_names(config.thread_names),
            )
            .try_init(),
    };

    result.map_err(|e| PromiseError::Runtime(format!("tracing subscriber: {e}")))
}

/// Installs a pretty subscriber with `filter` as the fallback directive.
///
/// Does nothing if a subscriber is already installed.
pub fn init_tracing(filter: &str) {
    if let Err(e) = try_init_tracing(&LoggingConfig::new(filter)) {
        tracing::debug!(error = %e, "Tracing subscriber not installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.filter, "info");
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.thread_names);
    }

    #[test]
    fn test_logging_config_from_json() {
        let config: LoggingConfig =
            serde_json::from_str(r#"{"filter": "promiseflow=debug", "format": "json"}"#).unwrap();
        assert_eq!(config.filter, "promiseflow=debug");
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(LoggingConfig::new("warn").json().format, LogFormat::Json);
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_tracing("debug");
        init_tracing("debug");
        assert!(try_init_tracing(&LoggingConfig::default()).is_err());
    }
}
