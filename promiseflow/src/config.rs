//! Configuration types for engines and promise chains.
//!
//! Durations are carried as milliseconds so configuration documents stay
//! plain JSON. A value of `0` means "not set" for both the retry delay and
//! the timeout; the accessors turn that sentinel into `None`.

use crate::errors::PromiseError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Orchestrator-level defaults applied to every stage of a chain.
///
/// A setting made on an individual [`Task`](crate::task::Task) always wins
/// over the value configured here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromiseConfig {
    /// Number of retries after the first failed attempt.
    #[serde(default)]
    pub retries: u32,
    /// Delay before a retry in milliseconds (`0` = retry immediately).
    #[serde(default)]
    pub retry_delay_ms: u64,
    /// Per-attempt timeout in milliseconds (`0` = no timeout).
    #[serde(default)]
    pub timeout_ms: u64,
    /// Whether chained stages receive the cumulative results of all prior stages.
    #[serde(default)]
    pub pass_results_through: bool,
    /// Whether `when` starts the first stage right away.
    #[serde(default = "default_start_immediately")]
    pub start_immediately: bool,
}

fn default_start_immediately() -> bool {
    true
}

impl Default for PromiseConfig {
    fn default() -> Self {
        Self {
            retries: 0,
            retry_delay_ms: 0,
            timeout_ms: 0,
            pass_results_through: false,
            start_immediately: default_start_immediately(),
        }
    }
}

impl PromiseConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry count and clears any retry delay.
    #[must_use]
    pub const fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self.retry_delay_ms = 0;
        self
    }

    /// Sets the retry count and the delay between retries.
    #[must_use]
    pub fn with_retries_and_delay(mut self, retries: u32, delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay_ms = duration_to_ms(delay);
        self
    }

    /// Sets the per-attempt timeout. `Duration::ZERO` clears it; anything
    /// else is kept to millisecond precision, rounded up.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = duration_to_ms(timeout);
        self
    }

    /// Sets the pass-through policy.
    #[must_use]
    pub const fn with_pass_results_through(mut self, enabled: bool) -> Self {
        self.pass_results_through = enabled;
        self
    }

    /// Sets whether the first stage starts as soon as the chain is created.
    #[must_use]
    pub const fn with_start_immediately(mut self, enabled: bool) -> Self {
        self.start_immediately = enabled;
        self
    }

    /// Returns the retry delay, if one is configured.
    #[must_use]
    pub const fn retry_delay(&self) -> Option<Duration> {
        ms_to_duration(self.retry_delay_ms)
    }

    /// Returns the timeout, if one is configured.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        ms_to_duration(self.timeout_ms)
    }
}

/// Configuration for an [`Engine`](crate::engine::Engine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Size of the worker pool that runs blocking task work.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Thread name prefix for worker pool threads.
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
    /// Thread name for the timer service.
    #[serde(default = "default_timer_thread_name")]
    pub timer_thread_name: String,
    /// Upper bound on threads running completion callbacks and sinks.
    ///
    /// These run off the timer thread, so a slow sink never delays a timeout
    /// or a retry of another chain.
    #[serde(default = "default_callback_threads")]
    pub callback_threads: usize,
    /// Defaults for every promise created by the engine.
    #[serde(default)]
    pub defaults: PromiseConfig,
}

fn default_worker_threads() -> usize {
    4
}

fn default_thread_name() -> String {
    "promiseflow-worker".to_string()
}

fn default_timer_thread_name() -> String {
    "promiseflow-timer".to_string()
}

fn default_callback_threads() -> usize {
    64
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            thread_name: default_thread_name(),
            timer_thread_name: default_timer_thread_name(),
            callback_threads: default_callback_threads(),
            defaults: PromiseConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Creates an engine configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses an engine configuration from a JSON document.
    ///
    /// Missing fields fall back to their defaults.
    pub fn from_json(json: &str) -> Result<Self, PromiseError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PromiseError::invalid_argument(format!("engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the worker pool size.
    #[must_use]
    pub const fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Sets the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Sets the bound on callback threads.
    #[must_use]
    pub const fn with_callback_threads(mut self, threads: usize) -> Self {
        self.callback_threads = threads;
        self
    }

    /// Sets the promise defaults.
    #[must_use]
    pub fn with_defaults(mut self, defaults: PromiseConfig) -> Self {
        self.defaults = defaults;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker pool or the callback pool would have
    /// no threads.
    pub fn validate(&self) -> Result<(), PromiseError> {
        if self.worker_threads == 0 {
            return Err(PromiseError::invalid_argument(
                "worker_threads must be at least 1",
            ));
        }
        if self.callback_threads == 0 {
            return Err(PromiseError::invalid_argument(
                "callback_threads must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Whole milliseconds, rounded up so a non-zero duration never reads as unset.
fn duration_to_ms(duration: Duration) -> u64 {
    if duration.is_zero() {
        return 0;
    }
    let ms = duration.as_nanos().div_ceil(1_000_000);
    u64::try_from(ms).unwrap_or(u64::MAX)
}

const fn ms_to_duration(ms: u64) -> Option<Duration> {
    if ms == 0 {
        None
    } else {
        Some(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_promise_config_default() {
        let config = PromiseConfig::default();
        assert_eq!(config.retries, 0);
        assert_eq!(config.retry_delay(), None);
        assert_eq!(config.timeout(), None);
        assert!(!config.pass_results_through);
        assert!(config.start_immediately);
    }

    #[test]
    fn test_promise_config_builder() {
        let config = PromiseConfig::new()
            .with_retries_and_delay(3, Duration::from_millis(250))
            .with_timeout(Duration::from_secs(2))
            .with_pass_results_through(true)
            .with_start_immediately(false);

        assert_eq!(config.retries, 3);
        assert_eq!(config.retry_delay(), Some(Duration::from_millis(250)));
        assert_eq!(config.timeout(), Some(Duration::from_secs(2)));
        assert!(config.pass_results_through);
        assert!(!config.start_immediately);
    }

    #[test]
    fn test_with_retries_clears_delay() {
        let config = PromiseConfig::new()
            .with_retries_and_delay(2, Duration::from_millis(10))
            .with_retries(5);
        assert_eq!(config.retries, 5);
        assert_eq!(config.retry_delay(), None);
    }

    #[test]
    fn test_zero_timeout_means_unset() {
        let config = PromiseConfig::new()
            .with_timeout(Duration::from_millis(50))
            .with_timeout(Duration::ZERO);
        assert_eq!(config.timeout(), None);
    }

    #[test]
    fn test_sub_millisecond_durations_round_up() {
        let config = PromiseConfig::new()
            .with_retries_and_delay(1, Duration::from_micros(200))
            .with_timeout(Duration::from_micros(1500));

        assert_eq!(config.retry_delay(), Some(Duration::from_millis(1)));
        assert_eq!(config.timeout(), Some(Duration::from_millis(2)));
    }

    #[test]
    fn test_engine_config_from_json_partial() {
        let config = EngineConfig::from_json(
            r#"{"worker_threads": 8, "defaults": {"retries": 2, "timeout_ms": 500}}"#,
        )
        .unwrap();

        assert_eq!(config.worker_threads, 8);
        assert_eq!(config.thread_name, "promiseflow-worker");
        assert_eq!(config.defaults.retries, 2);
        assert_eq!(config.defaults.timeout(), Some(Duration::from_millis(500)));
        assert!(config.defaults.start_immediately);
    }

    #[test]
    fn test_engine_config_rejects_zero_workers() {
        let err = EngineConfig::from_json(r#"{"worker_threads": 0}"#).unwrap_err();
        assert!(matches!(err, PromiseError::InvalidArgument(_)));
    }

    #[test]
    fn test_engine_config_rejects_zero_callback_threads() {
        let err = EngineConfig::new()
            .with_callback_threads(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, PromiseError::InvalidArgument(_)));
    }

    #[test]
    fn test_engine_config_rejects_bad_json() {
        assert!(EngineConfig::from_json("{not json").is_err());
    }
}
