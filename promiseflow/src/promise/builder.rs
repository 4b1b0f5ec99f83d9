//! Builder for configuring a chain before its first stage runs.

use super::stage::Stage;
use super::Promise;
use crate::config::PromiseConfig;
use crate::engine::EngineCore;
use crate::errors::PromiseError;
use crate::events::EventSink;
use crate::executor::Executor;
use crate::task::Task;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configures a [`Promise`] and creates it with its first stage.
///
/// Starts from the engine defaults; every setting here overrides them for
/// this chain only.
#[must_use]
pub struct PromiseBuilder {
    core: Arc<EngineCore>,
    config: PromiseConfig,
    executor: Option<Arc<dyn Executor>>,
    events: Option<Arc<dyn EventSink>>,
}

impl PromiseBuilder {
    pub(crate) fn new(core: Arc<EngineCore>) -> Self {
        let config = core.defaults().clone();
        Self {
            core,
            config,
            executor: None,
            events: None,
        }
    }

    /// Replaces the whole configuration.
    pub fn with_config(mut self, config: PromiseConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the default retry budget with immediate retries.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.config = self.config.with_retries(retries);
        self
    }

    /// Sets the default retry budget and the delay between retries.
    pub fn with_retries_and_delay(mut self, retries: u32, delay: Duration) -> Self {
        self.config = self.config.with_retries_and_delay(retries, delay);
        self
    }

    /// Sets the default per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_timeout(timeout);
        self
    }

    /// Sets the pass-through policy.
    pub fn with_pass_results_through(mut self, enabled: bool) -> Self {
        self.config = self.config.with_pass_results_through(enabled);
        self
    }

    /// Sets whether [`PromiseBuilder::when`] starts the chain right away.
    pub fn with_start_immediately(mut self, enabled: bool) -> Self {
        self.config = self.config.with_start_immediately(enabled);
        self
    }

    /// Binds an executor instead of asking the engine's provider.
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Sends this chain's events to `sink` instead of the engine's sink.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    /// Creates the chain with its first stage, starting it unless
    /// `start_immediately` is off.
    ///
    /// # Errors
    ///
    /// Returns [`PromiseError::InvalidArgument`] if `tasks` is empty or holds
    /// the same task twice. Nothing runs in that case.
    pub fn when(self, tasks: impl IntoIterator<Item = Task>) -> Result<Promise, PromiseError> {
        let start = self.config.start_immediately;
        let promise = self.build(tasks)?;
        if start {
            promise.start();
        }
        Ok(promise)
    }

    /// Creates the chain without starting it.
    ///
    /// # Errors
    ///
    /// Same as [`PromiseBuilder::when`].
    pub fn when_deferred(self, tasks: impl IntoIterator<Item = Task>) -> Result<Promise, PromiseError> {
        self.build(tasks)
    }

    fn build(self, tasks: impl IntoIterator<Item = Task>) -> Result<Promise, PromiseError> {
        let stage = Stage::new(tasks, self.config.pass_results_through)?;
        let events = self.events.unwrap_or_else(|| self.core.events());
        Ok(Promise::create(
            self.core,
            self.config,
            self.executor,
            events,
            stage,
        ))
    }
}

impl fmt::Debug for PromiseBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromiseBuilder")
            .field("config", &self.config)
            .field("executor", &self.executor.is_some())
            .field("events", &self.events.is_some())
            .finish_non_exhaustive()
    }
}
