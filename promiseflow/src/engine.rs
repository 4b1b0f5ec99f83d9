//! The engine: explicit owner of the worker pool, timer and defaults.
//!
//! Every chain is created through an [`Engine`]. There is no process-wide
//! default executor; an engine is built once and passed where it is needed.

use crate::config::{EngineConfig, PromiseConfig};
use crate::errors::PromiseError;
use crate::events::{EventSink, NoOpEventSink};
use crate::executor::{ExecutorProvider, PoolProvider, TimerService};
use crate::promise::{Promise, PromiseBuilder, PromiseShared};
use crate::task::Task;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::info;

/// State shared by an engine and every chain it created.
pub(crate) struct EngineCore {
    provider: Arc<dyn ExecutorProvider>,
    timer: Arc<TimerService>,
    defaults: PromiseConfig,
    events: RwLock<Arc<dyn EventSink>>,
    live: Mutex<Vec<Weak<PromiseShared>>>,
}

impl EngineCore {
    pub(crate) fn provider(&self) -> &Arc<dyn ExecutorProvider> {
        &self.provider
    }

    pub(crate) fn timer(&self) -> &Arc<TimerService> {
        &self.timer
    }

    pub(crate) const fn defaults(&self) -> &PromiseConfig {
        &self.defaults
    }

    pub(crate) fn events(&self) -> Arc<dyn EventSink> {
        Arc::clone(&self.events.read())
    }

    pub(crate) fn track(&self, promise: &Arc<PromiseShared>) {
        let mut live = self.live.lock();
        live.retain(|p| p.strong_count() > 0);
        live.push(Arc::downgrade(promise));
    }

    fn live_promises(&self) -> Vec<Arc<PromiseShared>> {
        self.live.lock().iter().filter_map(Weak::upgrade).collect()
    }
}

/// Creates and runs promise chains.
pub struct Engine {
    core: Arc<EngineCore>,
}

impl Engine {
    /// Starts an engine with its own worker pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a runtime cannot
    /// be started.
    pub fn new(config: EngineConfig) -> Result<Self, PromiseError> {
        config.validate()?;
        let provider = PoolProvider::new(config.worker_threads, &config.thread_name)?;
        Self::with_provider(Arc::new(provider), config)
    }

    /// Starts an engine that takes executors from `provider`.
    ///
    /// `worker_threads` and `thread_name` are ignored; the timer service is
    /// still owned by the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the timer runtime cannot be started.
    pub fn with_provider(
        provider: Arc<dyn ExecutorProvider>,
        config: EngineConfig,
    ) -> Result<Self, PromiseError> {
        let timer = TimerService::new(&config.timer_thread_name, config.callback_threads)?;
        info!(
            worker_threads = config.worker_threads,
            callback_threads = config.callback_threads,
            retries = config.defaults.retries,
            timeout_ms = config.defaults.timeout_ms,
            "Engine started"
        );
        Ok(Self {
            core: Arc::new(EngineCore {
                provider,
                timer: Arc::new(timer),
                defaults: config.defaults,
                events: RwLock::new(Arc::new(NoOpEventSink)),
                live: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Sets the sink that receives events of chains created from now on.
    pub fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        *self.core.events.write() = sink;
    }

    /// Returns a builder for a chain with non-default settings.
    pub fn promise(&self) -> PromiseBuilder {
        PromiseBuilder::new(Arc::clone(&self.core))
    }

    /// Creates a chain with `tasks` as its first stage.
    ///
    /// The chain starts right away unless the engine defaults turn
    /// `start_immediately` off.
    ///
    /// # Errors
    ///
    /// Returns [`PromiseError::InvalidArgument`] if `tasks` is empty or holds
    /// the same task twice.
    pub fn when(&self, tasks: impl IntoIterator<Item = Task>) -> Result<Promise, PromiseError> {
        self.promise().when(tasks)
    }

    /// Creates a chain that waits for an explicit [`Promise::start`].
    ///
    /// # Errors
    ///
    /// Same as [`Engine::when`].
    pub fn when_deferred(
        &self,
        tasks: impl IntoIterator<Item = Task>,
    ) -> Result<Promise, PromiseError> {
        self.promise().when_deferred(tasks)
    }

    /// Returns the defaults applied to new chains.
    #[must_use]
    pub fn defaults(&self) -> &PromiseConfig {
        self.core.defaults()
    }

    /// Returns the executor provider.
    #[must_use]
    pub fn provider(&self) -> Arc<dyn ExecutorProvider> {
        Arc::clone(self.core.provider())
    }

    /// Returns the number of chains that are still referenced.
    #[must_use]
    pub fn live_promises(&self) -> usize {
        self.core.live_promises().len()
    }

    /// Releases every waiter blocked on a chain of this engine.
    ///
    /// Waiters get [`PromiseError::InterruptedWait`]. Work already in flight
    /// keeps running; the pool and timer stop once the last chain is dropped.
    pub fn shutdown(self) {
        let live = self.core.live_promises();
        info!(live = live.len(), "Engine shutting down");
        for promise in live {
            promise.interrupt_waiters();
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("defaults", &self.core.defaults)
            .field("timer", &self.core.timer)
            .finish_non_exhaustive()
    }
}
