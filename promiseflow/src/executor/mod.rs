//! Worker pool contracts and the default implementations.
//!
//! This module provides:
//! - The [`Executor`] trait that runs a unit of work and returns an [`AsyncHandle`]
//! - The [`ExecutorProvider`] trait that supplies an executor when none is bound
//! - [`PoolProvider`], a tokio-backed worker pool
//! - [`TimerService`], the single-thread scheduler for retry delays and timeouts

mod handle;
mod pool;
mod timer;

pub use handle::{AsyncHandle, TaskResult};
pub use pool::{PoolExecutor, PoolProvider, WorkerPool};
pub use timer::TimerService;

use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// A unit of blocking work submitted to an executor.
pub type WorkItem = Box<dyn FnOnce() -> TaskResult + Send + 'static>;

/// A unit of asynchronous work submitted to an executor.
pub type WorkFuture = BoxFuture<'static, TaskResult>;

/// Runs work items and hands back a completion handle.
#[cfg_attr(test, mockall::automock)]
pub trait Executor: Send + Sync {
    /// Submits blocking work. The work may run on any thread.
    fn submit(&self, work: WorkItem) -> AsyncHandle;

    /// Submits work that is already asynchronous.
    ///
    /// The default drives the future to completion inside [`Executor::submit`].
    fn spawn_future(&self, work: WorkFuture) -> AsyncHandle {
        self.submit(Box::new(move || futures::executor::block_on(work)))
    }
}

/// Supplies the executor used by chains that have none bound explicitly.
pub trait ExecutorProvider: Send + Sync + fmt::Debug {
    /// Returns the executor to run the next stage on.
    fn supply(&self) -> Arc<dyn Executor>;
}

/// A provider that always hands out the same executor.
#[derive(Clone)]
pub struct FixedProvider {
    executor: Arc<dyn Executor>,
}

impl fmt::Debug for FixedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedProvider").finish_non_exhaustive()
    }
}

impl FixedProvider {
    /// Creates a provider for the given executor.
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }
}

impl ExecutorProvider for FixedProvider {
    fn supply(&self) -> Arc<dyn Executor> {
        self.executor.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InlineExecutor;
    use serde_json::json;

    #[tokio::test]
    async fn test_default_spawn_future_uses_submit() {
        let executor = InlineExecutor::new();
        let handle = executor.spawn_future(Box::pin(async { Ok(json!("async")) }));

        assert_eq!(handle.join().await.unwrap(), json!("async"));
        assert_eq!(executor.submitted(), 1);
    }

    #[test]
    fn test_fixed_provider_returns_same_executor() {
        let executor: Arc<dyn Executor> = Arc::new(InlineExecutor::new());
        let provider = FixedProvider::new(executor.clone());

        assert!(Arc::ptr_eq(&provider.supply(), &executor));
        assert!(Arc::ptr_eq(&provider.supply(), &provider.supply()));
    }
}
