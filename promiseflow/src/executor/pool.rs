//! Default worker pool backed by a tokio runtime.
//!
//! Blocking work runs on the runtime's blocking pool, which is capped at the
//! configured pool size. Async work runs on a single scheduler thread.

use super::{AsyncHandle, Executor, ExecutorProvider, WorkFuture, WorkItem};
use crate::errors::PromiseError;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinError;

/// A fixed-size worker pool.
pub struct WorkerPool {
    runtime: Option<Runtime>,
    handle: Handle,
    size: usize,
}

impl WorkerPool {
    /// Starts a pool with `size` worker threads.
    ///
    /// # Errors
    ///
    /// Returns an error if `size` is zero or the runtime cannot be built.
    pub fn new(size: usize, thread_name: &str) -> Result<Self, PromiseError> {
        if size == 0 {
            return Err(PromiseError::invalid_argument(
                "worker pool needs at least one thread",
            ));
        }

        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(size)
            .thread_name(thread_name)
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();

        tracing::debug!(size, thread_name, "Worker pool started");

        Ok(Self {
            runtime: Some(runtime),
            handle,
            size,
        })
    }

    /// Returns the number of worker threads.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            // Safe from inside another runtime, unlike a plain drop.
            runtime.shutdown_background();
            tracing::debug!(size = self.size, "Worker pool stopped");
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Executor that submits work to a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct PoolExecutor {
    pool: Arc<WorkerPool>,
}

impl PoolExecutor {
    /// Creates an executor for the given pool.
    #[must_use]
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self { pool }
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }
}

fn join_failure(err: &JoinError) -> PromiseError {
    if err.is_cancelled() {
        PromiseError::Runtime("worker pool shut down before the work ran".to_string())
    } else {
        PromiseError::Runtime(format!("worker thread failed: {err}"))
    }
}

impl Executor for PoolExecutor {
    fn submit(&self, work: WorkItem) -> AsyncHandle {
        let join = self.pool.handle.spawn_blocking(work);
        AsyncHandle::new(async move { join.await.unwrap_or_else(|e| Err(join_failure(&e))) })
    }

    fn spawn_future(&self, work: WorkFuture) -> AsyncHandle {
        let join = self.pool.handle.spawn(work);
        AsyncHandle::new(async move { join.await.unwrap_or_else(|e| Err(join_failure(&e))) })
    }
}

/// The default provider: one shared pool for every chain.
#[derive(Debug, Clone)]
pub struct PoolProvider {
    executor: Arc<PoolExecutor>,
}

impl PoolProvider {
    /// Starts a pool and wraps it in a provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be started.
    pub fn new(size: usize, thread_name: &str) -> Result<Self, PromiseError> {
        let pool = Arc::new(WorkerPool::new(size, thread_name)?);
        Ok(Self {
            executor: Arc::new(PoolExecutor::new(pool)),
        })
    }

    /// Returns the pool behind this provider.
    #[must_use]
    pub fn pool(&self) -> &Arc<WorkerPool> {
        self.executor.pool()
    }
}

impl ExecutorProvider for PoolProvider {
    fn supply(&self) -> Arc<dyn Executor> {
        self.executor.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{Duration, Instant};

    #[test]
    fn test_zero_sized_pool_rejected() {
        let err = WorkerPool::new(0, "test-pool").unwrap_err();
        assert!(matches!(err, PromiseError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_submit_runs_on_pool() {
        let provider = PoolProvider::new(2, "test-pool").unwrap();
        let executor = provider.supply();

        let handle = executor.submit(Box::new(|| {
            let name = std::thread::current().name().map(str::to_string);
            Ok(json!(name))
        }));

        let value = handle.join().await.unwrap();
        assert_eq!(value, json!("test-pool"));
        assert_eq!(provider.pool().size(), 2);
    }

    #[tokio::test]
    async fn test_submissions_run_in_parallel() {
        let provider = PoolProvider::new(2, "test-pool").unwrap();
        let executor = provider.supply();

        let start = Instant::now();
        let a = executor.submit(Box::new(|| {
            std::thread::sleep(Duration::from_millis(100));
            Ok(json!(1))
        }));
        let b = executor.submit(Box::new(|| {
            std::thread::sleep(Duration::from_millis(100));
            Ok(json!(2))
        }));

        assert_eq!(a.join().await.unwrap(), json!(1));
        assert_eq!(b.join().await.unwrap(), json!(2));
        assert!(start.elapsed() < Duration::from_millis(190));
    }

    #[tokio::test]
    async fn test_spawn_future_on_pool() {
        let provider = PoolProvider::new(1, "test-pool").unwrap();
        let handle = provider.supply().spawn_future(Box::pin(async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(json!("slept"))
        }));

        assert_eq!(handle.join().await.unwrap(), json!("slept"));
    }

    #[tokio::test]
    async fn test_drop_pool_inside_runtime() {
        let provider = PoolProvider::new(1, "test-pool").unwrap();
        drop(provider);
    }
}
