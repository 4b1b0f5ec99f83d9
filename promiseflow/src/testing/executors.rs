//! Executors for tests.

use crate::executor::{AsyncHandle, Executor, ExecutorProvider, WorkFuture, WorkItem};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Runs each work item synchronously inside `submit`.
#[derive(Debug, Default)]
pub struct InlineExecutor {
    submitted: AtomicUsize,
}

impl InlineExecutor {
    /// Creates a new inline executor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of work items run so far.
    #[must_use]
    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }
}

impl Executor for InlineExecutor {
    fn submit(&self, work: WorkItem) -> AsyncHandle {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        AsyncHandle::ready(work())
    }
}

impl ExecutorProvider for InlineExecutor {
    fn supply(&self) -> Arc<dyn Executor> {
        Arc::new(Self::new())
    }
}

/// Wraps another executor and counts what passes through it.
pub struct CountingExecutor {
    inner: Arc<dyn Executor>,
    submitted: AtomicUsize,
    futures: AtomicUsize,
}

impl CountingExecutor {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn Executor>) -> Self {
        Self {
            inner,
            submitted: AtomicUsize::new(0),
            futures: AtomicUsize::new(0),
        }
    }

    /// Returns the number of blocking work items submitted.
    #[must_use]
    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    /// Returns the number of futures spawned.
    #[must_use]
    pub fn futures(&self) -> usize {
        self.futures.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for CountingExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountingExecutor")
            .field("submitted", &self.submitted())
            .field("futures", &self.futures())
            .finish_non_exhaustive()
    }
}

impl Executor for CountingExecutor {
    fn submit(&self, work: WorkItem) -> AsyncHandle {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        self.inner.submit(work)
    }

    fn spawn_future(&self, work: WorkFuture) -> AsyncHandle {
        self.futures.fetch_add(1, Ordering::SeqCst);
        self.inner.spawn_future(work)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_inline_executor_runs_on_caller_thread() {
        let executor = InlineExecutor::new();
        let caller = std::thread::current().id();

        let handle = executor.submit(Box::new(move || {
            Ok(json!(std::thread::current().id() == caller))
        }));

        assert_eq!(handle.join().await.unwrap(), json!(true));
        assert_eq!(executor.submitted(), 1);
    }

    #[tokio::test]
    async fn test_counting_executor_counts_both_paths() {
        let counting = CountingExecutor::new(Arc::new(InlineExecutor::new()));

        counting.submit(Box::new(|| Ok(json!(1)))).join().await.unwrap();
        counting
            .spawn_future(Box::pin(async { Ok(json!(2)) }))
            .join()
            .await
            .unwrap();

        assert_eq!(counting.submitted(), 1);
        assert_eq!(counting.futures(), 1);
    }
}
