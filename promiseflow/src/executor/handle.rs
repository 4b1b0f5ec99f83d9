//! Completion handle returned by executors.

use crate::core::Value;
use crate::errors::PromiseError;
use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// The outcome of a single task attempt.
pub type TaskResult = Result<Value, PromiseError>;

/// A handle to work that completes at some later point.
///
/// The handle is a future under the hood; awaiting it with a timeout
/// requires a tokio runtime with the time driver enabled.
pub struct AsyncHandle {
    inner: BoxFuture<'static, TaskResult>,
}

impl AsyncHandle {
    /// Wraps a future producing the task result.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = TaskResult> + Send + 'static,
    {
        Self {
            inner: future.boxed(),
        }
    }

    /// Creates a handle that is already complete.
    #[must_use]
    pub fn ready(result: TaskResult) -> Self {
        Self::new(futures::future::ready(result))
    }

    /// Waits for the work to complete.
    pub async fn join(self) -> TaskResult {
        self.inner.await
    }

    /// Waits for the work to complete, giving up after `timeout`.
    ///
    /// On expiry the work keeps running; only the wait stops.
    pub async fn join_timeout(self, timeout: Duration) -> TaskResult {
        match tokio::time::timeout(timeout, self.inner).await {
            Ok(result) => result,
            Err(_) => Err(PromiseError::timed_out(timeout)),
        }
    }
}

impl fmt::Debug for AsyncHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncHandle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_ready_handle() {
        let handle = AsyncHandle::ready(Ok(json!(7)));
        assert_eq!(handle.join().await.unwrap(), json!(7));
    }

    #[tokio::test]
    async fn test_join_timeout_completes_in_time() {
        let handle = AsyncHandle::new(async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(json!("done"))
        });

        let result = handle.join_timeout(Duration::from_secs(1)).await;
        assert_eq!(result.unwrap(), json!("done"));
    }

    #[tokio::test]
    async fn test_join_timeout_expires() {
        let handle = AsyncHandle::new(async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!("late"))
        });

        let err = handle
            .join_timeout(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_error_passes_through() {
        let handle = AsyncHandle::ready(Err(PromiseError::illegal_state("nope")));
        let err = handle.join_timeout(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, PromiseError::IllegalState(_)));
    }
}
