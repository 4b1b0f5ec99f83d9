//! Error types for the promiseflow engine.
//!
//! Every failure a chain can observe is a [`PromiseError`]. The type is
//! `Clone` so that a rejection cause can be handed to a rejection sink and
//! still be retained on the promise for later inspection.

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Shared, thread-safe handle to the underlying cause of a task failure.
pub type FailureCause = Arc<dyn StdError + Send + Sync + 'static>;

/// The main error type for promiseflow operations.
#[derive(Debug, Clone, Error)]
pub enum PromiseError {
    /// A task's work function failed and its retry budget is exhausted.
    #[error("task '{task}' failed: {source}")]
    TaskFailure {
        /// Name of the failing task.
        task: String,
        /// The error returned by the work function.
        #[source]
        source: FailureCause,
    },

    /// A task did not complete within its effective timeout.
    #[error("timed out after {timeout:?}")]
    TimedOut {
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// A blocked waiter was released before the chain was fulfilled.
    #[error("wait for completion was interrupted")]
    InterruptedWait,

    /// An argument was rejected (for example an empty task list).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation was called in a state that does not allow it.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// The worker pool or timer runtime could not be started.
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl PromiseError {
    /// Wraps a work function failure for the named task.
    #[must_use]
    pub fn task_failure(task: impl Into<String>, error: anyhow::Error) -> Self {
        let boxed: Box<dyn StdError + Send + Sync + 'static> = error.into();
        Self::TaskFailure {
            task: task.into(),
            source: Arc::from(boxed),
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub const fn timed_out(timeout: Duration) -> Self {
        Self::TimedOut { timeout }
    }

    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Creates an illegal state error.
    #[must_use]
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    /// Returns true if this error is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// Returns the name of the failed task, if the error came from one.
    #[must_use]
    pub fn task(&self) -> Option<&str> {
        match self {
            Self::TaskFailure { task, .. } => Some(task),
            _ => None,
        }
    }

    /// Returns a short stable label (snake_case) for use in logs and events.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::TaskFailure { .. } => "task_failure",
            Self::TimedOut { .. } => "timed_out",
            Self::InterruptedWait => "interrupted_wait",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::IllegalState(_) => "illegal_state",
            Self::Runtime(_) => "runtime",
        }
    }
}

impl From<std::io::Error> for PromiseError {
    fn from(err: std::io::Error) -> Self {
        Self::Runtime(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_failure_keeps_source() {
        let err = PromiseError::task_failure("fetch", anyhow::anyhow!("connection refused"));

        assert_eq!(err.task(), Some("fetch"));
        assert_eq!(err.to_string(), "task 'fetch' failed: connection refused");
        let source = StdError::source(&err).unwrap();
        assert_eq!(source.to_string(), "connection refused");
    }

    #[test]
    fn test_timed_out() {
        let err = PromiseError::timed_out(Duration::from_millis(100));
        assert!(err.is_timeout());
        assert!(err.task().is_none());
        assert_eq!(err.to_string(), "timed out after 100ms");
    }

    #[test]
    fn test_labels() {
        assert_eq!(PromiseError::InterruptedWait.as_label(), "interrupted_wait");
        assert_eq!(PromiseError::invalid_argument("x").as_label(), "invalid_argument");
        assert_eq!(PromiseError::illegal_state("x").as_label(), "illegal_state");
        assert_eq!(
            PromiseError::timed_out(Duration::from_secs(1)).as_label(),
            "timed_out"
        );
    }

    #[test]
    fn test_clone_shares_cause() {
        let err = PromiseError::task_failure("a", anyhow::anyhow!("boom"));
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "no threads");
        let err: PromiseError = io.into();
        assert!(matches!(err, PromiseError::Runtime(ref m) if m == "no threads"));
    }
}
