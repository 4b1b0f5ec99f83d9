//! Completion handle for delegated tasks.

use super::Task;
use crate::core::Value;
use crate::errors::PromiseError;
use std::fmt;

/// Reports the outcome of one attempt of a delegated task.
///
/// A completer is tied to the attempt it was created for. Once that attempt
/// has settled (or timed out, or been superseded by a retry) further reports
/// are ignored and the methods return `false`.
#[derive(Clone)]
pub struct Completer {
    task: Task,
    attempt: u64,
}

impl Completer {
    pub(super) const fn new(task: Task, attempt: u64) -> Self {
        Self { task, attempt }
    }

    /// Resolves the attempt with `value`.
    pub fn resolve(&self, value: impl Into<Value>) -> bool {
        self.task.settle(self.attempt, Ok(value.into()))
    }

    /// Rejects the attempt. The task retries if its budget allows.
    pub fn reject(&self, error: impl Into<anyhow::Error>) -> bool {
        let failure = PromiseError::task_failure(self.task.name(), error.into());
        self.task.settle(self.attempt, Err(failure))
    }

    /// Returns true while this completer's attempt is still waiting for an outcome.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.task.is_current_attempt(self.attempt)
    }

    /// Returns the name of the task this completer reports for.
    #[must_use]
    pub fn task_name(&self) -> &str {
        self.task.name()
    }
}

impl fmt::Debug for Completer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("task", &self.task.name())
            .field("attempt", &self.attempt)
            .finish()
    }
}
