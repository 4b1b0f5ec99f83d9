//! Task lifecycle phase.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle phase of a task within its current run.
///
/// ```text
/// Idle -> Running -> Resolved
///                 -> RetryScheduled -> Running
///                 -> Rejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    /// Prepared (or never run) and waiting to be triggered.
    #[default]
    Idle,
    /// An attempt is in flight.
    Running,
    /// An attempt failed and another one is waiting on the timer.
    RetryScheduled,
    /// The task produced a value.
    Resolved,
    /// The task failed with no retries left.
    Rejected,
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::RetryScheduled => write!(f, "retry_scheduled"),
            Self::Resolved => write!(f, "resolved"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

impl TaskPhase {
    /// Returns true if the phase is final for the current run.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Rejected)
    }
}
