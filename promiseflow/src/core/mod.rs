//! Core domain types shared across the engine.
//!
//! - The value type flowing between stages
//! - The task lifecycle phase

mod status;

pub use status::TaskPhase;

/// A value produced by a task and passed to later stages.
///
/// Tasks that have nothing to report resolve with [`Value::Null`], which
/// still occupies the task's slot in the result vector.
pub type Value = serde_json::Value;
