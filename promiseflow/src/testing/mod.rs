//! Test doubles for exercising promise chains.
//!
//! This module provides:
//! - [`InlineExecutor`], which runs work on the submitting thread
//! - [`CountingExecutor`], which counts submissions to another executor
//! - [`Recorder`], a thread-safe log of values seen by task closures

mod executors;
mod recorder;

pub use executors::{CountingExecutor, InlineExecutor};
pub use recorder::Recorder;
