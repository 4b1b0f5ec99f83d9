//! # Promiseflow
//!
//! Staged task orchestration on a worker pool.
//!
//! A caller submits a stage of independent tasks, the engine runs them in
//! parallel, collects their results in submission order and hands them to the
//! next stage in the chain:
//!
//! - **Ordered results**: slots follow task positions, not completion order
//! - **Retries and timeouts**: per task or per chain, with delays on a timer
//!   thread separate from the worker pool
//! - **Pass-through**: optionally feed every earlier result to later stages
//! - **Pluggable executors**: inject the pool through an [`ExecutorProvider`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use promiseflow::prelude::*;
//! use serde_json::json;
//!
//! let engine = Engine::new(EngineConfig::default())?;
//!
//! let promise = engine.when([
//!     Task::blocking("a", |_| Ok(json!(1))),
//!     Task::blocking("b", |_| Ok(json!(2))),
//! ])?;
//! promise
//!     .then([Task::blocking("sum", |inputs| {
//!         Ok(json!(inputs.iter().filter_map(|v| v.as_i64()).sum::<i64>()))
//!     })])?
//!     .resolve(|values| println!("{values:?}"))
//!     .reject(|cause| eprintln!("{cause}"));
//!
//! promise.wait_for_completion()?;
//! ```
//!
//! [`ExecutorProvider`]: executor::ExecutorProvider

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod core;
pub mod engine;
pub mod errors;
pub mod events;
pub mod executor;
pub mod observability;
pub mod promise;
pub mod task;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{EngineConfig, PromiseConfig};
    pub use crate::core::{TaskPhase, Value};
    pub use crate::engine::Engine;
    pub use crate::errors::PromiseError;
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::executor::{AsyncHandle, Executor, ExecutorProvider, FixedProvider, PoolProvider};
    pub use crate::promise::{Promise, PromiseBuilder};
    pub use crate::task::{AsyncCall, Call, Completer, DelegatedCall, Task};
}
