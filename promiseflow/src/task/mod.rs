//! Tasks: units of work with their own retry and timeout policy.
//!
//! A [`Task`] is a cheap, cloneable handle. The same task may be placed in
//! several chains over its lifetime, but only in one running stage at a time.
//! Each run goes through `prepare` (binding the task to a stage slot),
//! `trigger` (first attempt) and any number of retries before it settles.
//!
//! Three variants share one lifecycle and differ only in how an attempt is
//! started:
//! - blocking work runs on a worker pool thread ([`Task::blocking`])
//! - async work is spawned as a future ([`Task::future`])
//! - delegated work reports back through a [`Completer`] ([`Task::delegated`])

mod calls;
mod completer;

pub use calls::{AsyncCall, Call, DelegatedCall, FutureFn};
pub use completer::Completer;

use crate::core::{TaskPhase, Value};
use crate::errors::PromiseError;
use crate::executor::{AsyncHandle, Executor, TaskResult, TimerService};
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Receives lifecycle notifications for the stage slot a task is bound to.
pub(crate) trait StageListener: Send + Sync {
    fn on_attempt(&self, slot: usize, task: &str, attempt: u32);
    fn on_retry_scheduled(
        &self,
        slot: usize,
        task: &str,
        attempt: u32,
        delay: Option<Duration>,
        cause: &PromiseError,
    );
    fn on_resolved(&self, slot: usize, task: &str, value: Value);
    fn on_rejected(&self, slot: usize, task: &str, cause: PromiseError);
}

/// Orchestrator-level policy used where the task sets none of its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct StageDefaults {
    pub retries: u32,
    pub retry_delay: Option<Duration>,
    pub timeout: Option<Duration>,
}

/// Everything a task needs to run inside one stage.
pub(crate) struct RunPlan {
    pub listener: Arc<dyn StageListener>,
    pub slot: usize,
    pub inputs: Arc<[Value]>,
    pub executor: Arc<dyn Executor>,
    pub timer: Arc<TimerService>,
    pub defaults: StageDefaults,
}

enum Work {
    Blocking(Arc<dyn Call>),
    Future(Arc<dyn AsyncCall>),
    Delegated(Arc<dyn DelegatedCall>),
}

impl Work {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Blocking(_) => "blocking",
            Self::Future(_) => "future",
            Self::Delegated(_) => "delegated",
        }
    }
}

struct ActiveRun {
    plan: RunPlan,
    budget: u32,
    own_budget: bool,
    retry_delay: Option<Duration>,
    timeout: Option<Duration>,
}

#[derive(Default)]
struct TaskState {
    phase: TaskPhase,
    /// Monotonic attempt id; completions for older ids are ignored.
    attempt: u64,
    /// Attempts made in the current run.
    attempts: u32,
    retries: Option<u32>,
    retry_delay: Option<Duration>,
    timeout: Option<Duration>,
    remaining_retries: u32,
    value: Option<Value>,
    run: Option<ActiveRun>,
}

struct TaskInner {
    name: String,
    work: Work,
    state: Mutex<TaskState>,
}

/// The data needed to start one attempt outside the task lock.
struct Dispatch {
    attempt: u64,
    number: u32,
    listener: Arc<dyn StageListener>,
    slot: usize,
    inputs: Arc<[Value]>,
    executor: Arc<dyn Executor>,
    timer: Arc<TimerService>,
    timeout: Option<Duration>,
}

enum Settled {
    Resolved {
        plan: RunPlan,
        value: Value,
    },
    Retry {
        listener: Arc<dyn StageListener>,
        slot: usize,
        timer: Arc<TimerService>,
        delay: Option<Duration>,
        number: u32,
        cause: PromiseError,
    },
    Rejected {
        plan: RunPlan,
        cause: PromiseError,
    },
}

/// A unit of work with its own lifecycle, retry budget and timeout.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    fn new(name: impl Into<String>, work: Work) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                name: name.into(),
                work,
                state: Mutex::new(TaskState::default()),
            }),
        }
    }

    /// Creates a task whose work runs synchronously on a worker thread.
    pub fn blocking<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::from_call(name, func)
    }

    /// Creates a blocking task from a [`Call`] implementation.
    pub fn from_call(name: impl Into<String>, call: impl Call + 'static) -> Self {
        Self::new(name, Work::Blocking(Arc::new(call)))
    }

    /// Creates a task whose work is an async closure.
    pub fn future<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self::from_async_call(name, FutureFn::new(func))
    }

    /// Creates a future-based task from an [`AsyncCall`] implementation.
    pub fn from_async_call(name: impl Into<String>, call: impl AsyncCall + 'static) -> Self {
        Self::new(name, Work::Future(Arc::new(call)))
    }

    /// Creates a task that completes through a [`Completer`].
    pub fn delegated<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[Value], Completer) + Send + Sync + 'static,
    {
        Self::from_delegated_call(name, func)
    }

    /// Creates a delegated task from a [`DelegatedCall`] implementation.
    pub fn from_delegated_call(name: impl Into<String>, call: impl DelegatedCall + 'static) -> Self {
        Self::new(name, Work::Delegated(Arc::new(call)))
    }

    /// Creates a task that runs a side effect and resolves with null.
    pub fn wrap<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::blocking(name, move |_| {
            func();
            Ok(Value::Null)
        })
    }

    /// Sets a task-level retry budget with immediate retries.
    ///
    /// The budget is shared by every chain the task runs in; calling this
    /// again refills it.
    #[must_use]
    pub fn retries(self, retries: u32) -> Self {
        self.set_retries(retries, None);
        self
    }

    /// Sets a task-level retry budget with a delay before each retry.
    #[must_use]
    pub fn retries_with_delay(self, retries: u32, delay: Duration) -> Self {
        self.set_retries(retries, non_zero(delay));
        self
    }

    /// Sets a task-level timeout per attempt. `Duration::ZERO` inherits the
    /// orchestrator default.
    #[must_use]
    pub fn timeout(self, timeout: Duration) -> Self {
        self.inner.state.lock().timeout = non_zero(timeout);
        self
    }

    fn set_retries(&self, retries: u32, delay: Option<Duration>) {
        let mut state = self.inner.state.lock();
        state.retries = Some(retries);
        state.remaining_retries = retries;
        state.retry_delay = delay;
    }

    /// Returns the task name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> TaskPhase {
        self.inner.state.lock().phase
    }

    /// Returns the number of attempts made in the current (or last) run.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.inner.state.lock().attempts
    }

    /// Returns the value of the last successful run, if the task is resolved.
    #[must_use]
    pub fn resolved_value(&self) -> Option<Value> {
        self.inner.state.lock().value.clone()
    }

    /// Returns what is left of the task-level retry budget, if one is set.
    #[must_use]
    pub fn remaining_retries(&self) -> Option<u32> {
        let state = self.inner.state.lock();
        state.retries.map(|_| state.remaining_retries)
    }

    pub(crate) fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Binds the task to a stage slot and resets its outcome.
    pub(crate) fn prepare(&self, plan: RunPlan) -> Result<(), PromiseError> {
        let mut state = self.inner.state.lock();
        if matches!(state.phase, TaskPhase::Running | TaskPhase::RetryScheduled) {
            return Err(PromiseError::illegal_state(format!(
                "task '{}' is already running in another stage",
                self.inner.name
            )));
        }

        let (budget, own_budget, retry_delay) = match state.retries {
            Some(_) => (state.remaining_retries, true, state.retry_delay),
            None => (plan.defaults.retries, false, plan.defaults.retry_delay),
        };
        let timeout = state.timeout.or(plan.defaults.timeout);

        state.phase = TaskPhase::Idle;
        state.attempts = 0;
        state.value = None;
        state.run = Some(ActiveRun {
            plan,
            budget,
            own_budget,
            retry_delay,
            timeout,
        });
        Ok(())
    }

    /// Starts the first attempt of a prepared run.
    pub(crate) fn trigger(&self) {
        let dispatch = {
            let mut state = self.inner.state.lock();
            if state.phase != TaskPhase::Idle {
                return;
            }
            begin_attempt(&mut state)
        };
        if let Some(dispatch) = dispatch {
            self.dispatch(dispatch);
        }
    }

    fn retry(&self, failed_attempt: u64) {
        let dispatch = {
            let mut state = self.inner.state.lock();
            if state.phase != TaskPhase::RetryScheduled || state.attempt != failed_attempt {
                trace!(task = %self.inner.name, "Skipping stale retry");
                return;
            }
            begin_attempt(&mut state)
        };
        if let Some(dispatch) = dispatch {
            self.dispatch(dispatch);
        }
    }

    fn dispatch(&self, dispatch: Dispatch) {
        dispatch
            .listener
            .on_attempt(dispatch.slot, &self.inner.name, dispatch.number);
        trace!(
            task = %self.inner.name,
            kind = self.inner.work.kind(),
            attempt = dispatch.number,
            "Dispatching attempt"
        );

        let attempt = dispatch.attempt;
        match &self.inner.work {
            Work::Blocking(call) => {
                let call = Arc::clone(call);
                let name = self.inner.name.clone();
                let inputs = Arc::clone(&dispatch.inputs);
                let handle = dispatch
                    .executor
                    .submit(Box::new(move || run_blocking(&name, call.as_ref(), &inputs)));
                self.watch(&dispatch, handle);
            }
            Work::Future(call) => {
                let call = Arc::clone(call);
                let name = self.inner.name.clone();
                let inputs = dispatch.inputs.to_vec();
                let work = async move {
                    match AssertUnwindSafe(call.call(inputs)).catch_unwind().await {
                        Ok(result) => result.map_err(|e| PromiseError::task_failure(&name, e)),
                        Err(payload) => Err(panicked(&name, payload.as_ref())),
                    }
                };
                let handle = dispatch.executor.spawn_future(Box::pin(work));
                self.watch(&dispatch, handle);
            }
            Work::Delegated(call) => {
                if let Some(limit) = dispatch.timeout {
                    let task = self.clone();
                    dispatch.timer.schedule(limit, move || {
                        task.settle(attempt, Err(PromiseError::timed_out(limit)));
                    });
                }
                let completer = Completer::new(self.clone(), attempt);
                let started = catch_unwind(AssertUnwindSafe(|| {
                    call.start(&dispatch.inputs, completer);
                }));
                if let Err(payload) = started {
                    self.settle(attempt, Err(panicked(&self.inner.name, payload.as_ref())));
                }
            }
        }
    }

    fn watch(&self, dispatch: &Dispatch, handle: AsyncHandle) {
        let task = self.clone();
        let attempt = dispatch.attempt;
        dispatch.timer.watch(handle, dispatch.timeout, move |result| {
            task.settle(attempt, result);
        });
    }

    /// Records the outcome of `attempt`. Returns false if the attempt is stale.
    fn settle(&self, attempt: u64, result: TaskResult) -> bool {
        let settled = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if state.attempt != attempt || state.phase != TaskPhase::Running {
                trace!(task = %self.inner.name, attempt, "Ignoring stale completion");
                return false;
            }

            match result {
                Ok(value) => {
                    let Some(run) = state.run.take() else {
                        return false;
                    };
                    state.phase = TaskPhase::Resolved;
                    state.value = Some(value.clone());
                    Settled::Resolved {
                        plan: run.plan,
                        value,
                    }
                }
                Err(cause) => {
                    let Some(run) = state.run.as_mut() else {
                        return false;
                    };
                    if run.budget > 0 {
                        run.budget -= 1;
                        let own_budget = run.own_budget;
                        let retry = Settled::Retry {
                            listener: Arc::clone(&run.plan.listener),
                            slot: run.plan.slot,
                            timer: Arc::clone(&run.plan.timer),
                            delay: run.retry_delay,
                            number: state.attempts,
                            cause,
                        };
                        if own_budget {
                            state.remaining_retries = state.remaining_retries.saturating_sub(1);
                        }
                        state.phase = TaskPhase::RetryScheduled;
                        retry
                    } else {
                        let Some(run) = state.run.take() else {
                            return false;
                        };
                        state.phase = TaskPhase::Rejected;
                        Settled::Rejected {
                            plan: run.plan,
                            cause,
                        }
                    }
                }
            }
        };

        match settled {
            Settled::Resolved { plan, value } => {
                debug!(task = %self.inner.name, slot = plan.slot, "Task resolved");
                plan.listener.on_resolved(plan.slot, &self.inner.name, value);
            }
            Settled::Retry {
                listener,
                slot,
                timer,
                delay,
                number,
                cause,
            } => {
                debug!(
                    task = %self.inner.name,
                    attempt = number,
                    error = %cause,
                    delay = ?delay,
                    "Task attempt failed, retrying"
                );
                listener.on_retry_scheduled(slot, &self.inner.name, number, delay, &cause);
                match delay {
                    Some(delay) => {
                        let task = self.clone();
                        timer.schedule(delay, move || task.retry(attempt));
                    }
                    None => self.retry(attempt),
                }
            }
            Settled::Rejected { plan, cause } => {
                debug!(task = %self.inner.name, slot = plan.slot, error = %cause, "Task rejected");
                plan.listener.on_rejected(plan.slot, &self.inner.name, cause);
            }
        }
        true
    }

    fn is_current_attempt(&self, attempt: u64) -> bool {
        let state = self.inner.state.lock();
        state.attempt == attempt && state.phase == TaskPhase::Running
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Task")
            .field("name", &self.inner.name)
            .field("kind", &self.inner.work.kind())
            .field("phase", &state.phase)
            .field("attempts", &state.attempts)
            .finish()
    }
}

fn begin_attempt(state: &mut TaskState) -> Option<Dispatch> {
    let run = state.run.as_ref()?;
    let dispatch = Dispatch {
        attempt: state.attempt + 1,
        number: state.attempts + 1,
        listener: Arc::clone(&run.plan.listener),
        slot: run.plan.slot,
        inputs: Arc::clone(&run.plan.inputs),
        executor: Arc::clone(&run.plan.executor),
        timer: Arc::clone(&run.plan.timer),
        timeout: run.timeout,
    };
    state.attempt = dispatch.attempt;
    state.attempts = dispatch.number;
    state.phase = TaskPhase::Running;
    Some(dispatch)
}

fn run_blocking(name: &str, call: &dyn Call, inputs: &[Value]) -> TaskResult {
    match catch_unwind(AssertUnwindSafe(|| call.call(inputs))) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(PromiseError::task_failure(name, e)),
        Err(payload) => Err(panicked(name, payload.as_ref())),
    }
}

fn panicked(name: &str, payload: &(dyn Any + Send)) -> PromiseError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    PromiseError::task_failure(name, anyhow::anyhow!("panicked: {message}"))
}

const fn non_zero(duration: Duration) -> Option<Duration> {
    if duration.is_zero() {
        None
    } else {
        Some(duration)
    }
}
