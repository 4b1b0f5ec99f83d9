//! The orchestrator: a queue of stages run one after another.
//!
//! A [`Promise`] owns its stage queue, the result ledger and the rejection
//! state. Tasks inside a stage run in parallel; the next stage starts only
//! once every task of the current one has settled without a rejection.
//!
//! ```text
//! Idle --start--> Running --last task settles--> Settling --sinks ran--> Fulfilled
//!                    ^                              |                        |
//!                    +------ queued stage ----------+---- then (resolved) ---+
//! ```
//!
//! Completions arrive on worker and timer threads. All bookkeeping happens
//! under one mutex; stage launches, sinks and event emission happen outside it.

mod builder;
mod stage;


pub use builder::PromiseBuilder;

use crate::config::PromiseConfig;
use crate::core::Value;
use crate::engine::EngineCore;
use crate::errors::PromiseError;
use crate::events::{self, EventPayload, EventSink};
use crate::executor::Executor;
use crate::task::{RunPlan, StageDefaults, StageListener, Task};
use parking_lot::{Condvar, Mutex};
use stage::{ResultLedger, Stage};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

type ResolveSink = Box<dyn FnOnce(&[Value]) + Send>;
type RejectSink = Box<dyn FnOnce(&PromiseError) + Send>;
type FulfilledSink = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    /// The outcome is fixed and sinks are being invoked.
    Settling,
    Fulfilled,
}

struct CurrentStage {
    index: u64,
    tasks: Vec<Task>,
    completed: usize,
}

struct PromiseState {
    phase: Phase,
    queue: VecDeque<Stage>,
    current: Option<CurrentStage>,
    stages_opened: u64,
    ledger: ResultLedger,
    rejection: Option<PromiseError>,
    resolved: bool,
    config: PromiseConfig,
    executor: Option<Arc<dyn Executor>>,
    on_resolve: Vec<ResolveSink>,
    on_reject: Vec<RejectSink>,
    on_fulfilled: Vec<FulfilledSink>,
    interrupts: u64,
    /// Terminal transitions so far, including ones a sink continued past.
    fulfillments: u64,
}

impl PromiseState {
    /// True once sinks registered now can be answered from the known outcome.
    fn outcome_known(&self) -> bool {
        match self.phase {
            Phase::Fulfilled => true,
            Phase::Settling => self.rejection.is_some() || self.queue.is_empty(),
            Phase::Idle | Phase::Running => false,
        }
    }

    fn delivered_values(&self) -> Vec<Value> {
        self.ledger.deliver(self.config.pass_results_through)
    }
}

/// A stage ready to be launched outside the lock.
struct Launch {
    index: u64,
    tasks: Vec<Task>,
    inputs: Arc<[Value]>,
    executor: Arc<dyn Executor>,
    defaults: StageDefaults,
}

/// A fixed outcome plus the sinks to invoke for it.
struct Settlement {
    values: Vec<Value>,
    rejection: Option<PromiseError>,
    on_resolve: Vec<ResolveSink>,
    on_reject: Vec<RejectSink>,
    on_fulfilled: Vec<FulfilledSink>,
}

enum Next {
    Idle,
    Launch(Launch),
    Settle(Settlement),
}

pub(crate) struct PromiseShared {
    id: Uuid,
    core: Arc<EngineCore>,
    events: Arc<dyn EventSink>,
    state: Mutex<PromiseState>,
    done: Condvar,
}

impl PromiseShared {
    fn emit(&self, event_type: &str, payload: EventPayload) {
        self.events.emit(event_type, Some(payload.into_value()));
    }

    /// Pops the next queued stage and moves the ledger onto it.
    fn open_next_stage(&self, state: &mut PromiseState) -> Option<Launch> {
        let stage = state.queue.pop_front()?;
        let index = state.stages_opened;
        state.stages_opened += 1;

        let inputs = state.ledger.open_stage(stage.len(), stage.pass_through());
        let tasks = stage.into_tasks();
        state.current = Some(CurrentStage {
            index,
            tasks: tasks.clone(),
            completed: 0,
        });
        state.phase = Phase::Running;

        let executor = state
            .executor
            .clone()
            .unwrap_or_else(|| self.core.provider().supply());
        let defaults = StageDefaults {
            retries: state.config.retries,
            retry_delay: state.config.retry_delay(),
            timeout: state.config.timeout(),
        };

        Some(Launch {
            index,
            tasks,
            inputs,
            executor,
            defaults,
        })
    }

    fn begin_settling(state: &mut PromiseState) -> Settlement {
        state.phase = Phase::Settling;
        state.resolved = state.rejection.is_none();
        let values = if state.resolved {
            state.delivered_values()
        } else {
            Vec::new()
        };
        Settlement {
            values,
            rejection: state.rejection.clone(),
            on_resolve: std::mem::take(&mut state.on_resolve),
            on_reject: std::mem::take(&mut state.on_reject),
            on_fulfilled: std::mem::take(&mut state.on_fulfilled),
        }
    }

    fn launch(self: &Arc<Self>, launch: Launch) {
        debug!(
            promise = %self.id,
            stage = launch.index,
            tasks = launch.tasks.len(),
            inputs = launch.inputs.len(),
            "Launching stage"
        );
        self.emit(
            events::STAGE_STARTED,
            EventPayload::new(self.id)
                .stage(launch.index)
                .field("tasks", launch.tasks.len())
                .field("inputs", launch.inputs.len()),
        );

        let binding: Arc<dyn StageListener> = Arc::new(StageBinding {
            promise: Arc::clone(self),
            stage: launch.index,
        });

        for (slot, task) in launch.tasks.iter().enumerate() {
            let plan = RunPlan {
                listener: Arc::clone(&binding),
                slot,
                inputs: Arc::clone(&launch.inputs),
                executor: Arc::clone(&launch.executor),
                timer: Arc::clone(self.core.timer()),
                defaults: launch.defaults,
            };
            match task.prepare(plan) {
                Ok(()) => task.trigger(),
                Err(cause) => {
                    warn!(promise = %self.id, task = task.name(), error = %cause, "Task could not be prepared");
                    binding.on_rejected(slot, task.name(), cause);
                }
            }
        }
    }

    /// Records a settled task and advances the chain when the stage is done.
    fn complete(self: &Arc<Self>, stage: u64, slot: usize, outcome: Result<Value, PromiseError>) {
        let next = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            let Some(current) = state.current.as_mut().filter(|c| c.index == stage) else {
                warn!(promise = %self.id, stage, slot, "Completion for a stage that is not running");
                return;
            };

            match outcome {
                Ok(value) => state.ledger.record(slot, value),
                Err(cause) => {
                    if state.rejection.is_none() {
                        debug!(promise = %self.id, stage, slot, error = %cause, "Stage rejected");
                        state.rejection = Some(cause);
                    } else {
                        debug!(promise = %self.id, stage, slot, error = %cause, "Discarding sibling rejection");
                    }
                }
            }

            current.completed += 1;
            trace!(promise = %self.id, stage, completed = current.completed, of = current.tasks.len(), "Task settled");
            if current.completed < current.tasks.len() {
                Next::Idle
            } else {
                state.current = None;
                let launch = if state.rejection.is_none() {
                    self.open_next_stage(state)
                } else {
                    None
                };
                match launch {
                    Some(launch) => Next::Launch(launch),
                    None => Next::Settle(Self::begin_settling(state)),
                }
            }
        };

        match next {
            Next::Idle => {}
            Next::Launch(launch) => self.launch(launch),
            Next::Settle(settlement) => self.settle(settlement),
        }
    }

    /// Invokes sinks for a fixed outcome, then fulfills or continues.
    fn settle(self: &Arc<Self>, settlement: Settlement) {
        let Settlement {
            values,
            rejection,
            on_resolve,
            on_reject,
            on_fulfilled,
        } = settlement;

        match &rejection {
            None => {
                info!(promise = %self.id, values = values.len(), "Promise resolved");
                self.emit(
                    events::PROMISE_RESOLVED,
                    EventPayload::new(self.id).field("values", values.len()),
                );
                for sink in on_resolve {
                    run_sink(self.id, "resolve", || sink(&values));
                }
            }
            Some(cause) => {
                info!(promise = %self.id, error = %cause, "Promise rejected");
                self.emit(
                    events::PROMISE_REJECTED,
                    EventPayload::new(self.id)
                        .field("error", cause.to_string())
                        .field("kind", cause.as_label()),
                );
                for sink in on_reject {
                    run_sink(self.id, "reject", || sink(cause));
                }
            }
        }
        for sink in on_fulfilled {
            run_sink(self.id, "fulfilled", sink);
        }

        let next = {
            let mut state = self.state.lock();
            state.fulfillments += 1;
            let next = if state.resolved && !state.queue.is_empty() {
                state.resolved = false;
                self.open_next_stage(&mut state)
            } else {
                state.phase = Phase::Fulfilled;
                None
            };
            self.done.notify_all();
            next
        };
        if let Some(launch) = next {
            debug!(promise = %self.id, "Continuing with a stage queued while settling");
            self.launch(launch);
        }
    }

    pub(crate) fn interrupt_waiters(&self) {
        let mut state = self.state.lock();
        state.interrupts += 1;
        self.done.notify_all();
    }
}

/// Listener shared by every task slot of one stage.
struct StageBinding {
    promise: Arc<PromiseShared>,
    stage: u64,
}

impl StageBinding {
    fn task_payload(&self, slot: usize, task: &str) -> EventPayload {
        EventPayload::new(self.promise.id)
            .stage(self.stage)
            .task(slot, task)
    }
}

impl StageListener for StageBinding {
    fn on_attempt(&self, slot: usize, task: &str, attempt: u32) {
        self.promise.emit(
            events::TASK_ATTEMPT,
            self.task_payload(slot, task).field("attempt", attempt),
        );
    }

    fn on_retry_scheduled(
        &self,
        slot: usize,
        task: &str,
        attempt: u32,
        delay: Option<Duration>,
        cause: &PromiseError,
    ) {
        let delay_ms = delay.map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        self.promise.emit(
            events::TASK_RETRY_SCHEDULED,
            self.task_payload(slot, task)
                .field("attempt", attempt)
                .field("delay_ms", delay_ms)
                .field("error", cause.to_string()),
        );
    }

    fn on_resolved(&self, slot: usize, task: &str, value: Value) {
        self.promise
            .emit(events::TASK_RESOLVED, self.task_payload(slot, task));
        self.promise.complete(self.stage, slot, Ok(value));
    }

    fn on_rejected(&self, slot: usize, task: &str, cause: PromiseError) {
        self.promise.emit(
            events::TASK_REJECTED,
            self.task_payload(slot, task)
                .field("error", cause.to_string())
                .field("kind", cause.as_label()),
        );
        self.promise.complete(self.stage, slot, Err(cause));
    }
}

fn run_sink(promise: Uuid, kind: &str, sink: impl FnOnce()) {
    if let Err(e) = catch_unwind(AssertUnwindSafe(sink)) {
        warn!(promise = %promise, sink = kind, "Sink panicked: {:?}", e);
    }
}

/// Handle to a promise chain.
///
/// Cloning the handle shares the chain.
#[derive(Clone)]
pub struct Promise {
    shared: Arc<PromiseShared>,
}

impl Promise {
    pub(crate) fn create(
        core: Arc<EngineCore>,
        config: PromiseConfig,
        executor: Option<Arc<dyn Executor>>,
        events: Arc<dyn EventSink>,
        first: Stage,
    ) -> Self {
        let shared = Arc::new(PromiseShared {
            id: Uuid::new_v4(),
            core: Arc::clone(&core),
            events,
            state: Mutex::new(PromiseState {
                phase: Phase::Idle,
                queue: VecDeque::from([first]),
                current: None,
                stages_opened: 0,
                ledger: ResultLedger::default(),
                rejection: None,
                resolved: false,
                config,
                executor,
                on_resolve: Vec::new(),
                on_reject: Vec::new(),
                on_fulfilled: Vec::new(),
                interrupts: 0,
                fulfillments: 0,
            }),
            done: Condvar::new(),
        });
        core.track(&shared);
        Self { shared }
    }

    /// Returns the chain id used in logs and events.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Starts the first stage. Starting twice is a no-op.
    pub fn start(&self) -> &Self {
        let launch = {
            let mut state = self.shared.state.lock();
            if state.phase != Phase::Idle {
                warn!(promise = %self.shared.id, "Promise already started");
                return self;
            }
            self.shared.open_next_stage(&mut state)
        };

        if let Some(launch) = launch {
            info!(promise = %self.shared.id, "Promise started");
            self.shared
                .emit(events::PROMISE_STARTED, EventPayload::new(self.shared.id));
            self.shared.launch(launch);
        }
        self
    }

    /// Appends a stage.
    ///
    /// The stage runs once every earlier stage has resolved. If the chain
    /// has already fulfilled without a rejection it is re-opened and the
    /// stage starts right away. If the chain was rejected the stage is
    /// dropped and the rejection stands.
    ///
    /// # Errors
    ///
    /// Returns [`PromiseError::InvalidArgument`] if `tasks` is empty or holds
    /// the same task twice.
    pub fn then(&self, tasks: impl IntoIterator<Item = Task>) -> Result<&Self, PromiseError> {
        let tasks: Vec<Task> = tasks.into_iter().collect();
        let launch = {
            let mut state = self.shared.state.lock();
            let stage = Stage::new(tasks, state.config.pass_results_through)?;

            if state.rejection.is_some() {
                debug!(promise = %self.shared.id, "Dropping stage appended to a rejected chain");
                return Ok(self);
            }

            state.queue.push_back(stage);
            if state.phase == Phase::Fulfilled {
                debug!(promise = %self.shared.id, "Re-opening fulfilled chain");
                state.resolved = false;
                self.shared.open_next_stage(&mut state)
            } else {
                None
            }
        };

        if let Some(launch) = launch {
            self.shared.launch(launch);
        }
        Ok(self)
    }

    /// Registers a sink for the result vector.
    ///
    /// Called once, if and when the chain resolves. Registered after the
    /// chain resolved, it runs immediately on the calling thread.
    pub fn resolve<F>(&self, sink: F) -> &Self
    where
        F: FnOnce(&[Value]) + Send + 'static,
    {
        let values = {
            let mut state = self.shared.state.lock();
            if !state.outcome_known() {
                state.on_resolve.push(Box::new(sink));
                return self;
            }
            if state.rejection.is_some() {
                return self;
            }
            state.delivered_values()
        };
        run_sink(self.shared.id, "resolve", || sink(&values));
        self
    }

    /// Registers a sink for the rejection cause.
    ///
    /// Called once, if and when the chain rejects. Registered after the
    /// chain rejected, it runs immediately on the calling thread.
    pub fn reject<F>(&self, sink: F) -> &Self
    where
        F: FnOnce(&PromiseError) + Send + 'static,
    {
        let cause = {
            let mut state = self.shared.state.lock();
            if !state.outcome_known() {
                state.on_reject.push(Box::new(sink));
                return self;
            }
            match state.rejection.clone() {
                Some(cause) => cause,
                None => return self,
            }
        };
        run_sink(self.shared.id, "reject", || sink(&cause));
        self
    }

    /// Registers an observer called once the chain fulfills either way.
    pub fn fulfilled<F>(&self, sink: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.shared.state.lock();
            if !state.outcome_known() {
                state.on_fulfilled.push(Box::new(sink));
                return self;
            }
        }
        run_sink(self.shared.id, "fulfilled", sink);
        self
    }

    /// Blocks until the chain fulfills.
    ///
    /// Returns at the next terminal transition after the call, even when a
    /// resolve sink appended a stage with [`Promise::then`] and the chain is
    /// already running again. A rejected chain still returns `Ok`; the cause
    /// is available through [`Promise::rejection`] and the reject sinks.
    ///
    /// # Errors
    ///
    /// - [`PromiseError::IllegalState`] if the chain was never started
    /// - [`PromiseError::InterruptedWait`] if [`Promise::interrupt`] is called
    ///   while waiting
    pub fn wait_for_completion(&self) -> Result<(), PromiseError> {
        let mut state = self.shared.state.lock();
        if state.phase == Phase::Idle {
            return Err(PromiseError::illegal_state(
                "wait_for_completion called before the promise was started",
            ));
        }

        let seen = state.interrupts;
        let fulfillments = state.fulfillments;
        while state.phase != Phase::Fulfilled && state.fulfillments == fulfillments {
            if state.interrupts != seen {
                return Err(PromiseError::InterruptedWait);
            }
            self.shared.done.wait(&mut state);
        }
        Ok(())
    }

    /// Blocks until the chain fulfills or `timeout` elapses.
    ///
    /// Returns whether a terminal transition was reached, with the same
    /// meaning as [`Promise::wait_for_completion`].
    ///
    /// # Errors
    ///
    /// Same as [`Promise::wait_for_completion`].
    pub fn wait_for_completion_timeout(&self, timeout: Duration) -> Result<bool, PromiseError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        if state.phase == Phase::Idle {
            return Err(PromiseError::illegal_state(
                "wait_for_completion called before the promise was started",
            ));
        }

        let seen = state.interrupts;
        let fulfillments = state.fulfillments;
        while state.phase != Phase::Fulfilled && state.fulfillments == fulfillments {
            if state.interrupts != seen {
                return Err(PromiseError::InterruptedWait);
            }
            if self.shared.done.wait_until(&mut state, deadline).timed_out() {
                return Ok(state.phase == Phase::Fulfilled || state.fulfillments != fulfillments);
            }
        }
        Ok(true)
    }

    /// Releases every thread blocked in `wait_for_completion` with
    /// [`PromiseError::InterruptedWait`]. The chain itself keeps running.
    pub fn interrupt(&self) {
        debug!(promise = %self.shared.id, "Interrupting waiters");
        self.shared.interrupt_waiters();
    }

    /// Sets the default retry budget (immediate retries) for later stages.
    pub fn retries(&self, retries: u32) -> &Self {
        let mut state = self.shared.state.lock();
        state.config = state.config.clone().with_retries(retries);
        drop(state);
        self
    }

    /// Sets the default retry budget and delay for later stages.
    pub fn retries_with_delay(&self, retries: u32, delay: Duration) -> &Self {
        let mut state = self.shared.state.lock();
        state.config = state.config.clone().with_retries_and_delay(retries, delay);
        drop(state);
        self
    }

    /// Sets the default per-attempt timeout for later stages.
    pub fn timeout(&self, timeout: Duration) -> &Self {
        let mut state = self.shared.state.lock();
        state.config = state.config.clone().with_timeout(timeout);
        drop(state);
        self
    }

    /// Sets the pass-through policy for stages appended from now on and for
    /// the value vector delivered at fulfillment.
    pub fn pass_results_through(&self, enabled: bool) -> &Self {
        self.shared.state.lock().config.pass_results_through = enabled;
        self
    }

    /// Binds an executor for stages launched from now on.
    pub fn set_executor(&self, executor: Arc<dyn Executor>) -> &Self {
        self.shared.state.lock().executor = Some(executor);
        self
    }

    /// Returns true once the first stage has been launched.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.shared.state.lock().phase != Phase::Idle
    }

    /// Returns true once the chain has fulfilled and every sink has run.
    #[must_use]
    pub fn is_fulfilled(&self) -> bool {
        self.shared.state.lock().phase == Phase::Fulfilled
    }

    /// Returns true if the chain fulfilled without a rejection.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        let state = self.shared.state.lock();
        state.phase == Phase::Fulfilled && state.resolved
    }

    /// Returns true if a stage of the chain was rejected.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.shared.state.lock().rejection.is_some()
    }

    /// Returns the rejection cause, if any.
    #[must_use]
    pub fn rejection(&self) -> Option<PromiseError> {
        self.shared.state.lock().rejection.clone()
    }

    /// Returns the value vector of a resolved chain.
    #[must_use]
    pub fn values(&self) -> Option<Vec<Value>> {
        let state = self.shared.state.lock();
        (state.phase == Phase::Fulfilled && state.resolved).then(|| state.delivered_values())
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Promise")
            .field("id", &self.shared.id)
            .field("phase", &state.phase)
            .field("queued", &state.queue.len())
            .field("rejected", &state.rejection.is_some())
            .finish()
    }
}
