//! Timer service for delayed retries and timeout watching.
//!
//! The service owns its own runtime so that a saturated worker pool never
//! delays a retry or the detection of a timeout. Its single async worker only
//! sleeps and races handles against their timeouts; every callback is handed
//! to the runtime's blocking pool, so a slow callback in one chain cannot hold
//! up the timers of another.

use super::{AsyncHandle, TaskResult};
use crate::errors::PromiseError;
use std::fmt;
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};

/// Timer thread plus a bounded pool for the callbacks it fires.
pub struct TimerService {
    runtime: Option<Runtime>,
    handle: Handle,
    callback_threads: usize,
}

impl TimerService {
    /// Starts the timer thread with room for `callback_threads` callbacks
    /// running at once. Further callbacks queue until a thread frees up.
    ///
    /// # Errors
    ///
    /// Returns an error if `callback_threads` is zero or the runtime cannot
    /// be built.
    pub fn new(thread_name: &str, callback_threads: usize) -> Result<Self, PromiseError> {
        if callback_threads == 0 {
            return Err(PromiseError::invalid_argument(
                "timer service needs at least one callback thread",
            ));
        }

        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(callback_threads)
            .thread_name(thread_name)
            .enable_time()
            .build()?;
        let handle = runtime.handle().clone();

        tracing::debug!(thread_name, callback_threads, "Timer service started");

        Ok(Self {
            runtime: Some(runtime),
            handle,
            callback_threads,
        })
    }

    /// Returns the bound on concurrently running callbacks.
    pub const fn callback_threads(&self) -> usize {
        self.callback_threads
    }

    /// Runs `action` on a callback thread once `delay` has elapsed.
    pub fn schedule<F>(&self, delay: Duration, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            run_callback(action);
        });
    }

    /// Waits on `handle` and passes its outcome to `on_done` on a callback
    /// thread.
    ///
    /// With a timeout, `on_done` receives [`PromiseError::TimedOut`] once the
    /// timeout elapses; the work behind the handle is left running.
    pub fn watch<F>(&self, handle: AsyncHandle, timeout: Option<Duration>, on_done: F)
    where
        F: FnOnce(TaskResult) + Send + 'static,
    {
        self.handle.spawn(async move {
            let result = match timeout {
                Some(limit) => handle.join_timeout(limit).await,
                None => handle.join().await,
            };
            run_callback(move || on_done(result));
        });
    }
}

/// Moves `action` off the timer worker. Must be called from inside the
/// timer runtime.
fn run_callback<F>(action: F)
where
    F: FnOnce() + Send + 'static,
{
    // Detached; a panicking callback only ends its own blocking task.
    drop(tokio::task::spawn_blocking(action));
}

impl Drop for TimerService {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
            tracing::debug!("Timer service stopped");
        }
    }
}

impl fmt::Debug for TimerService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerService")
            .field("running", &self.runtime.is_some())
            .field("callback_threads", &self.callback_threads)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::mpsc;
    use std::time::Instant;

    #[test]
    fn test_schedule_runs_after_delay() {
        let timer = TimerService::new("test-timer", 4).unwrap();
        let (tx, rx) = mpsc::channel();

        let start = Instant::now();
        timer.schedule(Duration::from_millis(50), move || {
            tx.send(std::thread::current().name().map(str::to_string))
                .unwrap();
        });

        let name = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(timer.callback_threads(), 4);
        assert_eq!(name.as_deref(), Some("test-timer"));
    }

    #[test]
    fn test_watch_delivers_result() {
        let timer = TimerService::new("test-timer", 4).unwrap();
        let (tx, rx) = mpsc::channel();

        timer.watch(AsyncHandle::ready(Ok(json!(3))), None, move |result| {
            tx.send(result).unwrap();
        });

        let result = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(result.unwrap(), json!(3));
    }

    #[test]
    fn test_watch_times_out() {
        let timer = TimerService::new("test-timer", 4).unwrap();
        let (tx, rx) = mpsc::channel();
        let pending = AsyncHandle::new(futures::future::pending());

        timer.watch(pending, Some(Duration::from_millis(30)), move |result| {
            tx.send(result).unwrap();
        });

        let result = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(result.unwrap_err().is_timeout());
    }

    #[test]
    fn test_rejects_zero_callback_threads() {
        let err = TimerService::new("test-timer", 0).unwrap_err();
        assert!(matches!(err, PromiseError::InvalidArgument(_)));
    }

    #[test]
    fn test_slow_callback_does_not_delay_other_timers() {
        let timer = TimerService::new("test-timer", 4).unwrap();
        let (tx, rx) = mpsc::channel();

        timer.schedule(Duration::ZERO, || {
            std::thread::sleep(Duration::from_millis(800));
        });
        std::thread::sleep(Duration::from_millis(20));

        let start = Instant::now();
        timer.schedule(Duration::from_millis(20), move || {
            tx.send(start.elapsed()).unwrap();
        });

        let elapsed = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(elapsed < Duration::from_millis(400), "took {elapsed:?}");
    }

    #[test]
    fn test_watch_times_out_while_a_callback_blocks() {
        let timer = TimerService::new("test-timer", 4).unwrap();
        let (tx, rx) = mpsc::channel();

        timer.watch(AsyncHandle::ready(Ok(json!(1))), None, |_| {
            std::thread::sleep(Duration::from_millis(800));
        });
        std::thread::sleep(Duration::from_millis(20));

        let start = Instant::now();
        let pending = AsyncHandle::new(futures::future::pending());
        timer.watch(pending, Some(Duration::from_millis(50)), move |result| {
            tx.send((result, start.elapsed())).unwrap();
        });

        let (result, elapsed) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(result.unwrap_err().is_timeout());
        assert!(elapsed < Duration::from_millis(400), "took {elapsed:?}");
    }
}
