//! Work contracts a task can run.
//!
//! Every contract takes the stage input snapshot as an ordered slice of
//! values. Closures implement [`Call`] and [`DelegatedCall`] directly; async
//! closures go through [`FutureFn`].

use super::Completer;
use crate::core::Value;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;

/// Work that runs synchronously on a worker thread.
pub trait Call: Send + Sync {
    /// Computes the task's value from the stage inputs.
    fn call(&self, inputs: &[Value]) -> anyhow::Result<Value>;
}

impl<F> Call for F
where
    F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync,
{
    fn call(&self, inputs: &[Value]) -> anyhow::Result<Value> {
        self(inputs)
    }
}

/// Work that is already asynchronous.
#[async_trait]
pub trait AsyncCall: Send + Sync {
    /// Computes the task's value from the stage inputs.
    async fn call(&self, inputs: Vec<Value>) -> anyhow::Result<Value>;
}

/// Adapts an async closure to [`AsyncCall`].
pub struct FutureFn<F> {
    func: F,
}

impl<F> FutureFn<F> {
    /// Wraps the closure.
    pub const fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> fmt::Debug for FutureFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureFn").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> AsyncCall for FutureFn<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn call(&self, inputs: Vec<Value>) -> anyhow::Result<Value> {
        (self.func)(inputs).await
    }
}

/// Work that completes through a callback at some later time.
///
/// `start` must return promptly. The outcome is reported through the
/// [`Completer`], from any thread; only the first report of an attempt counts.
pub trait DelegatedCall: Send + Sync {
    /// Starts the work for one attempt.
    fn start(&self, inputs: &[Value], completer: Completer);
}

impl<F> DelegatedCall for F
where
    F: Fn(&[Value], Completer) + Send + Sync,
{
    fn start(&self, inputs: &[Value], completer: Completer) {
        self(inputs, completer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Sum;

    impl Call for Sum {
        fn call(&self, inputs: &[Value]) -> anyhow::Result<Value> {
            Ok(json!(inputs.iter().filter_map(Value::as_i64).sum::<i64>()))
        }
    }

    #[test]
    fn test_struct_call() {
        let value = Sum.call(&[json!(1), json!(2), json!(3)]).unwrap();
        assert_eq!(value, json!(6));
    }

    #[test]
    fn test_closure_call() {
        let call = |inputs: &[Value]| -> anyhow::Result<Value> { Ok(json!(inputs.len())) };
        assert_eq!(Call::call(&call, &[Value::Null]).unwrap(), json!(1));
    }

    #[tokio::test]
    async fn test_future_fn() {
        let call = FutureFn::new(|inputs: Vec<Value>| async move {
            anyhow::ensure!(!inputs.is_empty(), "no inputs");
            Ok(inputs[0].clone())
        });

        assert_eq!(call.call(vec![json!("x")]).await.unwrap(), json!("x"));
        assert_eq!(
            call.call(Vec::new()).await.unwrap_err().to_string(),
            "no inputs"
        );
    }
}
