//! Lifecycle events emitted by promise chains.
//!
//! Every payload is a JSON object carrying at least the promise id and an
//! RFC 3339 timestamp. Stage and task events add the stage index; task events
//! add the slot and task name.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

/// The first stage of a chain was launched.
pub const PROMISE_STARTED: &str = "promise.started";
/// A stage was launched.
pub const STAGE_STARTED: &str = "stage.started";
/// A task attempt was dispatched.
pub const TASK_ATTEMPT: &str = "task.attempt";
/// A failed attempt will be retried.
pub const TASK_RETRY_SCHEDULED: &str = "task.retry_scheduled";
/// A task produced its value.
pub const TASK_RESOLVED: &str = "task.resolved";
/// A task failed with no retries left.
pub const TASK_REJECTED: &str = "task.rejected";
/// The chain fulfilled without a rejection.
pub const PROMISE_RESOLVED: &str = "promise.resolved";
/// The chain fulfilled with a rejection.
pub const PROMISE_REJECTED: &str = "promise.rejected";

/// Builder for event payloads.
#[derive(Debug, Clone)]
pub(crate) struct EventPayload {
    fields: Map<String, Value>,
}

impl EventPayload {
    pub(crate) fn new(promise: Uuid) -> Self {
        let mut fields = Map::new();
        fields.insert("promise_id".to_string(), Value::String(promise.to_string()));
        fields.insert(
            "timestamp".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        Self { fields }
    }

    pub(crate) fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub(crate) fn stage(self, stage: u64) -> Self {
        self.field("stage", stage)
    }

    pub(crate) fn task(self, slot: usize, name: &str) -> Self {
        self.field("slot", slot).field("task", name)
    }

    pub(crate) fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_fields() {
        let id = Uuid::new_v4();
        let payload = EventPayload::new(id)
            .stage(2)
            .task(1, "fetch")
            .field("attempt", 3)
            .into_value();

        assert_eq!(payload["promise_id"], Value::String(id.to_string()));
        assert_eq!(payload["stage"], 2);
        assert_eq!(payload["slot"], 1);
        assert_eq!(payload["task"], "fetch");
        assert_eq!(payload["attempt"], 3);

        let timestamp = payload["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    }
}
