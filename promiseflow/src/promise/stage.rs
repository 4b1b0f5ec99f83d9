//! Stages and the result ledger.

use crate::core::Value;
use crate::errors::PromiseError;
use crate::task::Task;
use std::sync::Arc;

/// A fixed, ordered group of tasks that run together.
///
/// Task positions are the result slots; they never change once the stage
/// is built.
#[derive(Debug, Clone)]
pub(crate) struct Stage {
    tasks: Vec<Task>,
    pass_through: bool,
}

impl Stage {
    /// Validates and builds a stage.
    ///
    /// `pass_through` is the chain's pass-through flag at enqueue time.
    pub(crate) fn new(
        tasks: impl IntoIterator<Item = Task>,
        pass_through: bool,
    ) -> Result<Self, PromiseError> {
        let tasks: Vec<Task> = tasks.into_iter().collect();
        if tasks.is_empty() {
            return Err(PromiseError::invalid_argument(
                "a stage needs at least one task",
            ));
        }
        for (i, task) in tasks.iter().enumerate() {
            if tasks[..i].iter().any(|earlier| earlier.same_as(task)) {
                return Err(PromiseError::invalid_argument(format!(
                    "task '{}' appears more than once in the same stage",
                    task.name()
                )));
            }
        }
        Ok(Self {
            tasks,
            pass_through,
        })
    }

    pub(crate) fn into_tasks(self) -> Vec<Task> {
        self.tasks
    }

    pub(crate) const fn pass_through(&self) -> bool {
        self.pass_through
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }
}

/// Accumulated results of a chain.
///
/// `values` holds the outputs of the current (or last) stage by slot.
/// `carried` holds every earlier output handed forward while pass-through
/// was on; it is cleared as soon as a stage runs without pass-through.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct ResultLedger {
    carried: Vec<Value>,
    values: Vec<Value>,
}

impl ResultLedger {
    /// Moves the ledger to a new stage of `len` slots and returns the input
    /// snapshot for that stage.
    pub(crate) fn open_stage(&mut self, len: usize, pass_through: bool) -> Arc<[Value]> {
        let previous = std::mem::replace(&mut self.values, vec![Value::Null; len]);
        if pass_through {
            self.carried.extend(previous);
            self.carried.clone().into()
        } else {
            self.carried.clear();
            previous.into()
        }
    }

    /// Stores a task's value in its slot.
    pub(crate) fn record(&mut self, slot: usize, value: Value) {
        if let Some(entry) = self.values.get_mut(slot) {
            *entry = value;
        }
    }

    /// Returns the vector handed to result sinks.
    pub(crate) fn deliver(&self, pass_through: bool) -> Vec<Value> {
        if pass_through {
            self.carried.iter().chain(&self.values).cloned().collect()
        } else {
            self.values.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_empty_stage_rejected() {
        let err = Stage::new(Vec::new(), false).unwrap_err();
        assert!(matches!(err, PromiseError::InvalidArgument(_)));
    }

    #[test]
    fn test_duplicate_task_rejected() {
        let task = Task::wrap("twice", || {});
        let err = Stage::new(vec![task.clone(), task], false).unwrap_err();
        assert!(err.to_string().contains("twice"));
    }

    #[test]
    fn test_same_name_different_tasks_allowed() {
        let stage = Stage::new(vec![Task::wrap("a", || {}), Task::wrap("a", || {})], true).unwrap();
        assert_eq!(stage.len(), 2);
        assert!(stage.pass_through());
    }

    #[test]
    fn test_first_stage_gets_no_inputs() {
        let mut ledger = ResultLedger::default();
        let inputs = ledger.open_stage(2, false);
        assert!(inputs.is_empty());
        assert_eq!(ledger.deliver(false), vec![Value::Null, Value::Null]);
    }

    #[test]
    fn test_slots_keep_submission_order() {
        let mut ledger = ResultLedger::default();
        ledger.open_stage(3, false);
        ledger.record(2, json!("c"));
        ledger.record(0, json!("a"));
        ledger.record(1, json!("b"));
        ledger.record(9, json!("ignored"));

        assert_eq!(ledger.deliver(false), vec![json!("a"), json!("b"), json!("c")]);
    }

    #[test]
    fn test_pass_through_accumulates_then_collapses() {
        let mut ledger = ResultLedger::default();
        ledger.open_stage(1, false);
        ledger.record(0, json!(10));

        let inputs = ledger.open_stage(1, true);
        assert_eq!(inputs.to_vec(), vec![json!(10)]);
        ledger.record(0, json!(30));

        let inputs = ledger.open_stage(1, true);
        assert_eq!(inputs.to_vec(), vec![json!(10), json!(30)]);
        ledger.record(0, json!(70));

        assert_eq!(ledger.deliver(true), vec![json!(10), json!(30), json!(70)]);
        assert_eq!(ledger.deliver(false), vec![json!(70)]);

        let inputs = ledger.open_stage(1, false);
        assert_eq!(inputs.to_vec(), vec![json!(70)]);
        assert_eq!(ledger.deliver(true), vec![Value::Null]);
    }
}
