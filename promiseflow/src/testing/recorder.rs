//! Thread-safe recording of values for assertions.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

/// A cloneable log shared between task closures and the test body.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    entries: Arc<Mutex<Vec<(String, Value)>>>,
}

impl Recorder {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn record(&self, label: impl Into<String>, value: impl Into<Value>) {
        self.entries.lock().push((label.into(), value.into()));
    }

    /// Returns all entries in recording order.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.entries.lock().clone()
    }

    /// Returns the labels in recording order.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.entries.lock().iter().map(|(l, _)| l.clone()).collect()
    }

    /// Returns the values recorded under `label`.
    #[must_use]
    pub fn values_for(&self, label: &str) -> Vec<Value> {
        self.entries
            .lock()
            .iter()
            .filter(|(l, _)| l == label)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_recorder_shares_entries_between_clones() {
        let recorder = Recorder::new();
        let clone = recorder.clone();

        clone.record("stage1", json!([1]));
        recorder.record("stage2", json!([1, 2]));
        clone.record("stage1", json!([3]));

        assert_eq!(recorder.len(), 3);
        assert_eq!(recorder.labels(), vec!["stage1", "stage2", "stage1"]);
        assert_eq!(recorder.values_for("stage1"), vec![json!([1]), json!([3])]);
    }
}
