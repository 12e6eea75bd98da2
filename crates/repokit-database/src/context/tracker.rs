//! Snapshots of rows read with change tracking enabled.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

use repokit_core::traits::context::{MutationKind, Row};

use super::key_text;

/// Identity map of tracked rows, keyed by table and key.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    entries: Mutex<HashMap<(String, String), Row>>,
}

impl ChangeTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or refresh) the snapshot of a row.
    pub fn track(&self, table: &str, key: &Value, row: &Row) {
        let Some(key) = key_text(key) else {
            return;
        };
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert((table.to_string(), key), row.clone());
    }

    /// Snapshot for the given row, if tracked.
    pub fn get(&self, table: &str, key: &Value) -> Option<Row> {
        let key = key_text(key)?;
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(&(table.to_string(), key)).cloned()
    }

    /// Number of tracked rows.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bring snapshots in line with a committed mutation: updated rows are
    /// refreshed if tracked, removed rows are forgotten.
    pub fn committed(&self, kind: MutationKind, table: &str, key_field: Option<&str>, row: &Row) {
        let Some(key) = key_field.and_then(|f| row.get(f)).and_then(key_text) else {
            return;
        };
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let id = (table.to_string(), key);
        match kind {
            MutationKind::Update => {
                if let Some(snapshot) = entries.get_mut(&id) {
                    *snapshot = row.clone();
                }
            }
            MutationKind::Remove => {
                entries.remove(&id);
            }
            MutationKind::Insert => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_track_and_get() {
        let tracker = ChangeTracker::new();
        tracker.track("users", &json!(1), &row(json!({"id": 1, "name": "a"})));
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.get("users", &json!(1)).unwrap()["name"], json!("a"));
        assert!(tracker.get("users", &json!(2)).is_none());
        assert!(tracker.get("groups", &json!(1)).is_none());
    }

    #[test]
    fn test_null_keys_are_not_tracked() {
        let tracker = ChangeTracker::new();
        tracker.track("users", &Value::Null, &row(json!({"id": null})));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_committed_refreshes_and_forgets() {
        let tracker = ChangeTracker::new();
        tracker.track("users", &json!(1), &row(json!({"id": 1, "name": "a"})));
        tracker.track("users", &json!(2), &row(json!({"id": 2, "name": "b"})));

        let updated = row(json!({"id": 1, "name": "renamed"}));
        tracker.committed(MutationKind::Update, "users", Some("id"), &updated);
        assert_eq!(tracker.get("users", &json!(1)).unwrap()["name"], json!("renamed"));

        let untracked = row(json!({"id": 9, "name": "x"}));
        tracker.committed(MutationKind::Update, "users", Some("id"), &untracked);
        assert!(tracker.get("users", &json!(9)).is_none());

        tracker.committed(MutationKind::Remove, "users", Some("id"), &row(json!({"id": 2})));
        assert_eq!(tracker.len(), 1);
    }
}
