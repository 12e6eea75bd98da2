//! Persistence-context backends.

pub mod memory;
pub mod postgres;
pub mod sql;
pub mod tracker;

use serde_json::Value;

/// Canonical text of a key value, used to compare keys across rows.
///
/// Returns `None` for null, which never matches anything.
pub fn key_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
