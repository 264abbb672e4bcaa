//! Snapshot normalization
//!
//! Converts the backend's tree representation (values with `.value` /
//! `.priority` wrappers at any depth) into the JSON record handed to the
//! web layer: `{priority, key, value, children: [{key, value}...]}`.

use crate::database::query::{order_children, OrderBy};
use serde_json::{json, Map, Value};
use tracing::warn;

/// One location's data as read from the backend
#[derive(Debug, Clone, PartialEq)]
pub struct DataSnapshot {
    /// Key of the location (None at the root)
    pub key: Option<String>,
    raw: Value,
}

impl DataSnapshot {
    /// Wrap a raw backend value
    pub fn new(key: Option<String>, raw: Value) -> Self {
        Self { key, raw }
    }

    /// Whether the location holds any data
    pub fn exists(&self) -> bool {
        !matches!(self.value(), Value::Null)
    }

    /// Priority of the location, or null
    pub fn priority(&self) -> Value {
        match &self.raw {
            Value::Object(map) => map.get(".priority").cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    /// The location's value with all priority metadata stripped
    pub fn value(&self) -> Value {
        clean(&self.raw)
    }

    /// Normalize into the caller-facing snapshot record
    ///
    /// `children` is present only for collection values, ordered the way
    /// the active query orders them.
    pub fn to_value(&self, order_by: Option<&OrderBy>) -> Value {
        let value = self.value();
        let mut record = Map::new();
        record.insert("priority".to_string(), self.priority());
        record.insert(
            "key".to_string(),
            match &self.key {
                Some(key) => Value::String(key.clone()),
                None => Value::Null,
            },
        );

        if let Value::Object(map) = &value {
            let raw_children = match &self.raw {
                Value::Object(raw) => raw.clone(),
                // Unreachable in practice; degrade to unordered keys
                _ => {
                    warn!("snapshot value and raw shape diverged, children order degraded");
                    map.clone()
                }
            };
            let children: Vec<Value> = order_children(order_by, &raw_children)
                .into_iter()
                .filter(|key| !key.starts_with('.'))
                .map(|key| json!({ "key": key, "value": map.get(&key).cloned().unwrap_or(Value::Null) }))
                .collect();
            record.insert("children".to_string(), Value::Array(children));
        }

        record.insert("value".to_string(), value);
        Value::Object(record)
    }
}

/// Deep-strip priority metadata and unwrap `.value` leaves
fn clean(raw: &Value) -> Value {
    match raw {
        Value::Object(map) => {
            if let Some(value) = map.get(".value") {
                return value.clone();
            }
            let cleaned: Map<String, Value> = map
                .iter()
                .filter(|(key, _)| !key.starts_with('.'))
                .map(|(key, value)| (key.clone(), clean(value)))
                .collect();
            if cleaned.is_empty() {
                Value::Null
            } else {
                Value::Object(cleaned)
            }
        }
        other => other.clone(),
    }
}
