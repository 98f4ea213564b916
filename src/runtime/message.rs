//! The log message model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::lang::Value;

/// A log message flowing through pipelines.
///
/// The core only needs named field access; the schema of the fields is up
/// to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message id.
    pub id: Uuid,
    /// Receive time.
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    fields: BTreeMap<String, Value>,
    #[serde(default)]
    streams: BTreeSet<String>,
    #[serde(default)]
    dropped: bool,
}

impl Message {
    /// Empty message with a fresh id.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            fields: BTreeMap::new(),
            streams: BTreeSet::new(),
            dropped: false,
        }
    }

    /// Message carrying `fields`.
    pub fn from_fields(fields: BTreeMap<String, Value>) -> Self {
        Self {
            fields,
            ..Self::new()
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_field(name, value.into());
        self
    }

    /// Builder-style stream membership.
    pub fn with_stream(mut self, stream: impl Into<String>) -> Self {
        self.streams.insert(stream.into());
        self
    }

    /// Field value, if present.
    pub fn get_field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Whether the field is present.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Set a field, returning the previous value.
    pub fn set_field(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(name.into(), value)
    }

    /// Remove a field, returning its value.
    pub fn remove_field(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// All fields, ordered by name.
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Streams the message was routed through.
    pub fn streams(&self) -> &BTreeSet<String> {
        &self.streams
    }

    /// Add the message to a stream.
    pub fn add_stream(&mut self, stream: impl Into<String>) {
        self.streams.insert(stream.into());
    }

    /// Whether a rule asked to discard the message.
    pub fn is_dropped(&self) -> bool {
        self.dropped
    }

    /// Mark or unmark the message as dropped.
    pub fn set_dropped(&mut self, dropped: bool) {
        self.dropped = dropped;
    }

    /// Append an entry to a text field holding processing errors.
    pub fn append_processing_error(&mut self, field: &str, entry: &str) {
        let text = match self.fields.get(field) {
            Some(Value::String(existing)) if !existing.is_empty() => {
                format!("{}; {}", existing, entry)
            }
            _ => entry.to_string(),
        };
        self.fields.insert(field.to_string(), Value::String(text));
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processing_errors_accumulate() {
        let mut message = Message::new();
        message.append_processing_error("errors", "first");
        message.append_processing_error("errors", "second");
        assert_eq!(message.get_field("errors"), Some(&Value::from("first; second")));
    }

    #[test]
    fn serializes_fields_as_plain_json() {
        let message = Message::new().with_field("count", 3i64).with_stream("main");
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["fields"]["count"], serde_json::json!(3));
        assert_eq!(json["streams"], serde_json::json!(["main"]));
    }
}
