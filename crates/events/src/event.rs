use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A fact produced by a successful command.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **free-form** per type (`data` is opaque to the engine)
/// - **ordered** within the batch produced by one command (append order is causal order)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Stable event name (e.g. "user_registered").
    #[serde(rename = "type")]
    event_type: String,
    data: JsonValue,
}

impl Event {
    pub fn new(event_type: impl Into<String>, data: JsonValue) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn data(&self) -> &JsonValue {
        &self.data
    }
}
