//! Decoding of the agent's line-delimited event stream.
//!
//! The stream is schema-free: the same concept shows up under different keys
//! depending on the agent version (`type`, `event`, `kind`, ...), and payloads
//! may sit at the top level, under `data`, or under `item`. [`Event`] keeps the
//! decoded object and exposes an ordered set of shape probes over it instead of
//! committing to one rigid structure.

use std::borrow::Cow;

use serde_json::{Map, Value};

/// Maximum number of events retained per iteration for the run summary.
///
/// Events past this bound are still logged, just not kept in memory.
pub const MAX_RETAINED_EVENTS: usize = 2000;

/// Keys that may carry an event's type label, in lookup order.
const TYPE_KEYS: [&str; 5] = ["type", "event", "kind", "event_type", "name"];

/// One decoded record from the agent's event stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    fields: Map<String, Value>,
}

/// Typed view of the `item.type` field attached to many events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Command,
    FileChange,
    Tool,
    AgentMessage,
    Reasoning,
    Other,
}

impl ItemKind {
    pub fn from_type(item_type: &str) -> Self {
        match item_type.to_ascii_lowercase().as_str() {
            "command_execution" | "command" | "shell" => Self::Command,
            "file_write" | "file" | "patch" | "apply_patch" | "file_change" | "file_edit" => {
                Self::FileChange
            }
            "tool_call" | "tool_result" | "function_call" | "function" => Self::Tool,
            "agent_message" | "assistant_message" => Self::AgentMessage,
            "reasoning" | "analysis" | "thinking" => Self::Reasoning,
            _ => Self::Other,
        }
    }
}

impl Event {
    /// Decode one stream line. Returns `None` when the line is not a JSON object,
    /// in which case callers treat it as plain text.
    pub fn decode(line: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(line.trim()).ok()?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// First non-empty type label, as written by the agent.
    ///
    /// Numeric and boolean labels are rendered as text; zero and `false`
    /// count as absent.
    pub fn raw_label(&self) -> Option<Cow<'_, str>> {
        TYPE_KEYS.iter().find_map(|key| {
            let value = self.fields.get(*key)?;
            match value {
                Value::String(_) => non_empty_str(&self.fields, key).map(Cow::Borrowed),
                Value::Number(_) | Value::Bool(_) if is_truthy(value) => {
                    Some(Cow::Owned(value.to_string()))
                }
                _ => None,
            }
        })
    }

    /// Lowercased type label (empty when the event carries none).
    pub fn label(&self) -> String {
        self.raw_label().unwrap_or_default().to_lowercase()
    }

    pub fn item(&self) -> Option<&Map<String, Value>> {
        self.fields.get("item").and_then(Value::as_object)
    }

    pub fn data(&self) -> Option<&Map<String, Value>> {
        self.fields.get("data").and_then(Value::as_object)
    }

    /// Lowercased `item.type`, if the event has an item with a string type.
    pub fn item_type(&self) -> Option<String> {
        self.item()
            .and_then(|item| item.get("type"))
            .and_then(Value::as_str)
            .map(str::to_lowercase)
    }

    pub fn item_kind(&self) -> Option<ItemKind> {
        self.item_type().map(|kind| ItemKind::from_type(&kind))
    }

    /// Trimmed, non-empty string field at the top level.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        non_empty_str(&self.fields, key)
    }

    /// Whether a top-level field is present and truthy.
    pub fn flag(&self, key: &str) -> bool {
        self.fields.get(key).is_some_and(is_truthy)
    }

    /// Text of an attached agent/assistant message item.
    pub fn agent_message_text(&self) -> Option<String> {
        if self.item_kind() != Some(ItemKind::AgentMessage) {
            return None;
        }
        let item = self.item()?;
        if let Some(text) = non_empty_str(item, "text") {
            return Some(text.to_string());
        }
        let text = item.get("content").map(text_from_content)?;
        (!text.is_empty()).then_some(text)
    }
}

/// Trimmed, non-empty string value of `key` in `map`.
pub fn non_empty_str<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Flatten a message `content` payload (string, `{text}`, or a list of typed parts).
pub fn text_from_content(content: &Value) -> String {
    match content {
        Value::String(text) => text.trim().to_string(),
        Value::Object(map) => non_empty_str(map, "text")
            .or_else(|| non_empty_str(map, "content"))
            .unwrap_or_default()
            .to_string(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(Value::as_object)
            .filter(|part| {
                matches!(
                    part.get("type").and_then(Value::as_str),
                    Some("text" | "output_text" | "input_text")
                )
            })
            .filter_map(|part| {
                part.get("text")
                    .and_then(Value::as_str)
                    .or_else(|| part.get("content").and_then(Value::as_str))
            })
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        _ => String::new(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Bounded list of events collected over one iteration.
#[derive(Debug, Default)]
pub struct EventCollector {
    events: Vec<Event>,
    overflow: usize,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retain `event` if there is room. Returns false when it was dropped.
    pub fn push(&mut self, event: Event) -> bool {
        if self.events.len() >= MAX_RETAINED_EVENTS {
            self.overflow += 1;
            return false;
        }
        self.events.push(event);
        true
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = Event>) {
        for event in events {
            self.push(event);
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    /// Number of events dropped because the collector was full.
    pub fn overflow(&self) -> usize {
        self.overflow
    }
}
