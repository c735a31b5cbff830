//! Deterministic classification and one-line rendering of agent events.

use std::borrow::Cow;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::core::event::{Event, ItemKind, non_empty_str, text_from_content};
use crate::core::extract::{COMMAND_DISPLAY_LIMIT, command_detail, command_status};

/// Display bound for summaries written to the run log.
pub const DISPLAY_LIMIT: usize = 200;

/// Shown for reasoning events that carry no recoverable summary.
pub const THINKING_PLACEHOLDER: &str = "progress update (details hidden)";

const REASONING_TYPES: [&str; 3] = ["reasoning", "analysis", "thinking"];
const SUMMARY_KEYS: [&str; 4] = ["summary", "message", "status", "name"];
const DATA_SUMMARY_KEYS: [&str; 7] = [
    "summary", "message", "status", "name", "command", "path", "file",
];
const REASONING_SUMMARY_KEYS: [&str; 2] = ["summary", "reasoning_summary"];

/// Semantic category of one event. Every event maps to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Info,
    Turn,
    Command,
    File,
    Tool,
    Thinking,
    Error,
    Agent,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Info,
        Category::Turn,
        Category::Command,
        Category::File,
        Category::Tool,
        Category::Thinking,
        Category::Error,
        Category::Agent,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Category::Info => "INFO",
            Category::Turn => "TURN",
            Category::Command => "COMMAND",
            Category::File => "FILE",
            Category::Tool => "TOOL",
            Category::Thinking => "THINKING",
            Category::Error => "ERROR",
            Category::Agent => "AGENT",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Cap `text` at `limit` characters, appending `...` when anything was cut.
pub fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("ansi escape regex")
});

/// Remove terminal color and cursor escapes.
pub fn strip_ansi(text: &str) -> String {
    ANSI_RE.replace_all(text, "").into_owned()
}

/// Map an event to its category.
///
/// An attached `item.type` wins over the label heuristic. Otherwise the
/// lowercased label is scanned in a fixed order: error, reasoning, tool,
/// command, file, turn. Anything else is `Info`.
pub fn classify(event: &Event) -> Category {
    match event.item_kind() {
        Some(ItemKind::Command) => return Category::Command,
        Some(ItemKind::FileChange) => return Category::File,
        Some(ItemKind::Tool) => return Category::Tool,
        Some(ItemKind::AgentMessage) => return Category::Agent,
        Some(ItemKind::Reasoning) => return Category::Thinking,
        Some(ItemKind::Other) | None => {}
    }

    let label = event.label();
    if label.contains("error") || event.flag("error") || event.flag("exception") {
        Category::Error
    } else if contains_any(&label, &["reason", "analysis", "thinking"])
        || has_reasoning_content(event)
    {
        Category::Thinking
    } else if contains_any(&label, &["tool", "function"]) {
        Category::Tool
    } else if contains_any(&label, &["command", "shell", "process"]) {
        Category::Command
    } else if contains_any(&label, &["file", "patch"]) {
        Category::File
    } else if contains_any(&label, &["turn", "thread"]) {
        Category::Turn
    } else {
        Category::Info
    }
}

fn contains_any(label: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| label.contains(needle))
}

fn has_reasoning_content(event: &Event) -> bool {
    event
        .item()
        .and_then(|item| item.get("content"))
        .and_then(Value::as_array)
        .is_some_and(|entries| {
            entries.iter().any(|entry| {
                entry
                    .get("type")
                    .and_then(Value::as_str)
                    .is_some_and(|kind| REASONING_TYPES.contains(&kind))
            })
        })
}

/// Short human-readable description of an event, or empty when none is found.
pub fn summarize(event: &Event) -> String {
    let top = SUMMARY_KEYS
        .iter()
        .find_map(|key| event.str_field(key));
    if let Some(text) = top {
        return truncate(text, DISPLAY_LIMIT);
    }
    if let Some(data) = event.data()
        && let Some(text) = DATA_SUMMARY_KEYS
            .iter()
            .find_map(|key| non_empty_str(data, key))
    {
        return truncate(text, DISPLAY_LIMIT);
    }
    if let Some(item) = event.item() {
        if let Some(text) = non_empty_str(item, "text") {
            return truncate(text, DISPLAY_LIMIT);
        }
        let text = item.get("content").map(text_from_content).unwrap_or_default();
        if !text.is_empty() {
            return truncate(&text, DISPLAY_LIMIT);
        }
        if let Some(kind) = item.get("type").and_then(Value::as_str) {
            return truncate(kind, DISPLAY_LIMIT);
        }
    }
    String::new()
}

/// Summary text a reasoning event is willing to expose, if any.
pub fn reasoning_summary(event: &Event) -> Option<String> {
    if let Some(text) = REASONING_SUMMARY_KEYS
        .iter()
        .find_map(|key| event.str_field(key))
    {
        return Some(truncate(text, DISPLAY_LIMIT));
    }
    if let Some(item) = event.item() {
        if let Some(text) = non_empty_str(item, "text") {
            return Some(truncate(text, COMMAND_DISPLAY_LIMIT));
        }
        if let Some(text) = REASONING_SUMMARY_KEYS
            .iter()
            .find_map(|key| non_empty_str(item, key))
        {
            return Some(truncate(text, DISPLAY_LIMIT));
        }
        let entries = item.get("content").and_then(Value::as_array);
        for entry in entries.into_iter().flatten().filter_map(Value::as_object) {
            let is_summary = entry
                .get("type")
                .and_then(Value::as_str)
                .is_some_and(|kind| REASONING_SUMMARY_KEYS.contains(&kind));
            if is_summary
                && let Some(text) =
                    non_empty_str(entry, "text").or_else(|| non_empty_str(entry, "content"))
            {
                return Some(truncate(text, DISPLAY_LIMIT));
            }
        }
    }
    event.data().and_then(|data| {
        REASONING_SUMMARY_KEYS
            .iter()
            .find_map(|key| non_empty_str(data, key))
            .map(|text| truncate(text, DISPLAY_LIMIT))
    })
}

/// A classified event rendered for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedEvent {
    pub category: Category,
    pub text: String,
}

impl fmt::Display for FormattedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.text)
    }
}

/// Render an event as `[LABEL] text`.
///
/// Reasoning never leaks raw content beyond its summary, agent messages are
/// shown verbatim, and anything carrying a command line is shown as a
/// command with its status suffix.
pub fn format_event(event: &Event) -> FormattedEvent {
    let category = classify(event);
    if category == Category::Thinking {
        let text = reasoning_summary(event).unwrap_or_else(|| THINKING_PLACEHOLDER.to_string());
        return FormattedEvent { category, text };
    }
    if category == Category::Agent
        && let Some(text) = event.agent_message_text()
    {
        return FormattedEvent { category, text };
    }
    if let Some(detail) = command_detail(event) {
        let text = match command_status(event) {
            Some(status) => format!("{detail} [{status}]"),
            None => detail,
        };
        return FormattedEvent {
            category: Category::Command,
            text,
        };
    }
    let summary = summarize(event);
    let text = if summary.is_empty() {
        event
            .raw_label()
            .map_or_else(|| "event".to_string(), Cow::into_owned)
    } else {
        summary
    };
    FormattedEvent { category, text }
}

/// Incremental assistant text carried by a streaming event.
pub fn stream_text(event: &Event) -> Option<String> {
    if contains_any(&event.label(), &["output_text", "assistant", "message"]) {
        let fields = event.fields();
        if let Some(text) = fields.get("delta").and_then(text_from_object) {
            return Some(text);
        }
        if let Some(text) = fields.get("text").and_then(text_from_object) {
            return Some(text);
        }
    }
    let item = event.item()?;
    let item_type = event.item_type()?;
    if !matches!(
        item_type.as_str(),
        "output_text" | "output_text_delta" | "assistant_message" | "agent_message"
    ) {
        return None;
    }
    item.get("text")
        .and_then(text_from_object)
        .or_else(|| item.get("content").and_then(text_from_object))
}

/// Whether the event closes a streamed assistant message.
pub fn is_output_done(event: &Event) -> bool {
    let label = event.label();
    if label.contains("output_text.done") {
        return true;
    }
    if label.ends_with(".done") && (label.contains("output_text") || label.contains("message")) {
        return true;
    }
    matches!(
        event.item_type().as_deref(),
        Some("output_text_done" | "assistant_message" | "agent_message")
    )
}

fn text_from_object(value: &Value) -> Option<String> {
    let text = match value {
        // Deltas keep their whitespace so streamed words do not run together.
        Value::String(text) if !text.trim().is_empty() => text.clone(),
        Value::Object(map) => match non_empty_str(map, "text") {
            Some(text) => text.to_string(),
            None => map.get("content").map(text_from_content).unwrap_or_default(),
        },
        Value::Array(_) => text_from_content(value),
        _ => String::new(),
    };
    (!text.is_empty()).then_some(text)
}
