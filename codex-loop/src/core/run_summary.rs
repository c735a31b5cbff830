//! The `### Run Summary` block appended to the run log after each iteration.

use std::fmt::Write as _;
use std::time::Duration;

use crate::core::classifier::truncate;
use crate::core::event::{Event, ItemKind};
use crate::core::extract::{
    COMMAND_DISPLAY_LIMIT, command_detail, paths_from_command, paths_from_event, unique_preserve,
};

/// Per-list cap on commands and files shown in the summary.
pub const MAX_SUMMARY_ITEMS: usize = 20;

/// Commands run and files touched over one iteration.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunActivity {
    pub commands: Vec<String>,
    pub files_read: Vec<String>,
    pub files_changed: Vec<String>,
}

impl RunActivity {
    /// Fold events into deduplicated lists, each capped at `max_items`.
    pub fn from_events(events: &[Event], max_items: usize) -> Self {
        let mut commands = Vec::new();
        let mut files_read = Vec::new();
        let mut files_changed = Vec::new();

        for event in events {
            if let Some(command) = command_detail(event) {
                let paths = paths_from_command(&command);
                files_read.extend(paths.read);
                files_changed.extend(paths.write);
                commands.push(truncate(&command, COMMAND_DISPLAY_LIMIT));
            }
            if event.item_kind() == Some(ItemKind::FileChange) {
                files_changed.extend(paths_from_event(event));
            }
        }

        let cap = |items: Vec<String>| {
            let mut items = unique_preserve(items);
            items.truncate(max_items);
            items
        };
        Self {
            commands: cap(commands),
            files_read: cap(files_read),
            files_changed: cap(files_changed),
        }
    }
}

/// Render the summary block (trailing newline included).
///
/// `json_enabled` is false when the agent ran without event streaming, in
/// which case there is nothing to mine.
pub fn summarize_run_events(
    events: &[Event],
    duration: Duration,
    json_enabled: bool,
    max_items: usize,
) -> String {
    let mut out = String::from("### Run Summary\n");
    let _ = writeln!(out, "- Duration: {:.1}s", duration.as_secs_f64());

    let placeholder = if !json_enabled {
        Some("(json disabled)")
    } else if events.is_empty() {
        Some("(no events captured)")
    } else {
        None
    };
    if let Some(placeholder) = placeholder {
        for title in ["Commands", "Files read", "Files changed"] {
            let _ = writeln!(out, "- {title}: {placeholder}");
        }
        return out;
    }

    let activity = RunActivity::from_events(events, max_items);
    push_list(&mut out, "Commands", &activity.commands);
    push_list(&mut out, "Files read", &activity.files_read);
    push_list(&mut out, "Files changed", &activity.files_changed);
    out
}

fn push_list(out: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        let _ = writeln!(out, "- {title}: (none captured)");
        return;
    }
    let _ = writeln!(out, "- {title} ({}):", items.len());
    for item in items {
        let _ = writeln!(out, "  - {item}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn event(value: Value) -> Event {
        Event::from_value(value).expect("object event")
    }

    #[test]
    fn json_disabled_block() {
        let text = summarize_run_events(&[], Duration::from_millis(1300), false, MAX_SUMMARY_ITEMS);
        assert_eq!(
            text,
            "### Run Summary\n- Duration: 1.3s\n- Commands: (json disabled)\n- Files read: (json disabled)\n- Files changed: (json disabled)\n"
        );
    }

    #[test]
    fn empty_event_list_block() {
        let text = summarize_run_events(&[], Duration::from_secs(2), true, MAX_SUMMARY_ITEMS);
        assert!(text.contains("- Commands: (no events captured)"));
        assert!(text.contains("- Files changed: (no events captured)"));
    }

    #[test]
    fn commands_and_files_are_deduplicated() {
        let events = vec![
            event(json!({"type": "item.completed", "item": {"type": "command_execution", "command": "cat src/lib.rs"}})),
            event(json!({"type": "item.completed", "item": {"type": "command_execution", "command": "cat src/lib.rs"}})),
            event(json!({"type": "item.completed", "item": {"type": "file_change", "path": "src/new.rs"}})),
            event(json!({"type": "turn.completed"})),
        ];
        let text = summarize_run_events(&events, Duration::from_secs(3), true, MAX_SUMMARY_ITEMS);
        assert_eq!(
            text,
            "### Run Summary\n- Duration: 3.0s\n- Commands (1):\n  - cat src/lib.rs\n- Files read (1):\n  - src/lib.rs\n- Files changed (1):\n  - src/new.rs\n"
        );
    }

    #[test]
    fn lists_are_capped() {
        let events: Vec<Event> = (0..30)
            .map(|i| event(json!({"command": format!("touch f{i}.txt")})))
            .collect();
        let activity = RunActivity::from_events(&events, MAX_SUMMARY_ITEMS);
        assert_eq!(activity.commands.len(), MAX_SUMMARY_ITEMS);
        assert_eq!(activity.files_changed.len(), MAX_SUMMARY_ITEMS);
        assert!(activity.files_read.is_empty());
        let text = summarize_run_events(&events, Duration::ZERO, true, MAX_SUMMARY_ITEMS);
        assert!(text.contains("- Files read: (none captured)"));
    }
}
