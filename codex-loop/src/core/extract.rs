//! Best-effort mining of commands and file paths from agent events.
//!
//! Nothing here executes or validates a command. Unmatched or malformed input
//! yields empty results.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::core::classifier::truncate;
use crate::core::event::{Event, non_empty_str};

/// Display bound for command lines in logs and summaries.
pub const COMMAND_DISPLAY_LIMIT: usize = 240;

const COMMAND_KEYS: [&str; 4] = ["command", "cmd", "argv", "args"];
const PATH_KEYS: [&str; 3] = ["path", "file", "filename"];

/// Path argument: a single-quoted, double-quoted, or bare shell word.
const PATH_ARG: &str = r#"(?P<path>'[^']+'|"[^"]+"|[^\s;&|<>]+)"#;

/// Leading option flags, each optionally followed by a numeric value (`-n 20`).
const FLAGS: &str = r"(?:\s+-\S+(?:\s+\d+)?)*";

static READ_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    let mut patterns = vec![format!(
        r"(?i)Get-Content\b[^\n]*?(?:-Path\s+)?{PATH_ARG}"
    )];
    for verb in ["cat", "head", "tail", "less"] {
        patterns.push(format!(r"\b{verb}{FLAGS}\s+{PATH_ARG}"));
    }
    compile(&patterns)
});

static WRITE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    let mut patterns = vec![
        format!(r"(?i)Set-Content\b[^\n]*?(?:-Path\s+)?{PATH_ARG}"),
        format!(r"(?i)Add-Content\b[^\n]*?(?:-Path\s+)?{PATH_ARG}"),
        format!(r"(?i)Out-File\b[^\n]*?(?:-FilePath\s+|-Path\s+)?{PATH_ARG}"),
        format!(r"(?i)New-Item\b[^\n]*?(?:-Path\s+)?{PATH_ARG}"),
        format!(r"(?i)Remove-Item\b[^\n]*?(?:-Path\s+)?{PATH_ARG}"),
        format!(r"\d?>>?\s*{PATH_ARG}"),
    ];
    for verb in ["touch", "rm", "tee"] {
        patterns.push(format!(r"\b{verb}{FLAGS}\s+{PATH_ARG}"));
    }
    compile(&patterns)
});

fn compile(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("path pattern should be valid"))
        .collect()
}

/// Files a shell command reads and writes, deduplicated in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandPaths {
    pub read: Vec<String>,
    pub write: Vec<String>,
}

/// Extract read/write path arguments from a free-form shell command.
pub fn paths_from_command(command: &str) -> CommandPaths {
    if command.trim().is_empty() {
        return CommandPaths::default();
    }
    CommandPaths {
        read: match_paths(&READ_PATTERNS, command),
        write: match_paths(&WRITE_PATTERNS, command),
    }
}

fn match_paths(patterns: &[Regex], command: &str) -> Vec<String> {
    let mut found = Vec::new();
    for pattern in patterns {
        for caps in pattern.captures_iter(command) {
            let Some(raw) = caps.name("path") else {
                continue;
            };
            let path = normalize_path(raw.as_str());
            if path.is_empty() || path.starts_with('-') || path.starts_with('&') {
                continue;
            }
            if path == "/dev/null" {
                continue;
            }
            found.push(path);
        }
    }
    unique_preserve(found)
}

/// Strip surrounding whitespace, trailing punctuation, then quotes.
pub fn normalize_path(text: &str) -> String {
    text.trim()
        .trim_end_matches([')', '.', ',', ';'])
        .trim_matches(|c| c == '\'' || c == '"')
        .to_string()
}

/// Deduplicate while keeping first occurrences in order.
pub fn unique_preserve<I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// The command line an event refers to, if any.
///
/// Looks at the event itself, then `data` (and `data.request`), then `item`
/// (and command-typed entries of `item.content`).
pub fn command_detail(event: &Event) -> Option<String> {
    let mut candidates: Vec<&Value> = Vec::new();
    push_command_candidates(event.fields(), &mut candidates);
    if let Some(data) = event.data() {
        push_command_candidates(data, &mut candidates);
        if let Some(request) = data.get("request").and_then(Value::as_object) {
            push_command_candidates(request, &mut candidates);
        }
    }
    let mut content_commands = Vec::new();
    if let Some(item) = event.item() {
        push_command_candidates(item, &mut candidates);
        if let Some(entries) = item.get("content").and_then(Value::as_array) {
            for entry in entries.iter().filter_map(Value::as_object) {
                let is_command = matches!(
                    entry.get("type").and_then(Value::as_str),
                    Some("command" | "command_execution")
                );
                if !is_command {
                    continue;
                }
                if let Some(text) =
                    non_empty_str(entry, "text").or_else(|| non_empty_str(entry, "content"))
                {
                    content_commands.push(text.to_string());
                }
            }
        }
    }

    for candidate in candidates {
        match candidate {
            Value::String(text) if !text.trim().is_empty() => {
                return Some(truncate(text.trim(), COMMAND_DISPLAY_LIMIT));
            }
            Value::Array(parts) => {
                let parts: Vec<String> = parts
                    .iter()
                    .map(value_text)
                    .filter(|part| !part.trim().is_empty())
                    .collect();
                if !parts.is_empty() {
                    return Some(truncate(&parts.join(" "), COMMAND_DISPLAY_LIMIT));
                }
            }
            _ => {}
        }
    }
    content_commands
        .into_iter()
        .next()
        .map(|text| truncate(&text, COMMAND_DISPLAY_LIMIT))
}

fn push_command_candidates<'a>(map: &'a Map<String, Value>, out: &mut Vec<&'a Value>) {
    out.extend(COMMAND_KEYS.iter().filter_map(|key| map.get(*key)));
}

/// `status` and `exit=<code>` pulled from `item`, falling back to `data`.
pub fn command_status(event: &Event) -> Option<String> {
    let mut status: Option<String> = None;
    let mut exit_code: Option<String> = None;
    for source in [event.item(), event.data()].into_iter().flatten() {
        if status.is_none() {
            status = source
                .get("status")
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());
        }
        if exit_code.is_none() {
            exit_code = source
                .get("exit_code")
                .filter(|v| !v.is_null())
                .map(value_text);
        }
    }

    let mut parts = Vec::new();
    if let Some(status) = status {
        parts.push(status);
    }
    if let Some(code) = exit_code {
        parts.push(format!("exit={code}"));
    }
    (!parts.is_empty()).then(|| parts.join(" "))
}

/// File paths named directly on an event (`path`/`file`/`filename` fields).
pub fn paths_from_event(event: &Event) -> Vec<String> {
    let mut paths = Vec::new();
    for source in [Some(event.fields()), event.data(), event.item()]
        .into_iter()
        .flatten()
    {
        for key in PATH_KEYS {
            if let Some(value) = non_empty_str(source, key) {
                paths.push(normalize_path(value));
            }
        }
    }
    if let Some(entries) = event
        .item()
        .and_then(|item| item.get("content"))
        .and_then(Value::as_array)
    {
        for entry in entries.iter().filter_map(Value::as_object) {
            if let Some(value) = non_empty_str(entry, "path").or_else(|| non_empty_str(entry, "file"))
            {
                paths.push(normalize_path(value));
            }
        }
    }
    unique_preserve(paths.into_iter().filter(|p| !p.is_empty()))
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: Value) -> Event {
        Event::from_value(value).expect("object event")
    }

    #[test]
    fn powershell_verbs_split_into_read_and_write() {
        let paths = paths_from_command(
            "Get-Content -Path 'src/main.rs'; Set-Content notes.md -Value x; Remove-Item \"old.txt\"",
        );
        assert_eq!(paths.read, vec!["src/main.rs"]);
        assert_eq!(paths.write, vec!["notes.md", "old.txt"]);
    }

    #[test]
    fn posix_verbs_skip_flags_and_redirect_targets() {
        let paths = paths_from_command("cat -n src/lib.rs | tee out.log && head -n 20 README.md > summary.txt 2>&1");
        assert_eq!(paths.read, vec!["src/lib.rs", "README.md"]);
        assert_eq!(paths.write, vec!["summary.txt", "out.log"]);
    }

    #[test]
    fn duplicate_paths_are_reported_once() {
        let paths = paths_from_command("cat a.txt; cat a.txt; touch b.txt; rm b.txt");
        assert_eq!(paths.read, vec!["a.txt"]);
        assert_eq!(paths.write, vec!["b.txt"]);
    }

    #[test]
    fn malformed_commands_yield_nothing() {
        assert_eq!(paths_from_command(""), CommandPaths::default());
        assert_eq!(paths_from_command("cargo test --all"), CommandPaths::default());
        assert_eq!(paths_from_command("echo hi >/dev/null"), CommandPaths::default());
    }

    #[test]
    fn normalize_strips_quotes_and_trailing_punctuation() {
        assert_eq!(normalize_path("  'src/a.rs'), "), "src/a.rs");
        assert_eq!(normalize_path("\"b.md\";"), "b.md");
    }

    #[test]
    fn command_detail_prefers_top_level_then_nested() {
        let ev = event(json!({"type": "exec", "command": "ls -la"}));
        assert_eq!(command_detail(&ev).as_deref(), Some("ls -la"));

        let ev = event(json!({"data": {"request": {"argv": ["git", "status", ""]}}}));
        assert_eq!(command_detail(&ev).as_deref(), Some("git status"));

        let ev = event(json!({"item": {"type": "command_execution", "command": "bash -lc 'cargo test'"}}));
        assert_eq!(command_detail(&ev).as_deref(), Some("bash -lc 'cargo test'"));

        let ev = event(json!({"item": {"content": [{"type": "command", "text": "make"}]}}));
        assert_eq!(command_detail(&ev).as_deref(), Some("make"));

        assert_eq!(command_detail(&event(json!({"type": "turn.started"}))), None);
    }

    #[test]
    fn command_detail_is_truncated() {
        let long = "x".repeat(300);
        let ev = event(json!({"command": long}));
        let detail = command_detail(&ev).expect("detail");
        assert_eq!(detail.chars().count(), COMMAND_DISPLAY_LIMIT + 3);
    }

    #[test]
    fn command_status_combines_status_and_exit_code() {
        let ev = event(json!({"item": {"status": "completed", "exit_code": 0}}));
        assert_eq!(command_status(&ev).as_deref(), Some("completed exit=0"));

        let ev = event(json!({"item": {"exit_code": null}, "data": {"status": "failed", "exit_code": 2}}));
        assert_eq!(command_status(&ev).as_deref(), Some("failed exit=2"));

        assert_eq!(command_status(&event(json!({"type": "x"}))), None);
    }

    #[test]
    fn paths_from_event_reads_all_levels() {
        let ev = event(json!({
            "path": "a.rs",
            "data": {"file": "b.rs"},
            "item": {"filename": "a.rs", "content": [{"path": "c.rs"}, {"file": "'d.rs'"}]}
        }));
        assert_eq!(paths_from_event(&ev), vec!["a.rs", "b.rs", "c.rs", "d.rs"]);
    }
}
