//! Labeled-field extraction from the final agent response.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::classifier::truncate;

/// Length cap for the flattened-response fallback summary.
pub const EXCERPT_LIMIT: usize = 240;

/// Summary used when the response is empty.
pub const NO_OUTPUT: &str = "no output";

static SUMMARY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?im)^\s*(?:summary|change summary|brief summary|\x{6982}\x{8981}|\x{603b}\x{7ed3})\s*[:\x{FF1A}]\s*(.+)$",
        r"(?im)^\s*\*{1,2}(?:summary|\x{603b}\x{7ed3})\*{1,2}\s*[:\x{FF1A}]\s*(.+)$",
    ])
});

static NEXT_STEP_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?im)^\s*(?:next step|next steps|next\s*action|\x{4e0b}\x{4e00}\x{6b65}|\x{540e}\x{7eed}\x{6b65}\x{9aa4})\s*[:\x{FF1A}]\s*(.+)$",
        r"(?im)^\s*\*{1,2}(?:next step|\x{4e0b}\x{4e00}\x{6b65})\*{1,2}\s*[:\x{FF1A}]\s*(.+)$",
    ])
});

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("response field pattern"))
        .collect()
}

fn extract_field(text: &str, patterns: &[Regex]) -> Option<String> {
    patterns.iter().find_map(|re| {
        re.captures(text)
            .map(|caps| caps[1].trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

/// Value of a `Summary:` style line, if the response has one.
pub fn extract_summary(text: &str) -> Option<String> {
    extract_field(text, &SUMMARY_PATTERNS)
}

/// Value of a `Next Step:` style line, if the response has one.
pub fn extract_next_step(text: &str) -> Option<String> {
    extract_field(text, &NEXT_STEP_PATTERNS)
}

/// The response collapsed onto one line and capped at [`EXCERPT_LIMIT`].
pub fn flatten_excerpt(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate(&flat, EXCERPT_LIMIT)
}

/// The labeled summary, else the flattened excerpt, else [`NO_OUTPUT`].
pub fn summary_or_excerpt(text: &str) -> String {
    extract_summary(text).unwrap_or_else(|| {
        let flat = flatten_excerpt(text);
        if flat.is_empty() {
            NO_OUTPUT.to_string()
        } else {
            flat
        }
    })
}
