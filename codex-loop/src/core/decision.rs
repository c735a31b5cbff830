//! Detection and parsing of multiple-choice prompts in agent responses.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static OPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d{1,2})[\.\)\]:\-\x{3001}]\s+(.+)$").expect("option regex")
});

static QUESTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?\x{FF1F}]").expect("question regex"));

static CJK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x{4e00}-\x{9fff}]").expect("cjk regex"));

static BARE_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(\d{1,2})\s*$").expect("bare number regex"));

static LEADING_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d{1,2})\b").expect("leading number regex"));

static ANY_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})\b").expect("number regex"));

const DECISION_WORDS: [&str; 8] = [
    "choose",
    "select",
    "pick",
    "option",
    "reply with",
    "respond with",
    "which",
    "number",
];

/// choose, option, reply, number, please enter, please pick, which one to enter
const CJK_DECISION_WORDS: [&str; 7] = [
    "\u{9009}\u{62e9}",
    "\u{9009}\u{9879}",
    "\u{56de}\u{590d}",
    "\u{7f16}\u{53f7}",
    "\u{8bf7}\u{8f93}\u{5165}",
    "\u{8bf7}\u{9009}",
    "\u{8fdb}\u{5165}\u{54ea}\u{4e2a}",
];

/// One entry of a numbered list in an agent response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionOption {
    pub number: u32,
    pub text: String,
}

/// Numbered list items (`1. foo`, `2) bar`, `3: baz`, ...) in order of appearance.
pub fn numbered_options(text: &str) -> Vec<DecisionOption> {
    text.lines()
        .filter_map(|line| {
            let caps = OPTION_RE.captures(line)?;
            Some(DecisionOption {
                number: caps[1].parse().ok()?,
                text: caps[2].trim().to_string(),
            })
        })
        .collect()
}

/// Whether `text` carries any decision vocabulary or question punctuation.
pub fn has_decision_cue(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    let lower = text.to_lowercase();
    DECISION_WORDS.iter().any(|word| lower.contains(word))
        || QUESTION_RE.is_match(text)
        || CJK_DECISION_WORDS.iter().any(|word| text.contains(word))
        || CJK_RE.is_match(text)
}

/// A response needs a decision when it lists at least two options and asks for one.
pub fn needs_decision(text: &str) -> bool {
    numbered_options(text).len() >= 2 && has_decision_cue(text)
}

/// Pick the option number out of a helper reply.
///
/// Tried in order, first hit wins: a line holding only a number, a leading
/// number, then the first standalone number anywhere. Returns `None` when the
/// reply has no number or names an option that does not exist.
pub fn parse_decision_number(reply: &str, options: &[DecisionOption]) -> Option<u32> {
    let reply = reply.trim();
    if reply.is_empty() {
        return None;
    }
    let caps = BARE_NUMBER_RE
        .captures(reply)
        .or_else(|| LEADING_NUMBER_RE.captures(reply))
        .or_else(|| ANY_NUMBER_RE.captures(reply))?;
    let number: u32 = caps[1].parse().ok()?;
    options
        .iter()
        .any(|option| option.number == number)
        .then_some(number)
}
