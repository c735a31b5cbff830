//! Backlog parsing and round-robin target selection.
//!
//! A plan may carry two sections, `## Backlog A:` and `## Backlog B:`. Each
//! item is a `N) text` line, optionally followed by continuation lines that are
//! indented or start with `-`. Items from A come before items from B.

use std::sync::LazyLock;

use regex::Regex;

pub const BACKLOG_HEADERS: [&str; 2] = ["## Backlog A:", "## Backlog B:"];

static ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)\)\s+(.+)$").expect("backlog item regex"));

/// The backlog item chosen for one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacklogTarget {
    /// Position across both sections; persisted so the next run advances.
    pub index: i64,
    /// Item text, empty when the plan has no backlog.
    pub item: String,
}

impl BacklogTarget {
    pub fn is_empty(&self) -> bool {
        self.item.is_empty()
    }
}

/// Lines below the first header starting with `header`, up to the next `## ` heading.
pub fn section_lines<'a>(plan: &'a str, header: &str) -> Vec<&'a str> {
    let mut lines = plan.lines();
    if !lines.by_ref().any(|line| line.trim().starts_with(header)) {
        return Vec::new();
    }
    lines
        .take_while(|line| !line.trim().starts_with("## "))
        .map(str::trim_end)
        .collect()
}

/// Group section lines into items, attaching continuation lines to the item above.
pub fn parse_backlog_items(lines: &[&str]) -> Vec<String> {
    let mut items = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for line in lines {
        if ITEM_RE.is_match(line) {
            flush(&mut current, &mut items);
            current.push(line.trim().to_string());
            continue;
        }
        if current.is_empty() {
            continue;
        }
        let stripped = line.trim();
        if stripped.starts_with('-') || line.starts_with(' ') || line.starts_with('\t') {
            current.push(stripped.to_string());
        }
    }
    flush(&mut current, &mut items);
    items
}

fn flush(current: &mut Vec<String>, items: &mut Vec<String>) {
    if current.is_empty() {
        return;
    }
    items.push(current.join("\n").trim().to_string());
    current.clear();
}

/// All backlog items of a plan, section A first.
pub fn backlog_items(plan: &str) -> Vec<String> {
    BACKLOG_HEADERS
        .iter()
        .flat_map(|header| parse_backlog_items(&section_lines(plan, header)))
        .collect()
}

/// The item after `last_index`, wrapping around. A plan without a backlog
/// keeps `last_index` and yields an empty item.
pub fn select_backlog_target(plan: &str, last_index: i64) -> BacklogTarget {
    let items = backlog_items(plan);
    if items.is_empty() {
        return BacklogTarget {
            index: last_index,
            item: String::new(),
        };
    }
    let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
    let index = last_index.saturating_add(1).rem_euclid(len);
    let item = usize::try_from(index)
        .ok()
        .and_then(|i| items.get(i).cloned())
        .unwrap_or_default();
    BacklogTarget { index, item }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = "\
# Plan

## Backlog A:
1) Write docs
   - cover the CLI
2) Add tests

## Backlog B:
1) Refactor executor
- keep the trait
stray line

## Notes
3) not a backlog item
";

    #[test]
    fn items_span_both_sections_with_continuations() {
        let items = backlog_items(PLAN);
        assert_eq!(
            items,
            vec![
                "1) Write docs\n- cover the CLI",
                "2) Add tests",
                "1) Refactor executor\n- keep the trait",
            ]
        );
    }

    #[test]
    fn selection_is_round_robin() {
        let mut last = -1;
        let mut seen = Vec::new();
        for _ in 0..6 {
            let target = select_backlog_target(PLAN, last);
            seen.push(target.index);
            last = target.index;
        }
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn stale_index_wraps_into_range() {
        let target = select_backlog_target(PLAN, 41);
        assert_eq!(target.index, 0);
        assert_eq!(target.item, "1) Write docs\n- cover the CLI");
    }

    #[test]
    fn missing_backlog_keeps_index() {
        let target = select_backlog_target("# Plan\nNothing here\n", 4);
        assert_eq!(target.index, 4);
        assert!(target.is_empty());
    }

    #[test]
    fn single_item_section() {
        let target = select_backlog_target("## Backlog A:\n1) Add tests\n", -1);
        assert_eq!(target, BacklogTarget { index: 0, item: "1) Add tests".into() });
    }
}
