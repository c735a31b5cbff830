//! Plan file access.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

/// Written when a workspace has no plan yet.
pub const PLAN_TEMPLATE: &str = "\
# PLAN
# Write the next batch of tasks for the agent here.
# Keep scope small; prefer incremental changes with tests.
# Each iteration picks the next backlog item in turn and ends with a
# `Summary:` and `Next Step:` line that the loop remembers.

## Backlog A:
1) Describe the first task here.
   - Optional detail lines are indented or start with `-`.

## Backlog B:
1) Describe code-level follow-ups here.
";

/// Outcome of [`ensure_plan_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanFile {
    Existing,
    /// The template was just written; the user should edit it before running.
    Created,
}

/// Create the plan from the template if it does not exist yet.
pub fn ensure_plan_file(path: &Path) -> Result<PlanFile> {
    if path.exists() {
        return Ok(PlanFile::Existing);
    }
    write_plan_template(path)?;
    Ok(PlanFile::Created)
}

/// Write the template, replacing any existing plan.
pub fn write_plan_template(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    debug!(path = %path.display(), "writing plan template");
    fs::write(path, PLAN_TEMPLATE).with_context(|| format!("write plan {}", path.display()))
}

/// Read the plan fresh from disk.
pub fn read_plan(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read plan {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backlog::backlog_items;

    #[test]
    fn missing_plan_is_created_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("docs/PLAN.md");
        assert_eq!(ensure_plan_file(&path).expect("ensure"), PlanFile::Created);
        assert_eq!(ensure_plan_file(&path).expect("ensure"), PlanFile::Existing);
        assert_eq!(read_plan(&path).expect("read"), PLAN_TEMPLATE);
    }

    #[test]
    fn template_backlog_is_parseable() {
        assert_eq!(backlog_items(PLAN_TEMPLATE).len(), 2);
    }

    #[test]
    fn read_missing_plan_fails_with_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = read_plan(&temp.path().join("PLAN.md")).expect_err("missing");
        assert!(format!("{err:#}").contains("PLAN.md"));
    }
}
