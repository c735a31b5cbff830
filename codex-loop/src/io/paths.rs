//! Resolved filesystem locations for one loop session.

use std::path::{Path, PathBuf};

use crate::io::config::LoopConfig;

/// Snapshot file name inside the memory directory.
pub const SNAPSHOT_FILE: &str = "last_state.json";
/// Append-only record store inside the memory directory.
pub const STORE_FILE: &str = "records.jsonl";

/// Every path the loop reads or writes, made absolute against the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopPaths {
    pub workspace: PathBuf,
    pub plan: PathBuf,
    pub log: PathBuf,
    pub last_message: PathBuf,
    pub decision_message: PathBuf,
    pub repair_message: PathBuf,
    /// Raw event mirror, when configured.
    pub json_log: Option<PathBuf>,
    pub memory_dir: PathBuf,
}

impl LoopPaths {
    pub fn new(workspace: &Path, cfg: &LoopConfig) -> Self {
        let resolve = |value: &str| resolve_in(workspace, value);
        let json_log = cfg.json_log_path.trim();
        Self {
            workspace: workspace.to_path_buf(),
            plan: resolve(&cfg.plan_path),
            log: resolve(&cfg.log_path),
            last_message: resolve(&cfg.last_message_path),
            decision_message: resolve(&cfg.decision_message_path),
            repair_message: resolve(&cfg.repair_message_path),
            json_log: (!json_log.is_empty()).then(|| resolve(json_log)),
            memory_dir: resolve(&cfg.memory.dir),
        }
    }

    pub fn snapshot(&self) -> PathBuf {
        self.memory_dir.join(SNAPSHOT_FILE)
    }

    pub fn store(&self) -> PathBuf {
        self.memory_dir.join(STORE_FILE)
    }
}

/// Absolute paths are kept, relative ones are joined onto `workspace`.
pub fn resolve_in(workspace: &Path, value: &str) -> PathBuf {
    let path = Path::new(value.trim());
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_join_workspace() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = LoopPaths::new(temp.path(), &LoopConfig::default());
        assert_eq!(paths.plan, temp.path().join("PLAN.md"));
        assert_eq!(paths.json_log, None);
        assert_eq!(
            paths.snapshot(),
            temp.path().join(".codex-loop/memory/last_state.json")
        );
        assert_eq!(paths.store(), temp.path().join(".codex-loop/memory/records.jsonl"));
    }

    #[test]
    fn absolute_paths_are_kept() {
        let temp = tempfile::tempdir().expect("tempdir");
        let elsewhere = temp.path().join("logs/events.jsonl");
        let cfg = LoopConfig {
            json_log_path: elsewhere.display().to_string(),
            ..LoopConfig::default()
        };
        let paths = LoopPaths::new(Path::new("/work"), &cfg);
        assert_eq!(paths.json_log, Some(elsewhere));
    }
}
