//! Loop configuration stored under `.codex-loop/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::ports::{DEFAULT_ALLOW_KILL, DEFAULT_RESERVED_PORTS};

/// Config location relative to the workspace.
pub const DEFAULT_CONFIG_PATH: &str = ".codex-loop/config.toml";

/// Loop configuration (TOML).
///
/// Meant to be edited by humans. Missing fields take the defaults below, and
/// CLI flags override individual values after loading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoopConfig {
    /// Plan file, relative to the workspace.
    pub plan_path: String,
    /// Append-only run log.
    pub log_path: String,
    /// Artifact the agent writes its final answer to.
    pub last_message_path: String,
    pub decision_message_path: String,
    pub repair_message_path: String,
    /// Raw event mirror. Non-empty enables event streaming.
    pub json_log_path: String,

    /// Iterations to run; ignored when `forever` is set.
    pub iterations: u32,
    pub forever: bool,
    /// Pause between iterations (skipped after the last one).
    pub delay_seconds: u64,

    pub auto_decide: bool,
    pub decision_rounds: u32,

    pub auto_repair: bool,
    pub repair_rounds: u32,
    pub repair_delay_seconds: u64,

    /// Keep going after an iteration fails instead of stopping the loop.
    pub continue_on_error: bool,
    /// Round-robin over the plan backlog.
    pub auto_pick_target: bool,
    /// Heartbeat interval while the agent runs; 0 disables it.
    pub heartbeat_seconds: u64,

    pub agent: AgentConfig,
    pub memory: MemoryConfig,
    pub ports: PortConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Binary name (resolved through `PATH`) or path.
    pub program: String,
    pub full_auto: bool,
    /// Bypass approvals and sandboxing entirely.
    pub dangerous: bool,
    pub profile: String,
    /// Echo agent output to the console.
    pub show_output: bool,
    pub json_events: bool,
    /// Continue the agent's previous session instead of starting a new one.
    pub resume_last: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: "codex".to_string(),
            full_auto: false,
            dangerous: false,
            profile: String::new(),
            show_output: false,
            json_events: false,
            resume_last: false,
        }
    }
}

/// Where run memory is persisted.
///
/// Every enabled backend keeps the snapshot file, since it also carries the
/// backlog cursor. The store backends additionally append a record per
/// iteration and list recent records in the memory summary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryBackend {
    /// Snapshot file only.
    #[default]
    File,
    /// Snapshot plus the append-only record store.
    Store,
    /// Same as `Store`; kept as a separate spelling for configs that say so.
    Both,
    #[serde(rename = "none", alias = "off", alias = "disabled")]
    Disabled,
}

impl MemoryBackend {
    pub fn uses_store(self) -> bool {
        matches!(self, MemoryBackend::Store | MemoryBackend::Both)
    }

    pub fn is_enabled(self) -> bool {
        self != MemoryBackend::Disabled
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MemoryConfig {
    pub backend: MemoryBackend,
    /// Snapshot and store directory, relative to the workspace.
    pub dir: String,
    /// Cap on the memory summary embedded in prompts.
    pub max_chars: usize,
    /// Store records listed under "Recent runs".
    pub recent_records: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: MemoryBackend::File,
            dir: ".codex-loop/memory".to_string(),
            max_chars: 2000,
            recent_records: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PortConfig {
    pub reserved: Vec<u16>,
    /// `auto`, or one of `none`/`off`/`disabled`/`false`/`0`.
    pub policy: String,
    pub kill_on_conflict: bool,
    /// Process names that may be terminated when `kill_on_conflict` is set.
    pub allow_kill: Vec<String>,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            reserved: DEFAULT_RESERVED_PORTS.to_vec(),
            policy: "auto".to_string(),
            kill_on_conflict: false,
            allow_kill: DEFAULT_ALLOW_KILL.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            plan_path: "PLAN.md".to_string(),
            log_path: "RUNLOG.md".to_string(),
            last_message_path: "LAST_RESPONSE.md".to_string(),
            decision_message_path: "DECISION_RESPONSE.md".to_string(),
            repair_message_path: "REPAIR_RESPONSE.md".to_string(),
            json_log_path: String::new(),
            iterations: 1,
            forever: false,
            delay_seconds: 0,
            auto_decide: true,
            decision_rounds: 3,
            auto_repair: true,
            repair_rounds: 2,
            repair_delay_seconds: 0,
            continue_on_error: false,
            auto_pick_target: true,
            heartbeat_seconds: 20,
            agent: AgentConfig::default(),
            memory: MemoryConfig::default(),
            ports: PortConfig::default(),
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("plan_path", &self.plan_path),
            ("log_path", &self.log_path),
            ("last_message_path", &self.last_message_path),
            ("decision_message_path", &self.decision_message_path),
            ("repair_message_path", &self.repair_message_path),
        ] {
            if value.trim().is_empty() {
                return Err(anyhow!("{name} must not be empty"));
            }
        }
        if !self.forever && self.iterations == 0 {
            return Err(anyhow!("iterations must be > 0 unless forever is set"));
        }
        if self.agent.program.trim().is_empty() {
            return Err(anyhow!("agent.program must not be empty"));
        }
        if self.memory.backend.is_enabled() && self.memory.dir.trim().is_empty() {
            return Err(anyhow!("memory.dir must not be empty when memory is enabled"));
        }
        if self.memory.max_chars == 0 {
            return Err(anyhow!("memory.max_chars must be > 0"));
        }
        if self.ports.reserved.contains(&0) {
            return Err(anyhow!("ports.reserved must not contain port 0"));
        }
        Ok(())
    }

    /// Event streaming is on when requested directly or via a JSONL mirror path.
    pub fn json_enabled(&self) -> bool {
        self.agent.json_events || !self.json_log_path.trim().is_empty()
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `LoopConfig::default()`.
pub fn load_config(path: &Path) -> Result<LoopConfig> {
    if !path.exists() {
        let cfg = LoopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: LoopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &LoopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Write `contents` to a sibling temp file, then rename it over `path`.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, LoopConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".codex-loop/config.toml");
        let mut cfg = LoopConfig::default();
        cfg.memory.backend = MemoryBackend::Both;
        cfg.ports.kill_on_conflict = true;
        write_config(&path, &cfg).expect("write");
        assert!(!path.with_file_name("config.toml.tmp").exists());
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "iterations = 4\n[agent]\njson_events = true\n[memory]\nbackend = \"off\"\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.iterations, 4);
        assert!(cfg.json_enabled());
        assert_eq!(cfg.memory.backend, MemoryBackend::Disabled);
        assert_eq!(cfg.agent.program, "codex");
        assert_eq!(cfg.ports.reserved, vec![1420, 1421]);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "iterations = 0\n").expect("write");
        let err = load_config(&path).expect_err("zero iterations");
        assert!(format!("{err:#}").contains("iterations must be > 0"));

        let mut cfg = LoopConfig::default();
        cfg.agent.program = " ".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn backend_selection_helpers() {
        assert!(MemoryBackend::Both.uses_store() && MemoryBackend::Store.uses_store());
        assert!(!MemoryBackend::File.uses_store());
        assert!(!MemoryBackend::Disabled.is_enabled());
    }
}
