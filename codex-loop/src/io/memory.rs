//! Run memory: the last-iteration snapshot plus an optional append-only record store.
//!
//! The snapshot (`last_state.json`) is replaced once per iteration and read at
//! the start of the next one. Records mirror snapshots into a store that keeps
//! history; consecutive identical records are collapsed by fingerprint.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use jsonschema::{Validator, validator_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::core::classifier::truncate;
use crate::io::config::{MemoryBackend, write_atomic};

const SNAPSHOT_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/memory_snapshot/v1.schema.json"
));

static SNAPSHOT_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value =
        serde_json::from_str(SNAPSHOT_SCHEMA).expect("snapshot schema should be valid JSON");
    validator_for(&schema).expect("snapshot schema should compile")
});

/// Cap on the free-text field of a store record.
pub const RECORD_TEXT_LIMIT: usize = 4000;

/// Facts derived from the most recent iteration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub last_run_at: String,
    pub last_round_index: u32,
    /// Backlog index picked last time; -1 before any pick.
    pub last_target_index: i64,
    pub last_target: String,
    pub last_summary: String,
    pub last_next_step: String,
    pub last_log_path: String,
    pub last_response_path: String,
    pub last_exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Load the snapshot. A missing file is `Ok(None)`; unreadable or
/// schema-invalid content is an error the caller may downgrade to "absent".
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_snapshot(path: &Path) -> Result<Option<MemorySnapshot>> {
    if !path.exists() {
        debug!("no memory snapshot");
        return Ok(None);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read snapshot {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse snapshot {}", path.display()))?;
    validate_snapshot(&value).with_context(|| format!("validate snapshot {}", path.display()))?;
    let snapshot = serde_json::from_value(value)
        .with_context(|| format!("deserialize snapshot {}", path.display()))?;
    Ok(Some(snapshot))
}

/// Atomically replace the snapshot (temp file + rename).
pub fn write_snapshot(path: &Path, snapshot: &MemorySnapshot) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(snapshot).context("serialize snapshot")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn validate_snapshot(value: &Value) -> Result<()> {
    if SNAPSHOT_VALIDATOR.is_valid(value) {
        return Ok(());
    }
    let messages = SNAPSHOT_VALIDATOR
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect::<Vec<_>>();
    Err(anyhow!(
        "snapshot schema validation failed: {}",
        messages.join("; ")
    ))
}

/// One entry of the record store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryRecord {
    pub created_at: String,
    pub run_index: u32,
    pub target: String,
    pub summary: String,
    pub next_step: String,
    pub error: String,
    pub log_path: String,
    pub response_path: String,
    /// Searchable digest of the record.
    pub text: String,
    pub fingerprint: String,
}

impl MemoryRecord {
    pub fn from_snapshot(snapshot: &MemorySnapshot) -> Self {
        let created_at = snapshot.last_run_at.trim().to_string();
        let summary = snapshot.last_summary.trim().to_string();
        let next_step = snapshot.last_next_step.trim().to_string();
        let target = snapshot.last_target.trim().to_string();
        let error = snapshot
            .last_error
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string();

        let text = [&summary, &next_step, &target, &error]
            .into_iter()
            .filter(|part| !part.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" | ");
        let fingerprint = fingerprint(&[&created_at, &summary, &next_step, &target, &error]);

        Self {
            run_index: snapshot.last_round_index,
            log_path: snapshot.last_log_path.trim().to_string(),
            response_path: snapshot.last_response_path.trim().to_string(),
            text: truncate(&text, RECORD_TEXT_LIMIT),
            fingerprint,
            created_at,
            target,
            summary,
            next_step,
            error,
        }
    }

    /// `- <time> | target: .. | summary: .. | next: .. | error: ..`, skipping empty parts.
    pub fn summary_line(&self) -> Option<String> {
        let mut parts = Vec::new();
        if !self.created_at.is_empty() {
            parts.push(self.created_at.clone());
        }
        for (label, value) in [
            ("target", &self.target),
            ("summary", &self.summary),
            ("next", &self.next_step),
            ("error", &self.error),
        ] {
            if !value.is_empty() {
                parts.push(format!("{label}: {value}"));
            }
        }
        (!parts.is_empty()).then(|| format!("- {}", parts.join(" | ")))
    }
}

/// Hex SHA-256 of the parts joined with `|`.
pub fn fingerprint(parts: &[&str]) -> String {
    hex::encode(Sha256::digest(parts.join("|").as_bytes()))
}

/// Narrow interface to the long-term record store.
pub trait MemoryStore {
    /// Append `record` unless it repeats the most recent one. Returns whether it was written.
    fn append(&self, record: &MemoryRecord) -> Result<bool>;

    /// Up to `limit` most recent records, oldest first.
    fn recent(&self, limit: usize) -> Result<Vec<MemoryRecord>>;
}

/// Record store kept as one JSON object per line.
#[derive(Debug, Clone)]
pub struct JsonlMemoryStore {
    path: PathBuf,
}

impl JsonlMemoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<MemoryRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read memory store {}", self.path.display()))?;
        let mut records = Vec::new();
        for (lineno, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MemoryRecord>(line) {
                Ok(record) => records.push(record),
                Err(err) => debug!(line = lineno + 1, err = %err, "skipping malformed memory record"),
            }
        }
        Ok(records)
    }
}

impl MemoryStore for JsonlMemoryStore {
    fn append(&self, record: &MemoryRecord) -> Result<bool> {
        let last = self.read_all()?.pop();
        if last.is_some_and(|last| last.fingerprint == record.fingerprint) {
            debug!(fingerprint = %record.fingerprint, "duplicate memory record skipped");
            return Ok(false);
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut line = serde_json::to_string(record).context("serialize memory record")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open memory store {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append memory store {}", self.path.display()))?;
        Ok(true)
    }

    fn recent(&self, limit: usize) -> Result<Vec<MemoryRecord>> {
        let mut records = self.read_all()?;
        // Stable sort keeps append order for equal timestamps.
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let skip = records.len().saturating_sub(limit);
        Ok(records.split_off(skip))
    }
}

/// Text block describing previous runs, embedded in every round prompt.
///
/// `disabled` when memory is off, `none` when there is nothing to report,
/// otherwise capped at `max_chars` characters.
pub fn memory_summary(
    backend: MemoryBackend,
    snapshot: Option<&MemorySnapshot>,
    recent: &[MemoryRecord],
    max_chars: usize,
) -> String {
    if !backend.is_enabled() {
        return "disabled".to_string();
    }
    let mut lines = Vec::new();
    if let Some(snapshot) = snapshot {
        for (key, value) in [
            ("last_run_at", &snapshot.last_run_at),
            ("last_summary", &snapshot.last_summary),
            ("last_next_step", &snapshot.last_next_step),
            ("last_log_path", &snapshot.last_log_path),
        ] {
            if !value.trim().is_empty() {
                lines.push(format!("- {key}: {value}"));
            }
        }
    }
    if backend.uses_store() {
        let record_lines: Vec<String> = recent.iter().filter_map(MemoryRecord::summary_line).collect();
        if !record_lines.is_empty() {
            lines.push("Recent runs:".to_string());
            lines.extend(record_lines);
        }
    }
    if lines.is_empty() {
        return "none".to_string();
    }
    truncate(&lines.join("\n"), max_chars)
}
