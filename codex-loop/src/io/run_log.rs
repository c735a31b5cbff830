//! Append-only, human-readable run log.
//!
//! Several reader threads write here while one agent invocation is running,
//! so every append takes the file lock for the duration of one write. Write
//! failures are reported through `tracing` and otherwise ignored: losing a
//! log line must never abort a run.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::warn;

use crate::core::classifier::Category;

/// Log severity prefixes for loop-level notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn prefix(self) -> &'static str {
        match self {
            Level::Info => "[INFO]",
            Level::Warn => "[WARN]",
            Level::Error => "[ERROR]",
        }
    }
}

#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
    file: Mutex<File>,
    console: bool,
}

impl RunLog {
    /// Open `path` for appending, creating parent directories as needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create log dir {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open run log {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            console: false,
        })
    }

    /// Also print notes and event lines to stdout.
    pub fn with_console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn console(&self) -> bool {
        self.console
    }

    /// Append raw text.
    pub fn append(&self, text: &str) {
        let Ok(mut file) = self.file.lock() else {
            warn!(path = %self.path.display(), "run log lock poisoned");
            return;
        };
        if let Err(err) = file.write_all(text.as_bytes()).and_then(|()| file.flush()) {
            warn!(path = %self.path.display(), err = %err, "failed to append to run log");
        }
    }

    /// Append `text` followed by a newline.
    pub fn line(&self, text: &str) {
        self.append(&format!("{text}\n"));
    }

    /// Append a prefixed note and echo it when console output is on.
    pub fn note(&self, level: Level, message: &str) {
        let line = format!("{} {message}", level.prefix());
        self.line(&line);
        if self.console {
            println!("{line}");
        }
    }

    pub fn info(&self, message: &str) {
        self.note(Level::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.note(Level::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.note(Level::Error, message);
    }

    /// Append a classified event line (`[LABEL] text`).
    pub fn event(&self, category: Category, text: &str) {
        self.line(&format!("[{category}] {text}"));
    }

    /// Iteration header: `## Run <n> - <timestamp>`.
    pub fn header(&self, index: u32, timestamp: &str) {
        self.append(&format!("\n## Run {index} - {timestamp}\n"));
    }

    /// Section marker such as `### Auto-decision round 1`.
    pub fn section(&self, title: &str) {
        self.append(&format!("\n### {title}\n"));
    }
}
