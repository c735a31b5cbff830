//! Test-only helpers: a scripted agent, a fake port inspector and a temp workspace.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::event::Event;
use crate::core::ports::{PortOwner, PortStatus};
use crate::core::rate_limit::{RateLimitWatch, effective_exit_code};
use crate::io::config::LoopConfig;
use crate::io::executor::{ExecOutput, ExecRequest, Executor};
use crate::io::paths::LoopPaths;
use crate::io::ports::PortInspector;
use crate::io::run_log::RunLog;
use crate::iteration::RunState;

/// One canned agent invocation.
#[derive(Debug, Clone, Default)]
pub struct ScriptedReply {
    pub exit_code: i32,
    /// Written to the request's output artifact and returned as the final text.
    pub text: String,
    pub events: Vec<Event>,
    /// Stderr lines; run through the same rate-limit policy as the real driver.
    pub diagnostics: Vec<String>,
}

impl ScriptedReply {
    pub fn ok(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Self::default()
        }
    }

    pub fn failed(exit_code: i32, text: &str) -> Self {
        Self {
            exit_code,
            text: text.to_string(),
            ..Self::default()
        }
    }

    pub fn with_events(mut self, events: Vec<Event>) -> Self {
        self.events = events;
        self
    }

    pub fn with_diagnostics(mut self, lines: &[&str]) -> Self {
        self.diagnostics = lines.iter().map(|line| line.to_string()).collect();
        self
    }
}

/// Executor that replays [`ScriptedReply`] values in order and records every request.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    replies: RefCell<VecDeque<ScriptedReply>>,
    requests: RefCell<Vec<ExecRequest>>,
}

impl ScriptedExecutor {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ExecRequest> {
        self.requests.borrow().clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .borrow()
            .iter()
            .map(|request| request.prompt.clone())
            .collect()
    }

    /// Panics if any scripted reply was left unused.
    pub fn assert_drained(&self) {
        let left = self.replies.borrow().len();
        assert_eq!(left, 0, "{left} scripted replies were not consumed");
    }
}

impl Executor for ScriptedExecutor {
    fn exec(&self, request: &ExecRequest, _log: &RunLog) -> Result<ExecOutput> {
        self.requests.borrow_mut().push(request.clone());
        let reply = self
            .replies
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted executor has no reply left"))?;
        if let Some(parent) = request.output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&request.output_path, &reply.text)
            .with_context(|| format!("write {}", request.output_path.display()))?;
        let mut watch = RateLimitWatch::new();
        for line in &reply.diagnostics {
            watch.observe(line);
        }
        let backoff = watch.backoff();
        Ok(ExecOutput {
            exit_code: effective_exit_code(reply.exit_code, backoff),
            final_text: reply.text,
            events: reply.events,
            backoff,
        })
    }
}

/// Port inspector over a fixed table; terminated owners free their port.
#[derive(Debug, Default)]
pub struct FakePortInspector {
    busy: RefCell<HashMap<u16, PortOwner>>,
    terminated: RefCell<Vec<u32>>,
}

impl FakePortInspector {
    pub fn free() -> Self {
        Self::default()
    }

    pub fn with_owner(self, port: u16, pid: u32, name: &str) -> Self {
        self.busy.borrow_mut().insert(
            port,
            PortOwner {
                pid,
                name: Some(name.to_string()),
            },
        );
        self
    }

    pub fn terminated(&self) -> Vec<u32> {
        self.terminated.borrow().clone()
    }
}

impl PortInspector for FakePortInspector {
    fn status(&self, port: u16) -> PortStatus {
        match self.busy.borrow().get(&port) {
            Some(owner) => PortStatus::InUse(Some(owner.clone())),
            None => PortStatus::Free,
        }
    }

    fn terminate(&self, pid: u32) -> bool {
        self.terminated.borrow_mut().push(pid);
        self.busy.borrow_mut().retain(|_, owner| owner.pid != pid);
        true
    }
}

/// Temporary workspace with a quiet default config (no heartbeat).
pub struct TestWorkspace {
    dir: TempDir,
    pub cfg: LoopConfig,
    pub paths: LoopPaths,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        Self::with_config(LoopConfig {
            heartbeat_seconds: 0,
            ..LoopConfig::default()
        })
    }

    pub fn with_config(cfg: LoopConfig) -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp workspace")?;
        let paths = LoopPaths::new(dir.path(), &cfg);
        Ok(Self { dir, cfg, paths })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_plan(&self, plan: &str) -> Result<()> {
        fs::write(&self.paths.plan, plan)
            .with_context(|| format!("write {}", self.paths.plan.display()))
    }

    pub fn open_log(&self) -> Result<RunLog> {
        RunLog::open(&self.paths.log)
    }

    /// Run log contents; empty when nothing was written yet.
    pub fn read_log(&self) -> String {
        fs::read_to_string(&self.paths.log).unwrap_or_default()
    }

    pub fn state(&self) -> RunState {
        RunState::new(self.cfg.clone(), self.paths.clone())
    }
}
