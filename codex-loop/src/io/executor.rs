//! Executor abstraction for agent invocation.
//!
//! The [`Executor`] trait decouples orchestration from the actual agent
//! backend (currently `codex exec`). Tests use scripted executors that return
//! predetermined responses without spawning processes.

use std::env;
use std::ffi::{OsStr, OsString};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::classifier::{format_event, is_output_done, stream_text, strip_ansi};
use crate::core::event::{Event, EventCollector};
use crate::core::rate_limit::{RateLimitWatch, effective_exit_code, is_ignorable};
use crate::io::config::LoopConfig;
use crate::io::paths::LoopPaths;
use crate::io::process::{run_silent, run_streaming};
use crate::io::run_log::{Level, RunLog};

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Working directory for the agent process.
    pub workdir: PathBuf,
    /// Prompt text fed to the agent's stdin.
    pub prompt: String,
    /// Artifact the agent writes its final answer to.
    pub output_path: PathBuf,
}

/// Result of one invocation. A nonzero exit is a value here, not an `Err`.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// Exit code after the rate-limit override.
    pub exit_code: i32,
    /// Final answer; empty when the agent produced none.
    pub final_text: String,
    /// Decoded events, in arrival order (event mode only).
    pub events: Vec<Event>,
    /// Sleep taken after a detected rate limit.
    pub backoff: Option<Duration>,
}

/// Abstraction over agent execution backends.
pub trait Executor {
    /// Run the agent once, streaming progress into `log`.
    ///
    /// Returns `Err` only when the agent could not be run at all.
    fn exec(&self, request: &ExecRequest, log: &RunLog) -> Result<ExecOutput>;
}

/// How the agent's output streams are consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Stdout is a JSONL event stream.
    Events,
    /// Stdout is plain text.
    Plain,
    /// Output is discarded; only the exit code and artifact matter.
    Silent,
}

/// Agent flags and streaming options shared by every invocation of a session.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Resolved agent binary or launcher script.
    pub program: PathBuf,
    pub full_auto: bool,
    pub dangerous: bool,
    pub profile: Option<String>,
    pub json_events: bool,
    pub show_output: bool,
    pub resume_last: bool,
    pub heartbeat: Option<Duration>,
    /// Raw event mirror.
    pub json_log: Option<PathBuf>,
}

impl AgentSettings {
    pub fn from_config(cfg: &LoopConfig, paths: &LoopPaths, program: PathBuf) -> Self {
        let profile = cfg.agent.profile.trim();
        Self {
            program,
            full_auto: cfg.agent.full_auto,
            dangerous: cfg.agent.dangerous,
            profile: (!profile.is_empty()).then(|| profile.to_string()),
            json_events: cfg.json_enabled() && !cfg.agent.resume_last,
            show_output: cfg.agent.show_output,
            resume_last: cfg.agent.resume_last,
            heartbeat: (cfg.heartbeat_seconds > 0)
                .then(|| Duration::from_secs(cfg.heartbeat_seconds)),
            json_log: paths.json_log.clone(),
        }
    }

    pub fn mode(&self) -> OutputMode {
        if self.json_events && !self.resume_last {
            OutputMode::Events
        } else if self.show_output || self.resume_last {
            OutputMode::Plain
        } else {
            OutputMode::Silent
        }
    }
}

/// Agent command-line arguments, without the program itself.
///
/// Resume mode continues the previous session and accepts none of the
/// output, sandbox or format flags.
pub fn codex_args(settings: &AgentSettings, request: &ExecRequest) -> Vec<OsString> {
    if settings.resume_last {
        return ["exec", "resume", "--last", "-"]
            .into_iter()
            .map(OsString::from)
            .collect();
    }
    let mut args: Vec<OsString> = vec![
        "exec".into(),
        "--cd".into(),
        request.workdir.clone().into_os_string(),
        "--output-last-message".into(),
        request.output_path.clone().into_os_string(),
        "--color".into(),
        "never".into(),
    ];
    if settings.dangerous {
        args.push("--dangerously-bypass-approvals-and-sandbox".into());
    } else if settings.full_auto {
        args.push("--full-auto".into());
    }
    if let Some(profile) = &settings.profile {
        args.push("--profile".into());
        args.push(profile.into());
    }
    if settings.mode() == OutputMode::Events {
        args.push("--json".into());
    }
    args.push("-".into());
    args
}

/// Command that runs `program`, going through a shell launcher for scripts.
pub fn launcher_command(program: &Path) -> Command {
    let ext = program
        .extension()
        .and_then(OsStr::to_str)
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("ps1") => {
            let mut cmd = Command::new("powershell");
            cmd.args(["-NoProfile", "-ExecutionPolicy", "Bypass", "-File"])
                .arg(program);
            cmd
        }
        Some("cmd" | "bat") => {
            let mut cmd = Command::new("cmd.exe");
            cmd.arg("/c").arg(program);
            cmd
        }
        _ => Command::new(program),
    }
}

/// Resolve the agent program: explicit paths must exist, bare names are looked up on `PATH`.
pub fn resolve_program(program: &str) -> Result<PathBuf> {
    let program = program.trim();
    let path = Path::new(program);
    if path.is_absolute() || path.components().count() > 1 {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(anyhow!("agent program {} not found", path.display()));
    }
    let path_var = env::var_os("PATH").ok_or_else(|| anyhow!("PATH is not set"))?;
    find_in_path(program, &path_var)
        .ok_or_else(|| anyhow!("agent program `{program}` not found on PATH"))
}

/// First `dir/name` (plus Windows launcher suffixes) that is a file.
pub fn find_in_path(name: &str, path_var: &OsStr) -> Option<PathBuf> {
    let suffixes: &[&str] = if cfg!(windows) {
        &["", ".exe", ".cmd", ".bat", ".ps1"]
    } else {
        &[""]
    };
    env::split_paths(path_var)
        .filter(|dir| !dir.as_os_str().is_empty())
        .find_map(|dir| {
            suffixes
                .iter()
                .map(|suffix| dir.join(format!("{name}{suffix}")))
                .find(|candidate| candidate.is_file())
        })
}

/// Executor that spawns the `codex` CLI.
pub struct CodexExecutor {
    settings: AgentSettings,
    sleep: fn(Duration),
}

impl CodexExecutor {
    pub fn new(settings: AgentSettings) -> Self {
        Self {
            settings,
            sleep: thread::sleep,
        }
    }

    /// Replace the rate-limit sleep.
    pub fn with_sleep(mut self, sleep: fn(Duration)) -> Self {
        self.sleep = sleep;
        self
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    fn command(&self, request: &ExecRequest) -> Command {
        let mut cmd = launcher_command(&self.settings.program);
        cmd.args(codex_args(&self.settings, request))
            .current_dir(&request.workdir);
        cmd
    }
}

impl Executor for CodexExecutor {
    #[instrument(skip_all, fields(mode = ?self.settings.mode(), output = %request.output_path.display()))]
    fn exec(&self, request: &ExecRequest, log: &RunLog) -> Result<ExecOutput> {
        info!(workdir = %request.workdir.display(), "starting codex exec");
        prepare_artifact(&request.output_path)?;

        let mode = self.settings.mode();
        let cmd = self.command(request);
        let heartbeat = self.settings.heartbeat;
        let on_heartbeat = |elapsed: Duration| {
            println!("...running ({}s heartbeat)", elapsed.as_secs());
        };

        let mut sink = StdoutSink::new(mode, &self.settings, log);
        let mut watch = RateLimitWatch::new();
        let status = match mode {
            OutputMode::Silent => run_silent(cmd, request.prompt.as_bytes(), heartbeat, on_heartbeat),
            OutputMode::Events | OutputMode::Plain => run_streaming(
                cmd,
                request.prompt.as_bytes(),
                |line| sink.on_line(line),
                |line| on_stderr_line(line, &mut watch, log),
                heartbeat,
                on_heartbeat,
            ),
        }
        .context("run codex exec")?;
        sink.finish();

        let raw_exit = status.code().unwrap_or(-1);
        let backoff = watch.backoff();
        if let Some(wait) = backoff {
            let message = format!("Rate limit hit. Sleeping {}s before retry.", wait.as_secs());
            println!("{} {message}", Level::Info.prefix());
            log.line(&format!("{} {message}", Level::Info.prefix()));
            (self.sleep)(wait);
        }
        let exit_code = effective_exit_code(raw_exit, backoff);
        if exit_code != 0 {
            warn!(exit_code, "codex exec failed");
        }

        let final_text = if self.settings.resume_last {
            let text = sink.final_parts.join("\n");
            if let Err(err) = fs::write(&request.output_path, &text) {
                warn!(err = %err, path = %request.output_path.display(), "failed to write resumed response");
            }
            text
        } else {
            read_artifact(&request.output_path)
        };

        if sink.events.overflow() > 0 {
            debug!(dropped = sink.events.overflow(), "event collector full");
        }
        debug!(exit_code, raw_exit, "codex exec finished");
        Ok(ExecOutput {
            exit_code,
            final_text,
            events: sink.events.into_events(),
            backoff,
        })
    }
}

/// Remove a stale artifact so a failed run cannot be mistaken for a fresh answer.
fn prepare_artifact(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create output dir {}", parent.display()))?;
    }
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove stale output {}", path.display())),
    }
}

/// Artifact contents; missing or unreadable reads as empty.
fn read_artifact(path: &Path) -> String {
    match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
        Err(err) => {
            warn!(err = %err, path = %path.display(), "failed to read agent output");
            String::new()
        }
    }
}

fn on_stderr_line(line: &str, watch: &mut RateLimitWatch, log: &RunLog) {
    let text = strip_ansi(line.trim_end());
    if text.trim().is_empty() {
        return;
    }
    watch.observe(&text);
    let level = if is_ignorable(&text) {
        Level::Info
    } else {
        Level::Error
    };
    let line = format!("{} {text}", level.prefix());
    println!("{line}");
    log.line(&line);
}

/// Per-invocation stdout consumer.
struct StdoutSink<'a> {
    mode: OutputMode,
    show_output: bool,
    resume_last: bool,
    log: &'a RunLog,
    mirror: Option<File>,
    events: EventCollector,
    /// Response text accumulated in resume mode.
    final_parts: Vec<String>,
    /// A streamed message is open and still needs its line ending.
    streaming: bool,
}

impl<'a> StdoutSink<'a> {
    fn new(mode: OutputMode, settings: &AgentSettings, log: &'a RunLog) -> Self {
        let mirror = settings.json_log.as_deref().and_then(open_mirror);
        Self {
            mode,
            show_output: settings.show_output,
            resume_last: settings.resume_last,
            log,
            mirror,
            events: EventCollector::new(),
            final_parts: Vec::new(),
            streaming: false,
        }
    }

    fn on_line(&mut self, line: &str) {
        if let Some(mirror) = self.mirror.as_mut()
            && let Err(err) = writeln!(mirror, "{line}")
        {
            warn!(err = %err, "failed to mirror event line");
            self.mirror = None;
        }
        match self.mode {
            OutputMode::Events => self.on_event_line(line),
            OutputMode::Plain | OutputMode::Silent => self.on_plain_line(line),
        }
    }

    fn on_plain_line(&mut self, line: &str) {
        let line = strip_ansi(line);
        if self.resume_last {
            self.final_parts.push(line.clone());
        }
        if self.show_output {
            println!("{line}");
        }
        self.log.line(&line);
    }

    fn on_event_line(&mut self, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }
        let Some(event) = Event::decode(trimmed) else {
            self.close_stream();
            println!("{line}");
            self.log.line(line);
            return;
        };

        if let Some(text) = stream_text(&event) {
            if self.show_output {
                print!("{text}");
                let _ = io::stdout().flush();
            }
            self.log.append(&text);
            self.streaming = !text.ends_with('\n');
            if is_output_done(&event) {
                self.close_stream();
            }
        } else {
            let formatted = format_event(&event);
            self.close_stream();
            println!("{formatted}");
            self.log.event(formatted.category, &formatted.text);
        }
        self.events.push(event);
    }

    fn close_stream(&mut self) {
        if !self.streaming {
            return;
        }
        if self.show_output {
            println!();
        }
        self.log.append("\n");
        self.streaming = false;
    }

    fn finish(&mut self) {
        self.close_stream();
        if let Some(mirror) = self.mirror.as_mut()
            && let Err(err) = mirror.flush()
        {
            warn!(err = %err, "failed to flush event mirror");
        }
    }
}

fn open_mirror(path: &Path) -> Option<File> {
    if let Some(parent) = path.parent()
        && let Err(err) = fs::create_dir_all(parent)
    {
        warn!(err = %err, path = %parent.display(), "failed to create event mirror dir");
        return None;
    }
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(file),
        Err(err) => {
            warn!(err = %err, path = %path.display(), "failed to open event mirror");
            None
        }
    }
}
