//! Port guard: inspect reserved ports before each round and optionally free them.

use std::net::TcpListener;
use std::process::Command;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::core::ports::{
    PortOwner, PortPolicy, PortReading, PortStatus, kill_candidates, plan_port_policy,
    port_summary,
};
use crate::io::config::PortConfig;
use crate::io::process::run_command_with_timeout;
use crate::io::run_log::RunLog;

const INSPECT_TIMEOUT: Duration = Duration::from_secs(5);

/// OS capability used by the guard.
pub trait PortInspector {
    fn status(&self, port: u16) -> PortStatus;

    /// Ask the process to exit. Returns whether the request succeeded.
    fn terminate(&self, pid: u32) -> bool;
}

/// Inspector backed by `lsof`/`kill` on Unix and `netstat`/`tasklist`/`taskkill` on Windows.
///
/// When the tools are unavailable a port still reads as busy if it cannot be
/// bound locally, just without a known owner.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPortInspector;

impl PortInspector for SystemPortInspector {
    fn status(&self, port: u16) -> PortStatus {
        if let Some(owner) = find_owner(port) {
            return PortStatus::InUse(Some(owner));
        }
        if can_bind(port) {
            PortStatus::Free
        } else {
            PortStatus::InUse(None)
        }
    }

    fn terminate(&self, pid: u32) -> bool {
        let cmd = if cfg!(windows) {
            let mut cmd = Command::new("taskkill");
            cmd.args(["/PID", &pid.to_string(), "/F"]);
            cmd
        } else {
            let mut cmd = Command::new("kill");
            cmd.args(["-TERM", &pid.to_string()]);
            cmd
        };
        match run_command_with_timeout(cmd, INSPECT_TIMEOUT) {
            Ok(output) => output.success(),
            Err(err) => {
                warn!(pid, err = %err, "failed to run terminate command");
                false
            }
        }
    }
}

fn can_bind(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

fn find_owner(port: u16) -> Option<PortOwner> {
    if cfg!(windows) {
        let mut cmd = Command::new("netstat");
        cmd.args(["-ano", "-p", "TCP"]);
        let output = capture(cmd)?;
        let pid = parse_netstat(&output, port)?;
        let mut cmd = Command::new("tasklist");
        cmd.args(["/FI", &format!("PID eq {pid}"), "/FO", "CSV", "/NH"]);
        let name = capture(cmd).and_then(|out| parse_tasklist(&out));
        Some(PortOwner { pid, name })
    } else {
        let mut cmd = Command::new("lsof");
        cmd.args(["-nP", &format!("-iTCP:{port}"), "-sTCP:LISTEN", "-Fpc"]);
        parse_lsof(&capture(cmd)?)
    }
}

fn capture(cmd: Command) -> Option<String> {
    match run_command_with_timeout(cmd, INSPECT_TIMEOUT) {
        Ok(output) if !output.timed_out => Some(output.stdout),
        Ok(_) => None,
        Err(err) => {
            debug!(err = %err, "port inspection tool unavailable");
            None
        }
    }
}

/// First process in `lsof -F pc` output (`p<pid>` then `c<command>`).
pub fn parse_lsof(output: &str) -> Option<PortOwner> {
    let mut pid = None;
    let mut name = None;
    for line in output.lines() {
        if let Some(value) = line.strip_prefix('p') {
            if pid.is_some() {
                break;
            }
            pid = value.trim().parse::<u32>().ok();
        } else if let Some(value) = line.strip_prefix('c')
            && pid.is_some()
            && name.is_none()
        {
            let value = value.trim();
            name = (!value.is_empty()).then(|| value.to_string());
        }
    }
    pid.map(|pid| PortOwner { pid, name })
}

/// PID of the process listening on `port` in `netstat -ano` output.
pub fn parse_netstat(output: &str, port: u16) -> Option<u32> {
    let suffix = format!(":{port}");
    output.lines().find_map(|line| {
        let cols: Vec<&str> = line.split_whitespace().collect();
        let [proto, local, _remote, state, pid] = cols.as_slice() else {
            return None;
        };
        (proto.eq_ignore_ascii_case("tcp")
            && local.ends_with(&suffix)
            && state.eq_ignore_ascii_case("listening"))
        .then(|| pid.parse::<u32>().ok())
        .flatten()
    })
}

/// Image name from `tasklist /FO CSV /NH` output.
pub fn parse_tasklist(output: &str) -> Option<String> {
    let line = output.lines().find(|line| line.starts_with('"'))?;
    let name = line.split("\",\"").next()?.trim_matches('"').trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// What the guard found and decided for one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortReport {
    pub readings: Vec<PortReading>,
    /// `- P: status` lines for the prompt.
    pub summary: String,
    pub policy: PortPolicy,
}

impl PortReport {
    pub fn policy_note(&self) -> String {
        self.policy.note()
    }
}

pub fn inspect_ports<I: PortInspector + ?Sized>(inspector: &I, ports: &[u16]) -> Vec<PortReading> {
    ports
        .iter()
        .map(|&port| PortReading {
            port,
            status: inspector.status(port),
        })
        .collect()
}

/// Free allow-listed ports when enabled, then inspect and plan the policy.
///
/// Kills happen first so the summary reflects the ports the agent will see.
/// Only owners named on the allow-list are ever terminated, never this process.
#[instrument(skip_all, fields(ports = ?cfg.reserved, kill = cfg.kill_on_conflict))]
pub fn prepare_ports<I: PortInspector + ?Sized>(
    inspector: &I,
    cfg: &PortConfig,
    log: &RunLog,
) -> PortReport {
    if cfg.kill_on_conflict {
        let before = inspect_ports(inspector, &cfg.reserved);
        for (port, pid) in kill_candidates(&before, &cfg.allow_kill, std::process::id()) {
            if inspector.terminate(pid) {
                log.info(&format!("Killed process on port {port}."));
            } else {
                log.warn(&format!("Failed to stop PID {pid} on port {port}."));
            }
        }
    }

    let readings = inspect_ports(inspector, &cfg.reserved);
    let summary = port_summary(&readings);
    let policy = plan_port_policy(&cfg.policy, &readings);
    log.line(&policy.note());
    debug!(busy = ?policy.busy, "port policy planned");
    PortReport {
        readings,
        summary,
        policy,
    }
}
