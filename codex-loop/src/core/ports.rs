//! Pure port-guard policy: status rendering, advisory notes, kill eligibility.
//!
//! OS inspection lives in `io::ports`; this module only decides what to say
//! and which owners may be terminated.

use std::fmt;

pub const DEFAULT_RESERVED_PORTS: [u16; 2] = [1420, 1421];

/// Development-tool process names that may be terminated to free a port.
pub const DEFAULT_ALLOW_KILL: [&str; 13] = [
    "node", "node.exe", "npm", "npm.cmd", "pnpm", "pnpm.exe", "pnpm.cmd", "yarn", "yarn.cmd",
    "bun", "bun.exe", "vite", "vite.cmd",
];

/// Policy values that turn the guard off.
const OFF_VALUES: [&str; 5] = ["none", "off", "disabled", "false", "0"];

/// Process listening on a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortOwner {
    pub pid: u32,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortStatus {
    Free,
    /// Busy; the owner is unknown when the OS tools could not name it.
    InUse(Option<PortOwner>),
}

impl PortStatus {
    pub fn is_free(&self) -> bool {
        matches!(self, PortStatus::Free)
    }

    pub fn owner(&self) -> Option<&PortOwner> {
        match self {
            PortStatus::InUse(owner) => owner.as_ref(),
            PortStatus::Free => None,
        }
    }
}

impl fmt::Display for PortStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortStatus::Free => f.write_str("free"),
            PortStatus::InUse(None) => f.write_str("in use"),
            PortStatus::InUse(Some(PortOwner {
                pid,
                name: Some(name),
            })) => write!(f, "in use by {name} (PID {pid})"),
            PortStatus::InUse(Some(PortOwner { pid, name: None })) => {
                write!(f, "in use (PID {pid})")
            }
        }
    }
}

/// Status of one reserved port at inspection time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortReading {
    pub port: u16,
    pub status: PortStatus,
}

/// One `- P: status` line per reserved port.
pub fn port_summary(readings: &[PortReading]) -> String {
    readings
        .iter()
        .map(|reading| format!("- {}: {}", reading.port, reading.status))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Outcome of applying the configured policy to a set of readings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortPolicy {
    /// Normalized policy name.
    pub policy: String,
    pub busy: Vec<u16>,
    /// Advisory lines injected into the prompt.
    pub notes: Vec<String>,
}

impl PortPolicy {
    /// Prompt text for the policy: a header line followed by any notes.
    pub fn note(&self) -> String {
        let mut lines = vec![format!("Port policy: {}", self.policy)];
        lines.extend(self.notes.iter().cloned());
        lines.join("\n")
    }
}

pub fn policy_disabled(policy: &str) -> bool {
    OFF_VALUES.contains(&policy.trim().to_lowercase().as_str())
}

/// Decide which reserved ports are busy and what to tell the agent about them.
///
/// A disabled policy, or no busy ports, yields no notes.
pub fn plan_port_policy(policy: &str, readings: &[PortReading]) -> PortPolicy {
    let normalized = match policy.trim().to_lowercase() {
        empty if empty.is_empty() => "auto".to_string(),
        other => other,
    };
    if policy_disabled(&normalized) {
        return PortPolicy {
            policy: normalized,
            busy: Vec::new(),
            notes: Vec::new(),
        };
    }

    let busy: Vec<u16> = readings
        .iter()
        .filter(|reading| !reading.status.is_free())
        .map(|reading| reading.port)
        .collect();
    let mut notes = Vec::new();
    if !busy.is_empty() {
        let list = busy
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        notes.push(format!("- Dev ports in use: {list}"));
        notes.push(
            "- A dev server is probably already running; do not start a second one.".to_string(),
        );
        notes.push(
            "- Prefer short, non-blocking commands over long-running servers.".to_string(),
        );
        notes.push(
            "- Stop the existing process, or rerun with --kill-on-port-conflict to replace it."
                .to_string(),
        );
    }
    PortPolicy {
        policy: normalized,
        busy,
        notes,
    }
}

/// Whether `name` is on the allow-list (case-insensitive). Unknown names never are.
pub fn may_terminate<S: AsRef<str>>(name: Option<&str>, allow_list: &[S]) -> bool {
    name.is_some_and(|name| {
        allow_list
            .iter()
            .any(|allowed| allowed.as_ref().eq_ignore_ascii_case(name))
    })
}

/// `(port, pid)` pairs that may be terminated, skipping our own process.
pub fn kill_candidates<S: AsRef<str>>(
    readings: &[PortReading],
    allow_list: &[S],
    own_pid: u32,
) -> Vec<(u16, u32)> {
    readings
        .iter()
        .filter_map(|reading| {
            let owner = reading.status.owner()?;
            (owner.pid != own_pid && may_terminate(owner.name.as_deref(), allow_list))
                .then_some((reading.port, owner.pid))
        })
        .collect()
}
