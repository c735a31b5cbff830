//! Stable exit codes for `codex-loop` commands.

/// Command succeeded; for `run`, every requested iteration completed.
pub const OK: i32 = 0;
/// Setup failed: invalid workspace or config, agent not found, missing or empty plan.
pub const INVALID: i32 = 1;
/// `codex-loop run` stopped on an iteration failure it was not told to tolerate.
pub const STOPPED: i32 = 2;
