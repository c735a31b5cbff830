//! Unattended driver for the `codex` agent CLI.
//!
//! Each iteration sends a round prompt built from the workspace plan, streams
//! the agent's events into a run log, answers the agent's multiple-choice
//! questions, retries failed rounds with a repair prompt, and remembers a
//! short summary for the next round.
//!
//! - **[`core`]**: Pure logic (event classification, path extraction,
//!   rate-limit and error cues, decision parsing, backlog selection). No I/O.
//! - **[`io`]**: Side-effecting operations (config, run log, memory, child
//!   processes, port inspection). Isolated behind traits for tests.
//!
//! Orchestration modules ([`round`], [`decision`], [`repair`], [`iteration`],
//! [`looping`]) coordinate the two to implement `codex-loop run`.

pub mod core;
pub mod decision;
pub mod exit_codes;
pub mod io;
pub mod iteration;
pub mod logging;
pub mod looping;
pub mod repair;
pub mod round;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
