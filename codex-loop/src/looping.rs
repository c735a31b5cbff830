//! Multi-iteration driver for `codex-loop run`.

use std::thread;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use crate::io::executor::Executor;
use crate::io::ports::PortInspector;
use crate::io::run_log::RunLog;
use crate::iteration::{IterationOutcome, RunState, run_iteration};

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// Every requested iteration ran.
    Completed,
    /// An iteration failed and `continue_on_error` is off.
    Failed { index: u32, exit_code: i32 },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub iterations: u32,
    /// Failed iterations, including any tolerated by `continue_on_error`.
    pub failures: u32,
    pub stop: LoopStop,
}

/// Run iterations until the configured count is reached or one fails.
///
/// With `forever` set the loop only ends on a failure (or an error). Between
/// iterations it pauses `delay_seconds`; there is no pause after the last one.
/// Fatal conditions such as an empty plan surface as `Err`.
pub fn run_loop<E, P, F>(
    state: &mut RunState,
    executor: &E,
    ports: &P,
    log: &RunLog,
    mut on_iteration: F,
) -> Result<LoopOutcome>
where
    E: Executor + ?Sized,
    P: PortInspector + ?Sized,
    F: FnMut(&IterationOutcome),
{
    let mut failures = 0u32;
    let mut index = 0u32;
    loop {
        index += 1;
        let outcome = run_iteration(state, executor, ports, log, index)?;
        on_iteration(&outcome);

        if !outcome.succeeded() {
            failures += 1;
            if !state.cfg.continue_on_error {
                return Ok(LoopOutcome {
                    iterations: index,
                    failures,
                    stop: LoopStop::Failed {
                        index,
                        exit_code: outcome.exit_code,
                    },
                });
            }
        }

        let is_last = !state.cfg.forever && index >= state.cfg.iterations;
        if is_last {
            info!(iterations = index, failures, "loop finished");
            return Ok(LoopOutcome {
                iterations: index,
                failures,
                stop: LoopStop::Completed,
            });
        }
        if state.cfg.delay_seconds > 0 {
            thread::sleep(Duration::from_secs(state.cfg.delay_seconds));
        }
    }
}
