//! Auto-repair: ask the agent to fix a failed round, then retry it.

use std::thread;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use crate::core::cues::has_error_cue;
use crate::decision::{DecisionBudget, resolve_decisions};
use crate::io::executor::Executor;
use crate::io::prompt::repair_prompt;
use crate::round::Round;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairBudget {
    pub enabled: bool,
    pub rounds: u32,
    /// Pause between a repair invocation and the retried round.
    pub delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairOutcome {
    pub response: String,
    pub exit_code: i32,
    /// Repair rounds started.
    pub attempts: u32,
}

/// A round needs repair when the agent failed or its answer reports failure.
pub fn needs_repair(exit_code: i32, response: &str) -> bool {
    exit_code != 0 || has_error_cue(response)
}

/// One-line reason embedded in the repair prompt.
pub fn repair_reason(exit_code: i32) -> String {
    if exit_code != 0 {
        format!("Agent exited with code {exit_code}.")
    } else {
        "Error indicators found in assistant output.".to_string()
    }
}

/// Repair and retry until the round is clean or the budget is spent.
///
/// Each attempt sends the repair prompt to the repair artifact, waits
/// `delay`, re-issues the original round prompt and resolves any decision it
/// raises. A failed repair invocation aborts the loop with its exit code.
pub fn run_repair_loop<E: Executor + ?Sized>(
    round: &mut Round<'_, E>,
    response: String,
    exit_code: i32,
    budget: RepairBudget,
    decisions: DecisionBudget,
) -> Result<RepairOutcome> {
    let mut outcome = RepairOutcome {
        response,
        exit_code,
        attempts: 0,
    };
    if !budget.enabled || !needs_repair(outcome.exit_code, &outcome.response) {
        return Ok(outcome);
    }

    for index in 1..=budget.rounds {
        outcome.attempts = index;
        round.log().section(&format!("Auto-repair round {index}"));
        let reason = repair_reason(outcome.exit_code);
        info!(round = index, reason = %reason, "repairing round");

        let prompt = repair_prompt(round.prompt(), &outcome.response, &reason)?;
        let repair_path = round.paths().repair_message.clone();
        let repair = round.invoke(&prompt, &repair_path)?;
        if repair.exit_code != 0 {
            round
                .log()
                .error(&format!("Repair exited with code {}.", repair.exit_code));
            warn!(exit_code = repair.exit_code, "repair invocation failed");
            outcome.exit_code = repair.exit_code;
            break;
        }

        if !budget.delay.is_zero() {
            thread::sleep(budget.delay);
        }

        let retry = round.run_main()?;
        let resolved = resolve_decisions(round, retry.text, decisions)?;
        outcome.response = resolved.response;
        outcome.exit_code = if resolved.exit_code != 0 {
            resolved.exit_code
        } else {
            retry.exit_code
        };
        if !needs_repair(outcome.exit_code, &outcome.response) {
            break;
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedExecutor, ScriptedReply, TestWorkspace};

    fn budget(rounds: u32) -> RepairBudget {
        RepairBudget {
            enabled: true,
            rounds,
            delay: Duration::ZERO,
        }
    }

    const NO_DECISIONS: DecisionBudget = DecisionBudget {
        enabled: false,
        rounds: 0,
    };

    #[test]
    fn repair_triggers() {
        assert!(needs_repair(1, "fine"));
        assert!(needs_repair(0, "error: tests failed"));
        assert!(!needs_repair(0, "All good.\nSummary: done"));
        assert!(!needs_repair(0, "429 Too Many Requests, try again in 30s"));
        assert_eq!(repair_reason(3), "Agent exited with code 3.");
        assert_eq!(repair_reason(0), "Error indicators found in assistant output.");
    }

    /// Verifies one repair followed by a clean retry ends the loop.
    #[test]
    fn repair_then_clean_retry() {
        let ws = TestWorkspace::new().expect("workspace");
        let log = ws.open_log().expect("log");
        let executor = ScriptedExecutor::new(vec![
            ScriptedReply::ok("fixed the import"),
            ScriptedReply::ok("All green.\nSummary: fixed"),
        ]);
        let mut round = Round::new(&executor, &log, &ws.paths, "ROUND".to_string());

        let outcome =
            run_repair_loop(&mut round, "build failed".to_string(), 0, budget(2), NO_DECISIONS)
                .expect("repair");
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.response, "All green.\nSummary: fixed");
        executor.assert_drained();

        let requests = executor.requests();
        assert!(requests[0].prompt.starts_with("You are a repair-only helper."));
        assert!(requests[0].prompt.contains("Error indicators found in assistant output."));
        assert_eq!(requests[0].output_path, ws.paths.repair_message);
        assert_eq!(requests[1].prompt, "ROUND");
        assert_eq!(requests[1].output_path, ws.paths.last_message);
        assert!(ws.read_log().contains("### Auto-repair round 1\n"));
    }

    #[test]
    fn failed_repair_aborts_with_its_code() {
        let ws = TestWorkspace::new().expect("workspace");
        let log = ws.open_log().expect("log");
        let executor = ScriptedExecutor::new(vec![ScriptedReply::failed(9, "")]);
        let mut round = Round::new(&executor, &log, &ws.paths, "ROUND".to_string());

        let outcome = run_repair_loop(&mut round, String::new(), 1, budget(3), NO_DECISIONS)
            .expect("repair");
        assert_eq!(outcome.exit_code, 9);
        assert_eq!(outcome.attempts, 1);
        executor.assert_drained();
        assert!(ws.read_log().contains("[ERROR] Repair exited with code 9."));
    }

    /// Verifies a persistently failing round stops after the configured attempts.
    #[test]
    fn budget_exhausted_keeps_last_failure() {
        let ws = TestWorkspace::new().expect("workspace");
        let log = ws.open_log().expect("log");
        let executor = ScriptedExecutor::new(vec![
            ScriptedReply::ok("tried"),
            ScriptedReply::failed(2, "still broken"),
            ScriptedReply::ok("tried again"),
            ScriptedReply::failed(2, "still broken"),
        ]);
        let mut round = Round::new(&executor, &log, &ws.paths, "ROUND".to_string());

        let outcome = run_repair_loop(&mut round, String::new(), 2, budget(2), NO_DECISIONS)
            .expect("repair");
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.exit_code, 2);
        assert!(executor.prompts()[2].contains("Agent exited with code 2."));
        executor.assert_drained();
    }

    #[test]
    fn retried_round_resolves_decisions() {
        let ws = TestWorkspace::new().expect("workspace");
        let log = ws.open_log().expect("log");
        let executor = ScriptedExecutor::new(vec![
            ScriptedReply::ok("repaired"),
            ScriptedReply::ok("Which next?\n1. ship\n2. wait"),
            ScriptedReply::ok("1"),
            ScriptedReply::ok("Shipped.\nSummary: shipped"),
        ]);
        let mut round = Round::new(&executor, &log, &ws.paths, "ROUND".to_string());
        let decisions = DecisionBudget {
            enabled: true,
            rounds: 1,
        };

        let outcome = run_repair_loop(&mut round, String::new(), 1, budget(2), decisions)
            .expect("repair");
        assert_eq!(outcome.response, "Shipped.\nSummary: shipped");
        assert_eq!(outcome.exit_code, 0);
        executor.assert_drained();
    }

    #[test]
    fn clean_round_or_disabled_budget_skips_repair() {
        let ws = TestWorkspace::new().expect("workspace");
        let log = ws.open_log().expect("log");
        let executor = ScriptedExecutor::new(Vec::new());
        let mut round = Round::new(&executor, &log, &ws.paths, "ROUND".to_string());

        let outcome = run_repair_loop(&mut round, "ok".to_string(), 0, budget(2), NO_DECISIONS)
            .expect("repair");
        assert_eq!(outcome.attempts, 0);

        let disabled = RepairBudget {
            enabled: false,
            ..budget(2)
        };
        let outcome = run_repair_loop(&mut round, "ok".to_string(), 4, disabled, NO_DECISIONS)
            .expect("repair");
        assert_eq!(outcome.exit_code, 4);
        assert_eq!(round.invocations(), 0);
    }
}
