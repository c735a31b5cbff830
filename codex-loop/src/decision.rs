//! Auto-decision: answer the agent's own multiple-choice questions.
//!
//! When a response lists numbered options and asks for a pick, a separate
//! numbers-only invocation chooses one, and the round continues with that
//! choice. Bounded by `decision_rounds`.

use anyhow::Result;
use tracing::{debug, info};

use crate::core::decision::{needs_decision, numbered_options, parse_decision_number};
use crate::io::executor::Executor;
use crate::io::prompt::{continuation_prompt, decision_prompt};
use crate::round::Round;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionBudget {
    pub enabled: bool,
    pub rounds: u32,
}

/// Where the decision loop left the round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionOutcome {
    /// Latest assistant response.
    pub response: String,
    /// Nonzero when a decision or continuation invocation failed.
    pub exit_code: i32,
    /// Decision rounds actually started.
    pub rounds: u32,
}

/// Resolve decision prompts in `response` until none remain or the budget runs out.
///
/// Each round checks the latest response, asks the helper for a number,
/// falls back to the first option when the reply is unusable, then continues
/// the round prompt with the choice. A failed decision invocation ends the
/// loop with its exit code; a failed continuation does too.
pub fn resolve_decisions<E: Executor + ?Sized>(
    round: &mut Round<'_, E>,
    response: String,
    budget: DecisionBudget,
) -> Result<DecisionOutcome> {
    let mut outcome = DecisionOutcome {
        response,
        exit_code: 0,
        rounds: 0,
    };
    if !budget.enabled {
        return Ok(outcome);
    }

    for index in 1..=budget.rounds {
        if !needs_decision(&outcome.response) {
            break;
        }
        let options = numbered_options(&outcome.response);
        let Some(first) = options.first().map(|option| option.number) else {
            break;
        };
        outcome.rounds = index;
        round.log().section(&format!("Auto-decision round {index}"));
        info!(round = index, options = options.len(), "resolving decision");

        let prompt = decision_prompt(&outcome.response, &options)?;
        let decision_path = round.paths().decision_message.clone();
        let reply = round.invoke(&prompt, &decision_path)?;
        if reply.exit_code != 0 {
            outcome.exit_code = reply.exit_code;
            break;
        }

        let choice = match parse_decision_number(&reply.text, &options) {
            Some(number) => number,
            None => {
                round
                    .log()
                    .warn(&format!("Decision parse failed. Defaulting to {first}."));
                first
            }
        };
        debug!(choice, "decision made");

        let prompt = continuation_prompt(round.prompt(), &outcome.response, choice)?;
        let last_message = round.paths().last_message.clone();
        let next = round.invoke(&prompt, &last_message)?;
        outcome.response = next.text;
        outcome.exit_code = next.exit_code;
        if next.exit_code != 0 {
            break;
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedExecutor, ScriptedReply, TestWorkspace};

    const QUESTION: &str = "Which approach?\n1. Do X\n2. Do Y";

    fn budget(rounds: u32) -> DecisionBudget {
        DecisionBudget {
            enabled: true,
            rounds,
        }
    }

    /// Verifies a question is answered and the round continues with the choice.
    #[test]
    fn picks_number_and_continues() {
        let ws = TestWorkspace::new().expect("workspace");
        let log = ws.open_log().expect("log");
        let executor = ScriptedExecutor::new(vec![
            ScriptedReply::ok("2"),
            ScriptedReply::ok("Did Y.\nSummary: done"),
        ]);
        let mut round = Round::new(&executor, &log, &ws.paths, "ROUND".to_string());

        let outcome = resolve_decisions(&mut round, QUESTION.to_string(), budget(3)).expect("resolve");
        assert_eq!(outcome.response, "Did Y.\nSummary: done");
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.rounds, 1);
        executor.assert_drained();

        let requests = executor.requests();
        assert!(requests[0].prompt.starts_with("You are a decision-only helper."));
        assert_eq!(requests[0].output_path, ws.paths.decision_message);
        assert!(requests[1].prompt.starts_with("ROUND"));
        assert!(requests[1].prompt.contains("User decision: 2"));
        assert_eq!(requests[1].output_path, ws.paths.last_message);
        assert!(ws.read_log().contains("### Auto-decision round 1\n"));
    }

    #[test]
    fn unusable_reply_defaults_to_first_option() {
        let ws = TestWorkspace::new().expect("workspace");
        let log = ws.open_log().expect("log");
        let executor = ScriptedExecutor::new(vec![
            ScriptedReply::ok("I would rather not say"),
            ScriptedReply::ok("went with X"),
        ]);
        let mut round = Round::new(&executor, &log, &ws.paths, "ROUND".to_string());

        resolve_decisions(&mut round, QUESTION.to_string(), budget(3)).expect("resolve");
        assert!(executor.prompts()[1].contains("User decision: 1"));
        assert!(ws.read_log().contains("[WARN] Decision parse failed. Defaulting to 1."));
    }

    /// Verifies the loop stops after `rounds` even when the agent keeps asking.
    #[test]
    fn budget_bounds_rounds() {
        let ws = TestWorkspace::new().expect("workspace");
        let log = ws.open_log().expect("log");
        let executor = ScriptedExecutor::new(vec![
            ScriptedReply::ok("1"),
            ScriptedReply::ok(QUESTION),
            ScriptedReply::ok("2"),
            ScriptedReply::ok(QUESTION),
        ]);
        let mut round = Round::new(&executor, &log, &ws.paths, "ROUND".to_string());

        let outcome = resolve_decisions(&mut round, QUESTION.to_string(), budget(2)).expect("resolve");
        assert_eq!(outcome.rounds, 2);
        assert_eq!(outcome.response, QUESTION);
        executor.assert_drained();
    }

    #[test]
    fn failed_decision_invocation_stops_with_its_code() {
        let ws = TestWorkspace::new().expect("workspace");
        let log = ws.open_log().expect("log");
        let executor = ScriptedExecutor::new(vec![ScriptedReply::failed(7, "")]);
        let mut round = Round::new(&executor, &log, &ws.paths, "ROUND".to_string());

        let outcome = resolve_decisions(&mut round, QUESTION.to_string(), budget(3)).expect("resolve");
        assert_eq!(outcome.exit_code, 7);
        assert_eq!(outcome.response, QUESTION);
        executor.assert_drained();
    }

    #[test]
    fn plain_answers_and_disabled_budget_do_nothing() {
        let ws = TestWorkspace::new().expect("workspace");
        let log = ws.open_log().expect("log");
        let executor = ScriptedExecutor::new(Vec::new());
        let mut round = Round::new(&executor, &log, &ws.paths, "ROUND".to_string());

        let outcome =
            resolve_decisions(&mut round, "All done.\n1. a\n2. b".to_string(), budget(3)).expect("resolve");
        assert_eq!(outcome.rounds, 0);

        let disabled = DecisionBudget {
            enabled: false,
            rounds: 3,
        };
        let outcome = resolve_decisions(&mut round, QUESTION.to_string(), disabled).expect("resolve");
        assert_eq!(outcome.rounds, 0);
        assert_eq!(round.invocations(), 0);
    }
}
