//! Prompt builders for the round, decision, continuation and repair invocations.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::decision::DecisionOption;

const ROUND_TEMPLATE: &str = include_str!("prompts/round.md");
const DECISION_TEMPLATE: &str = include_str!("prompts/decision.md");
const CONTINUATION_TEMPLATE: &str = include_str!("prompts/continuation.md");
const REPAIR_TEMPLATE: &str = include_str!("prompts/repair.md");

static ENV: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.add_template("round", ROUND_TEMPLATE)
        .expect("round template should be valid");
    env.add_template("decision", DECISION_TEMPLATE)
        .expect("decision template should be valid");
    env.add_template("continuation", CONTINUATION_TEMPLATE)
        .expect("continuation template should be valid");
    env.add_template("repair", REPAIR_TEMPLATE)
        .expect("repair template should be valid");
    env
});

/// Per-iteration inputs of the round prompt.
#[derive(Debug, Clone, Serialize)]
pub struct RoundContext {
    pub plan: String,
    pub memory_summary: String,
    pub port_summary: String,
    pub port_policy_note: String,
    /// Selected backlog item, or `none`.
    pub target_note: String,
}

fn render<S: Serialize>(name: &str, ctx: S) -> Result<String> {
    let template = ENV
        .get_template(name)
        .with_context(|| format!("load {name} template"))?;
    template
        .render(ctx)
        .with_context(|| format!("render {name} prompt"))
}

/// The prompt every iteration starts with, and that repair re-issues.
pub fn round_prompt(round: &RoundContext) -> Result<String> {
    render(
        "round",
        context! {
            plan => round.plan.trim(),
            memory_summary => round.memory_summary.trim(),
            port_summary => round.port_summary.trim(),
            port_policy_note => round.port_policy_note.trim(),
            target_note => round.target_note.trim(),
        },
    )
}

/// Numbers-only helper prompt embedding the full response and its options.
pub fn decision_prompt(last_response: &str, options: &[DecisionOption]) -> Result<String> {
    render(
        "decision",
        context! {
            last_response => last_response.trim(),
            options => options,
        },
    )
}

/// The round prompt followed by the previous response and the chosen option.
pub fn continuation_prompt(round_prompt: &str, last_response: &str, decision: u32) -> Result<String> {
    render(
        "continuation",
        context! {
            round_prompt => round_prompt.trim_end(),
            last_response => last_response.trim(),
            decision => decision,
        },
    )
}

/// Fix-the-problem prompt carrying the original round prompt and a one-line reason.
pub fn repair_prompt(round_prompt: &str, last_response: &str, reason: &str) -> Result<String> {
    render(
        "repair",
        context! {
            reason => reason.trim(),
            round_prompt => round_prompt.trim_end(),
            last_response => last_response.trim(),
        },
    )
}
