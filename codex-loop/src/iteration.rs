//! Orchestration for a single loop iteration.
//!
//! Ports are checked, the plan is read fresh, a backlog target is picked and
//! the round prompt is sent. Decisions and repairs then run on the answer, and
//! memory plus the run summary are written last.

use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use chrono::Local;
use tracing::{info, instrument, warn};

use crate::core::backlog::{BacklogTarget, select_backlog_target};
use crate::core::response::{extract_next_step, summary_or_excerpt};
use crate::core::run_summary::{MAX_SUMMARY_ITEMS, summarize_run_events};
use crate::decision::{DecisionBudget, resolve_decisions};
use crate::io::config::LoopConfig;
use crate::io::executor::Executor;
use crate::io::memory::{
    JsonlMemoryStore, MemoryRecord, MemorySnapshot, MemoryStore, load_snapshot, memory_summary,
    write_snapshot,
};
use crate::io::paths::LoopPaths;
use crate::io::plan::read_plan;
use crate::io::ports::{PortInspector, prepare_ports};
use crate::io::prompt::{RoundContext, round_prompt};
use crate::io::run_log::RunLog;
use crate::repair::{RepairBudget, needs_repair, run_repair_loop};
use crate::round::Round;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Session state carried from one iteration to the next.
#[derive(Debug, Clone)]
pub struct RunState {
    pub cfg: LoopConfig,
    pub paths: LoopPaths,
    /// Last iteration's facts. Also the backlog cursor, so it is kept in
    /// memory even when persistence is disabled.
    pub snapshot: Option<MemorySnapshot>,
}

impl RunState {
    pub fn new(cfg: LoopConfig, paths: LoopPaths) -> Self {
        Self {
            cfg,
            paths,
            snapshot: None,
        }
    }

    /// Start a session, picking up the persisted snapshot when memory is on.
    ///
    /// An unreadable or invalid snapshot is reported and treated as absent.
    pub fn load(cfg: LoopConfig, paths: LoopPaths, log: &RunLog) -> Self {
        let mut state = Self::new(cfg, paths);
        if state.cfg.memory.backend.is_enabled() {
            match load_snapshot(&state.paths.snapshot()) {
                Ok(snapshot) => state.snapshot = snapshot,
                Err(err) => {
                    warn!(err = %format!("{err:#}"), "ignoring memory snapshot");
                    log.warn(&format!("Ignoring unreadable memory snapshot: {err:#}"));
                }
            }
        }
        state
    }

    pub fn decision_budget(&self) -> DecisionBudget {
        DecisionBudget {
            enabled: self.cfg.auto_decide,
            rounds: self.cfg.decision_rounds,
        }
    }

    pub fn repair_budget(&self) -> RepairBudget {
        RepairBudget {
            enabled: self.cfg.auto_repair,
            rounds: self.cfg.repair_rounds,
            delay: Duration::from_secs(self.cfg.repair_delay_seconds),
        }
    }

    fn pick_target(&self, plan: &str) -> BacklogTarget {
        if !self.cfg.auto_pick_target {
            return BacklogTarget {
                index: -1,
                item: String::new(),
            };
        }
        let last = self.snapshot.as_ref().map_or(-1, |s| s.last_target_index);
        select_backlog_target(plan, last)
    }

    fn memory_summary(&self, log: &RunLog) -> String {
        let backend = self.cfg.memory.backend;
        let recent = if backend.uses_store() {
            let store = JsonlMemoryStore::new(self.paths.store());
            store
                .recent(self.cfg.memory.recent_records)
                .unwrap_or_else(|err| {
                    log.warn(&format!("Memory store read failed: {err:#}"));
                    Vec::new()
                })
        } else {
            Vec::new()
        };
        memory_summary(
            backend,
            self.snapshot.as_ref(),
            &recent,
            self.cfg.memory.max_chars,
        )
    }

    /// Persist `snapshot` per the memory backend and make it current.
    ///
    /// Persistence failures are logged; they never fail the iteration.
    fn remember(&mut self, snapshot: MemorySnapshot, log: &RunLog) {
        let backend = self.cfg.memory.backend;
        if backend.is_enabled() {
            if let Err(err) = write_snapshot(&self.paths.snapshot(), &snapshot) {
                warn!(err = %format!("{err:#}"), "memory snapshot write failed");
                log.warn(&format!("Memory snapshot write failed: {err:#}"));
            }
            if backend.uses_store() {
                let store = JsonlMemoryStore::new(self.paths.store());
                if let Err(err) = store.append(&MemoryRecord::from_snapshot(&snapshot)) {
                    warn!(err = %format!("{err:#}"), "memory store append failed");
                    log.warn(&format!("Memory store append failed: {err:#}"));
                }
            }
        }
        self.snapshot = Some(snapshot);
    }
}

/// Result of one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationOutcome {
    /// Iteration number (1-indexed).
    pub index: u32,
    /// Final exit code after decisions and repairs.
    pub exit_code: i32,
    pub response: String,
    pub target: BacklogTarget,
    pub summary: String,
    pub next_step: String,
    pub decision_rounds: u32,
    pub repair_attempts: u32,
    /// Agent invocations made, all kinds included.
    pub invocations: u32,
}

impl IterationOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Execute one iteration.
///
/// Returns `Err` when the iteration cannot run at all (missing or empty
/// plan, agent not runnable). A failing agent is an outcome, not an error.
#[instrument(skip_all, fields(index = index))]
pub fn run_iteration<E, P>(
    state: &mut RunState,
    executor: &E,
    ports: &P,
    log: &RunLog,
    index: u32,
) -> Result<IterationOutcome>
where
    E: Executor + ?Sized,
    P: PortInspector + ?Sized,
{
    let started = Instant::now();
    log.header(index, &Local::now().format(TIMESTAMP_FORMAT).to_string());

    let report = prepare_ports(ports, &state.cfg.ports, log);

    let plan = read_plan(&state.paths.plan)?;
    let plan = plan.trim();
    if plan.is_empty() {
        log.error("Plan is empty. Aborting.");
        bail!("plan {} is empty", state.paths.plan.display());
    }

    let target = state.pick_target(plan);
    if !target.is_empty() {
        log.info(&format!("Auto-target: {}", target.item));
    }
    let target_note = if target.is_empty() {
        "none".to_string()
    } else {
        target.item.clone()
    };

    let prompt = round_prompt(&RoundContext {
        plan: plan.to_string(),
        memory_summary: state.memory_summary(log),
        port_summary: report.summary.clone(),
        port_policy_note: report.policy_note(),
        target_note: target_note.clone(),
    })?;

    let decisions = state.decision_budget();
    let mut round = Round::new(executor, log, &state.paths, prompt);
    let first = round.run_main()?;
    let resolved = resolve_decisions(&mut round, first.text, decisions)?;
    let exit_code = if resolved.exit_code != 0 {
        resolved.exit_code
    } else {
        first.exit_code
    };
    let repaired = run_repair_loop(
        &mut round,
        resolved.response,
        exit_code,
        state.repair_budget(),
        decisions,
    )?;
    let exit_code = repaired.exit_code;
    let response = repaired.response;

    let summary = summary_or_excerpt(&response);
    let next_step = extract_next_step(&response).unwrap_or_default();
    let last_error = if exit_code != 0 {
        Some(format!("exit code {exit_code}"))
    } else if needs_repair(exit_code, &response) {
        Some("error indicators in output".to_string())
    } else {
        None
    };

    let invocations = round.invocations();
    let summary_block = summarize_run_events(
        round.events(),
        started.elapsed(),
        state.cfg.json_enabled() && !state.cfg.agent.resume_last,
        MAX_SUMMARY_ITEMS,
    );
    drop(round);

    let snapshot = MemorySnapshot {
        last_run_at: Local::now().format(TIMESTAMP_FORMAT).to_string(),
        last_round_index: index,
        last_target_index: target.index,
        last_target: target_note,
        last_summary: summary.clone(),
        last_next_step: next_step.clone(),
        last_log_path: state.paths.log.display().to_string(),
        last_response_path: state.paths.last_message.display().to_string(),
        last_exit_code: exit_code,
        last_error,
    };
    state.remember(snapshot, log);

    log.append(&format!("\n{summary_block}"));
    if exit_code != 0 {
        log.error(&format!("Agent exited with code {exit_code}."));
    }
    info!(
        exit_code,
        decision_rounds = resolved.rounds,
        repair_attempts = repaired.attempts,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "iteration finished"
    );

    Ok(IterationOutcome {
        index,
        exit_code,
        response,
        target,
        summary,
        next_step,
        decision_rounds: resolved.rounds,
        repair_attempts: repaired.attempts,
        invocations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::MemoryBackend;
    use crate::test_support::{FakePortInspector, ScriptedExecutor, ScriptedReply, TestWorkspace};

    const PLAN: &str = "# PLAN\n\n## Backlog A:\n1) Add tests\n2) Wire config\n";

    /// Verifies the round prompt carries target, ports and memory, and the snapshot advances.
    #[test]
    fn clean_iteration_records_snapshot() {
        let ws = TestWorkspace::new().expect("workspace");
        ws.write_plan(PLAN).expect("plan");
        let log = ws.open_log().expect("log");
        let mut state = ws.state();
        let executor = ScriptedExecutor::new(vec![ScriptedReply::ok(
            "Done.\nSummary: added tests\nNext Step: run CI",
        )]);

        let outcome =
            run_iteration(&mut state, &executor, &FakePortInspector::free(), &log, 1).expect("iteration");
        assert!(outcome.succeeded());
        assert_eq!(outcome.target.item, "1) Add tests");
        assert_eq!(outcome.summary, "added tests");
        assert_eq!(outcome.next_step, "run CI");
        assert_eq!(outcome.invocations, 1);

        let prompt = &executor.prompts()[0];
        assert!(prompt.contains("Round target (auto-selected):\n1) Add tests"));
        assert!(prompt.contains("- 1420: free\n- 1421: free"));
        assert!(prompt.contains("Memory summary (previous run):\nnone"));

        let snapshot = load_snapshot(&ws.paths.snapshot()).expect("load").expect("snapshot");
        assert_eq!(snapshot.last_target_index, 0);
        assert_eq!(snapshot.last_summary, "added tests");
        assert_eq!(snapshot.last_error, None);

        let text = ws.read_log();
        assert!(text.contains("\n## Run 1 - "));
        assert!(text.contains("[INFO] Auto-target: 1) Add tests\n"));
        assert!(text.contains("### Run Summary\n"));
        assert!(text.contains("- Commands: (json disabled)"));
    }

    #[test]
    fn second_iteration_advances_target_and_sees_memory() {
        let ws = TestWorkspace::new().expect("workspace");
        ws.write_plan(PLAN).expect("plan");
        let log = ws.open_log().expect("log");
        let mut state = ws.state();
        let executor = ScriptedExecutor::new(vec![
            ScriptedReply::ok("Summary: first pass"),
            ScriptedReply::ok("Summary: second pass"),
        ]);
        let ports = FakePortInspector::free();

        run_iteration(&mut state, &executor, &ports, &log, 1).expect("first");
        let second = run_iteration(&mut state, &executor, &ports, &log, 2).expect("second");
        assert_eq!(second.target.item, "2) Wire config");
        assert!(executor.prompts()[1].contains("- last_summary: first pass"));
    }

    #[test]
    fn empty_plan_is_fatal() {
        let ws = TestWorkspace::new().expect("workspace");
        ws.write_plan("  \n\n").expect("plan");
        let log = ws.open_log().expect("log");
        let mut state = ws.state();
        let executor = ScriptedExecutor::new(Vec::new());

        let err = run_iteration(&mut state, &executor, &FakePortInspector::free(), &log, 1)
            .expect_err("empty plan");
        assert!(format!("{err:#}").contains("is empty"));
        assert!(ws.read_log().contains("[ERROR] Plan is empty. Aborting."));
        assert!(executor.prompts().is_empty());
    }

    /// Verifies a failure that survives repair lands in the snapshot and the log.
    #[test]
    fn unrepaired_failure_is_recorded() {
        let ws = TestWorkspace::new().expect("workspace");
        ws.write_plan(PLAN).expect("plan");
        let log = ws.open_log().expect("log");
        let mut state = ws.state();
        state.cfg.auto_repair = false;
        let executor = ScriptedExecutor::new(vec![ScriptedReply::failed(3, "crashed")]);

        let outcome =
            run_iteration(&mut state, &executor, &FakePortInspector::free(), &log, 1).expect("iteration");
        assert_eq!(outcome.exit_code, 3);
        let snapshot = state.snapshot.expect("snapshot");
        assert_eq!(snapshot.last_error.as_deref(), Some("exit code 3"));
        assert_eq!(snapshot.last_exit_code, 3);
        assert!(ws.read_log().contains("[ERROR] Agent exited with code 3."));
    }

    #[test]
    fn disabled_memory_still_advances_target() {
        let ws = TestWorkspace::new().expect("workspace");
        ws.write_plan(PLAN).expect("plan");
        let log = ws.open_log().expect("log");
        let mut state = ws.state();
        state.cfg.memory.backend = MemoryBackend::Disabled;
        let executor = ScriptedExecutor::new(vec![
            ScriptedReply::ok("Summary: a"),
            ScriptedReply::ok("Summary: b"),
        ]);
        let ports = FakePortInspector::free();

        run_iteration(&mut state, &executor, &ports, &log, 1).expect("first");
        let second = run_iteration(&mut state, &executor, &ports, &log, 2).expect("second");
        assert_eq!(second.target.index, 1);
        assert!(executor.prompts()[1].contains("Memory summary (previous run):\ndisabled"));
        assert!(!ws.paths.snapshot().exists());
    }

    #[test]
    fn store_backend_appends_records() {
        let ws = TestWorkspace::new().expect("workspace");
        ws.write_plan(PLAN).expect("plan");
        let log = ws.open_log().expect("log");
        let mut state = ws.state();
        state.cfg.memory.backend = MemoryBackend::Both;
        let executor = ScriptedExecutor::new(vec![
            ScriptedReply::ok("Summary: a"),
            ScriptedReply::ok("Summary: b"),
        ]);
        let ports = FakePortInspector::free();

        run_iteration(&mut state, &executor, &ports, &log, 1).expect("first");
        run_iteration(&mut state, &executor, &ports, &log, 2).expect("second");
        let records = JsonlMemoryStore::new(ws.paths.store()).recent(10).expect("recent");
        assert_eq!(records.len(), 2);
        assert!(executor.prompts()[1].contains("Recent runs:\n- "));
    }

    #[test]
    fn invalid_snapshot_reads_as_absent() {
        let ws = TestWorkspace::new().expect("workspace");
        std::fs::create_dir_all(&ws.paths.memory_dir).expect("mkdir");
        std::fs::write(ws.paths.snapshot(), "{broken").expect("write");
        let log = ws.open_log().expect("log");

        let state = RunState::load(ws.cfg.clone(), ws.paths.clone(), &log);
        assert_eq!(state.snapshot, None);
        assert!(ws.read_log().contains("[WARN] Ignoring unreadable memory snapshot"));
    }

    #[test]
    fn auto_pick_disabled_sends_no_target() {
        let ws = TestWorkspace::new().expect("workspace");
        ws.write_plan(PLAN).expect("plan");
        let log = ws.open_log().expect("log");
        let mut state = ws.state();
        state.cfg.auto_pick_target = false;
        let executor = ScriptedExecutor::new(vec![ScriptedReply::ok("Summary: x")]);

        let outcome =
            run_iteration(&mut state, &executor, &FakePortInspector::free(), &log, 1).expect("iteration");
        assert_eq!(outcome.target.index, -1);
        assert!(executor.prompts()[0].contains("Round target (auto-selected):\nnone"));
    }
}
