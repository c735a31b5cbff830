//! One iteration's conversation with the agent.
//!
//! A [`Round`] owns the round prompt and accumulates the events of every
//! invocation made on its behalf (main, decision, continuation, repair), so
//! the run summary covers all of them.

use std::path::Path;

use anyhow::Result;
use tracing::debug;

use crate::core::classifier::strip_ansi;
use crate::core::event::{Event, EventCollector};
use crate::io::executor::{ExecRequest, Executor};
use crate::io::paths::LoopPaths;
use crate::io::run_log::RunLog;

/// Exit code and trimmed final answer of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub exit_code: i32,
    pub text: String,
}

pub struct Round<'a, E: Executor + ?Sized> {
    executor: &'a E,
    log: &'a RunLog,
    paths: &'a LoopPaths,
    prompt: String,
    events: EventCollector,
    invocations: u32,
}

impl<'a, E: Executor + ?Sized> Round<'a, E> {
    pub fn new(executor: &'a E, log: &'a RunLog, paths: &'a LoopPaths, prompt: String) -> Self {
        Self {
            executor,
            log,
            paths,
            prompt,
            events: EventCollector::new(),
            invocations: 0,
        }
    }

    /// The round prompt built at the start of the iteration.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn log(&self) -> &'a RunLog {
        self.log
    }

    pub fn paths(&self) -> &'a LoopPaths {
        self.paths
    }

    pub fn invocations(&self) -> u32 {
        self.invocations
    }

    /// Issue the round prompt, with the answer landing in the last-message artifact.
    pub fn run_main(&mut self) -> Result<Reply> {
        let prompt = self.prompt.clone();
        let output = self.paths.last_message.clone();
        self.invoke(&prompt, &output)
    }

    /// Run the agent once and append its final answer to the run log.
    pub fn invoke(&mut self, prompt: &str, output_path: &Path) -> Result<Reply> {
        let request = ExecRequest {
            workdir: self.paths.workspace.clone(),
            prompt: prompt.to_string(),
            output_path: output_path.to_path_buf(),
        };
        let output = self.executor.exec(&request, self.log)?;
        self.invocations += 1;

        let text = strip_ansi(output.final_text.trim());
        if !text.is_empty() {
            self.log.line(&text);
        }
        self.events.extend(output.events);
        debug!(
            exit_code = output.exit_code,
            invocation = self.invocations,
            output = %output_path.display(),
            "agent invocation finished"
        );
        Ok(Reply {
            exit_code: output.exit_code,
            text,
        })
    }

    pub fn events(&self) -> &[Event] {
        self.events.events()
    }
}
