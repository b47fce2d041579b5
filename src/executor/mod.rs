pub mod process_executor;
pub mod ssh;

pub use process_executor::ProcessExecutor;
pub use ssh::SshTarget;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::OutputLine;

/// What the runner should do after a line has been delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineControl {
    Continue,
    Interrupt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },
    /// The sink asked for an interrupt and the command stopped afterwards.
    Interrupted,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Succeeded)
    }
}

/// Receives command output one line at a time.
#[async_trait]
pub trait OutputSink: Send {
    async fn line(&mut self, line: OutputLine) -> LineControl;
}

/// Runs a shell command to completion, streaming its output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `command` with `input`, when given, written to its stdin.
    async fn run_with_input(
        &self,
        command: &str,
        input: Option<&str>,
        sink: &mut dyn OutputSink,
    ) -> Result<RunOutcome>;

    async fn run(&self, command: &str, sink: &mut dyn OutputSink) -> Result<RunOutcome> {
        self.run_with_input(command, None, sink).await
    }
}

/// Keeps every line; used for local commands whose output is parsed.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub lines: Vec<OutputLine>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stdout(&self) -> String {
        self.joined(crate::models::OutputKind::Success)
    }

    pub fn stderr(&self) -> String {
        self.joined(crate::models::OutputKind::Error)
    }

    fn joined(&self, kind: crate::models::OutputKind) -> String {
        self.lines
            .iter()
            .filter(|line| line.kind == kind)
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl OutputSink for CollectingSink {
    async fn line(&mut self, line: OutputLine) -> LineControl {
        self.lines.push(line);
        LineControl::Continue
    }
}

/// Forwards lines to tracing only.
pub struct TracingSink<'a> {
    pub label: &'a str,
}

#[async_trait]
impl OutputSink for TracingSink<'_> {
    async fn line(&mut self, line: OutputLine) -> LineControl {
        tracing::debug!(target: "deployer::remote", "[{}] {}", self.label, line.text);
        LineControl::Continue
    }
}
