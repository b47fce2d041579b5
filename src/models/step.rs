use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline slot. The derived ordering is the pipeline order and drives the
/// activation cutoff.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[repr(i32)]
pub enum Stage {
    BeforeClone = 1,
    DoClone = 2,
    AfterClone = 3,
    BeforeInstall = 4,
    DoInstall = 5,
    AfterInstall = 6,
    BeforeActivate = 7,
    DoActivate = 8,
    AfterActivate = 9,
    BeforePurge = 10,
    DoPurge = 11,
    AfterPurge = 12,
}

impl Stage {
    pub const BUILT_IN: [Stage; 4] = [
        Stage::DoClone,
        Stage::DoInstall,
        Stage::DoActivate,
        Stage::DoPurge,
    ];

    /// True while the release is not yet live; cancellation is only honoured
    /// up to and including activation.
    pub fn is_before_live(self) -> bool {
        self <= Stage::DoActivate
    }

    pub fn before(self) -> Stage {
        match self {
            Stage::DoClone => Stage::BeforeClone,
            Stage::DoInstall => Stage::BeforeInstall,
            Stage::DoActivate => Stage::BeforeActivate,
            Stage::DoPurge => Stage::BeforePurge,
            other => other,
        }
    }

    pub fn after(self) -> Stage {
        match self {
            Stage::DoClone => Stage::AfterClone,
            Stage::DoInstall => Stage::AfterInstall,
            Stage::DoActivate => Stage::AfterActivate,
            Stage::DoPurge => Stage::AfterPurge,
            other => other,
        }
    }
}

/// A user-defined command hooked before or after a built-in stage.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StepCommand {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub script: String,
    /// Overrides the server's default user when set.
    pub username: Option<String>,
    pub stage: Stage,
    pub position: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Step {
    pub id: String,
    pub deployment_id: String,
    pub stage: Stage,
    pub command_id: Option<String>,
    pub position: i64,
    #[sqlx(skip)]
    pub command: Option<StepCommand>,
    #[sqlx(skip)]
    pub logs: Vec<ServerLog>,
}

impl Step {
    pub fn is_custom(&self) -> bool {
        self.command_id.is_some()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[repr(i32)]
pub enum LogStatus {
    Pending = 0,
    Running = 1,
    Completed = 2,
    Failed = 3,
    Cancelled = 4,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ServerLog {
    pub id: String,
    pub step_id: String,
    pub server_id: String,
    pub status: LogStatus,
    pub output: String,
    pub position: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Success,
    Error,
}

impl OutputKind {
    fn tag(self) -> &'static str {
        match self {
            OutputKind::Success => "success",
            OutputKind::Error => "error",
        }
    }
}

/// One line of captured command output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub kind: OutputKind,
    pub text: String,
}

impl OutputLine {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            kind: OutputKind::Success,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: OutputKind::Error,
            text: text.into(),
        }
    }

    pub fn tagged(&self) -> String {
        let tag = self.kind.tag();
        format!("<{tag}>{}</{tag}>\n", self.text)
    }
}

impl ServerLog {
    pub fn append(&mut self, line: &OutputLine) {
        self.output.push_str(&line.tagged());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order_follows_pipeline() {
        assert!(Stage::BeforeClone < Stage::DoClone);
        assert!(Stage::DoInstall < Stage::DoActivate);
        assert!(Stage::AfterActivate > Stage::DoActivate);
        assert!(Stage::DoActivate.is_before_live());
        assert!(Stage::BeforeActivate.is_before_live());
        assert!(!Stage::AfterActivate.is_before_live());
        assert!(!Stage::DoPurge.is_before_live());
    }

    #[test]
    fn output_lines_are_tagged() {
        let mut log = ServerLog {
            id: "log".to_string(),
            step_id: "step".to_string(),
            server_id: "server".to_string(),
            status: LogStatus::Running,
            output: String::new(),
            position: 0,
            started_at: None,
            finished_at: None,
        };

        log.append(&OutputLine::success("Cloning"));
        log.append(&OutputLine::error("fatal: no such ref"));

        assert_eq!(
            log.output,
            "<success>Cloning</success>\n<error>fatal: no such ref</error>\n"
        );
    }
}
