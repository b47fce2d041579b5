//! Fixtures shared by the service tests.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use crate::error::Result;
use crate::executor::{CommandRunner, LineControl, OutputSink, RunOutcome};
use crate::models::{
    Deployment, DeploymentStatus, OutputLine, Project, ProjectStatus, Server, Stage, StepCommand,
    Variable,
};

pub const RELEASE_ID: &str = "20260101120000";
pub const COMMIT_LINE: &str = "0123456789abcdef\tAda Lovelace\tada@example.com";

type Hook = Box<dyn Fn() + Send + Sync>;

/// Records every command instead of running it. Commands containing a
/// failure marker fail; hooks fire before the command "runs".
#[derive(Default)]
pub struct FakeRunner {
    commands: Mutex<Vec<String>>,
    failures: Vec<(String, String)>,
    hooks: Vec<(String, Hook)>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(mut self, marker: &str, stderr: &str) -> Self {
        self.failures.push((marker.to_string(), stderr.to_string()));
        self
    }

    pub fn on(mut self, marker: &str, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.push((marker.to_string(), Box::new(hook)));
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn count(&self, marker: &str) -> usize {
        self.commands()
            .iter()
            .filter(|command| command.contains(marker))
            .count()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run_with_input(
        &self,
        command: &str,
        input: Option<&str>,
        sink: &mut dyn OutputSink,
    ) -> Result<RunOutcome> {
        // Remote scripts arrive on stdin; record them with the command line.
        let command = match input {
            Some(input) => format!("{}\n{}", command, input),
            None => command.to_string(),
        };
        self.commands.lock().unwrap().push(command.clone());

        for (marker, hook) in &self.hooks {
            if command.contains(marker.as_str()) {
                hook();
            }
        }

        for (marker, stderr) in &self.failures {
            if command.contains(marker.as_str()) {
                sink.line(OutputLine::error(stderr.clone())).await;
                return Ok(RunOutcome::Failed {
                    exit_code: Some(1),
                    stderr: stderr.clone(),
                });
            }
        }

        if command.contains("git log") {
            sink.line(OutputLine::success(COMMIT_LINE)).await;
            return Ok(RunOutcome::Succeeded);
        }

        if sink.line(OutputLine::success("working")).await == LineControl::Interrupt {
            return Ok(RunOutcome::Interrupted);
        }

        Ok(RunOutcome::Succeeded)
    }
}

pub fn server(id: &str, address: &str, deploy_code: bool, position: i64) -> Server {
    Server {
        id: id.to_string(),
        project_id: "p1".to_string(),
        name: id.to_string(),
        ip_address: address.to_string(),
        port: 22,
        username: "deploy".to_string(),
        path: "/var/www/shop/".to_string(),
        deploy_code,
        position,
    }
}

/// Two code servers and one server that only runs custom commands.
pub fn project() -> Project {
    Project {
        id: "p1".to_string(),
        name: "shop".to_string(),
        repository: "git@example.com:acme/shop.git".to_string(),
        branch: "main".to_string(),
        private_key: "-----BEGIN KEY-----".to_string(),
        builds_to_keep: 5,
        include_dev: false,
        status: ProjectStatus::NotDeployed,
        last_run: None,
        created_at: Utc::now(),
        servers: vec![
            server("web-1", "10.0.0.1", true, 0),
            server("web-2", "10.0.0.2", true, 1),
            server("cron", "10.0.0.3", false, 2),
        ],
        variables: vec![Variable {
            id: "v1".to_string(),
            project_id: "p1".to_string(),
            name: "APP_ENV".to_string(),
            value: "production".to_string(),
        }],
        project_files: Vec::new(),
        shared_files: Vec::new(),
        commands: Vec::new(),
    }
}

pub fn command(id: &str, stage: Stage, script: &str) -> StepCommand {
    StepCommand {
        id: id.to_string(),
        project_id: "p1".to_string(),
        name: id.to_string(),
        script: script.to_string(),
        username: None,
        stage,
        position: 0,
    }
}

pub fn deployment(id: &str, project: &Project) -> Deployment {
    Deployment {
        id: id.to_string(),
        project_id: project.id.clone(),
        release_id: RELEASE_ID.to_string(),
        status: DeploymentStatus::Pending,
        branch: project.branch.clone(),
        commit_sha: None,
        committer: None,
        committer_email: None,
        user_id: None,
        source: None,
        is_webhook: false,
        reason: None,
        started_at: None,
        finished_at: None,
        created_at: Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
        user: None,
        steps: crate::services::deployment_service::build_steps(project, id),
    }
}
