use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::executor::{ssh, CommandRunner, LineControl, OutputSink, RunOutcome, SshTarget};
use crate::models::{Deployment, LogStatus, OutputLine, Project, Server, ServerLog, Stage, Step};
use crate::repository::DeploymentRepository;
use crate::scripts::shell::{is_valid_identifier, quote_arg};
use crate::scripts::{self, ScriptParser, ScriptTokens};
use crate::services::abort_registry::AbortRegistry;
use crate::services::transfer::{self, FileTransfer};
use crate::services::workspace::DeployWorkspace;

/// How a step ended across all of its servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

/// Everything a step needs to know about the run it belongs to.
pub struct RunContext<'a> {
    pub deployment: &'a Deployment,
    pub project: &'a Project,
    pub workspace: &'a DeployWorkspace,
}

/// Remote directory layout of one server for one release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasePaths {
    pub project_path: String,
    pub releases_path: String,
    pub release_path: String,
    pub shared_path: String,
    pub remote_archive: String,
}

impl ReleasePaths {
    pub fn new(server: &Server, release_id: &str, archive_name: &str) -> Self {
        let project_path = server.clean_path().to_string();
        let releases_path = format!("{}/releases", project_path);
        Self {
            release_path: format!("{}/{}", releases_path, release_id),
            shared_path: format!("{}/shared", project_path),
            remote_archive: format!("{}/{}", project_path, archive_name),
            releases_path,
            project_path,
        }
    }
}

#[derive(Clone)]
pub struct StepRunner {
    deployments: DeploymentRepository,
    runner: Arc<dyn CommandRunner>,
    transfer: FileTransfer,
    scripts: ScriptParser,
    aborts: AbortRegistry,
    verbose: bool,
}

impl StepRunner {
    pub fn new(
        deployments: DeploymentRepository,
        runner: Arc<dyn CommandRunner>,
        transfer: FileTransfer,
        aborts: AbortRegistry,
        verbose: bool,
    ) -> Self {
        Self {
            deployments,
            runner,
            transfer,
            scripts: ScriptParser::new(),
            aborts,
            verbose,
        }
    }

    /// Runs the step on each of its servers in order. Stops at the first
    /// server that fails or is cancelled; the remaining logs stay pending.
    pub async fn run(&self, ctx: &RunContext<'_>, step: &mut Step) -> Result<StepOutcome> {
        let mut logs = std::mem::take(&mut step.logs);
        let outcome = self.run_logs(ctx, step, &mut logs).await;
        step.logs = logs;
        outcome
    }

    async fn run_logs(
        &self,
        ctx: &RunContext<'_>,
        step: &Step,
        logs: &mut [ServerLog],
    ) -> Result<StepOutcome> {
        for log in logs.iter_mut() {
            match self.run_log(ctx, step, log).await? {
                LogStatus::Failed => {
                    let server = self.server_label(ctx, &log.server_id);
                    return Ok(StepOutcome::Failed(format!(
                        "{:?} failed on {}",
                        step.stage, server
                    )));
                }
                LogStatus::Cancelled => return Ok(StepOutcome::Cancelled),
                _ => {}
            }
        }
        Ok(StepOutcome::Completed)
    }

    async fn run_log(
        &self,
        ctx: &RunContext<'_>,
        step: &Step,
        log: &mut ServerLog,
    ) -> Result<LogStatus> {
        log.status = LogStatus::Running;
        log.started_at = Some(Utc::now());
        self.deployments.update_log(log).await?;

        debug!(
            deployment_id = %ctx.deployment.id,
            stage = ?step.stage,
            server_id = %log.server_id,
            "Running step"
        );

        let failed = match self.execute(ctx, step, log).await {
            Ok(outcome) => !outcome.is_success(),
            Err(e) => {
                let server = self.server_label(ctx, &log.server_id);
                log.append(&OutputLine::error(format!("[{}]: {}", server, e)));
                true
            }
        };

        let cancelled = self.aborts.take(&ctx.deployment.id) && step.stage.is_before_live();
        log.status = if cancelled {
            LogStatus::Cancelled
        } else if failed {
            LogStatus::Failed
        } else {
            LogStatus::Completed
        };
        log.finished_at = Some(Utc::now());
        self.deployments.update_log(log).await?;

        Ok(log.status)
    }

    async fn execute(
        &self,
        ctx: &RunContext<'_>,
        step: &Step,
        log: &mut ServerLog,
    ) -> Result<RunOutcome> {
        let server = ctx.project.server(&log.server_id).ok_or_else(|| {
            AppError::Configuration(format!("Server {} is not part of the project", log.server_id))
        })?;
        let paths = ReleasePaths::new(
            server,
            &ctx.deployment.release_id,
            ctx.workspace.archive_name(),
        );

        self.send_files(ctx, step, server, &paths, log).await?;

        let script = self.build_script(ctx, step, &paths)?;
        if script.is_empty() {
            return Ok(RunOutcome::Succeeded);
        }

        let username = step.command.as_ref().and_then(|command| command.username.as_deref());
        let target = SshTarget::for_server(server, ctx.workspace.private_key(), username);
        let remote = ssh::wrap_script(&self.scripts, &target, &script, self.verbose)?;

        let abort = step
            .stage
            .is_before_live()
            .then(|| (&self.aborts, ctx.deployment.id.as_str()));
        let mut sink = LogSink::new(log, &self.deployments, abort);
        self.runner
            .run_with_input(&remote.command, Some(&remote.script), &mut sink)
            .await
    }

    async fn send_files(
        &self,
        ctx: &RunContext<'_>,
        step: &Step,
        server: &Server,
        paths: &ReleasePaths,
        log: &mut ServerLog,
    ) -> Result<()> {
        let target = SshTarget::for_server(server, ctx.workspace.private_key(), None);
        let mut sink = LogSink::new(log, &self.deployments, None);

        match step.stage {
            Stage::DoClone => {
                self.transfer
                    .send_file(
                        ctx.workspace.archive_path(),
                        &paths.remote_archive,
                        &target,
                        &mut sink,
                    )
                    .await
            }
            Stage::DoInstall => {
                for file in &ctx.project.project_files {
                    let remote =
                        format!("{}/{}", paths.release_path, file.path.trim_start_matches('/'));
                    self.transfer
                        .send_content(&file.content, &remote, &target, &mut sink)
                        .await?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Variable exports followed by the step body.
    fn build_script(
        &self,
        ctx: &RunContext<'_>,
        step: &Step,
        paths: &ReleasePaths,
    ) -> Result<String> {
        let mut script = String::new();
        for variable in &ctx.project.variables {
            if !is_valid_identifier(&variable.name) {
                return Err(AppError::Configuration(format!(
                    "Invalid variable name: {}",
                    variable.name
                )));
            }
            script.push_str(&format!("export {}={}\n", variable.name, quote_arg(&variable.value)));
        }
        script.push('\n');

        let tokens = step_tokens(ctx, step, paths);
        script.push_str(&self.step_body(ctx, step, paths, &tokens)?);

        Ok(script.trim().to_string())
    }

    fn step_body(
        &self,
        ctx: &RunContext<'_>,
        step: &Step,
        paths: &ReleasePaths,
        tokens: &ScriptTokens,
    ) -> Result<String> {
        if let Some(command) = &step.command {
            return Ok(self.scripts.render_str(&command.script, tokens));
        }
        if step.is_custom() {
            return Err(AppError::Configuration(format!(
                "Command for step {} no longer exists",
                step.id
            )));
        }

        match step.stage {
            Stage::DoClone => self.scripts.render(scripts::CREATE_RELEASE, tokens),
            Stage::DoInstall => Ok(format!(
                "{}{}{}",
                transfer::config_file_commands(&paths.release_path, &ctx.project.project_files),
                self.scripts.render(scripts::INSTALL_DEPENDENCIES, tokens)?,
                transfer::shared_file_commands(
                    &paths.release_path,
                    &paths.shared_path,
                    &ctx.project.shared_files
                ),
            )),
            Stage::DoActivate => self.scripts.render(scripts::ACTIVATE_RELEASE, tokens),
            Stage::DoPurge => self.scripts.render(scripts::PURGE_OLD_RELEASES, tokens),
            other => Err(AppError::Configuration(format!(
                "No built-in script for {:?}",
                other
            ))),
        }
    }

    fn server_label(&self, ctx: &RunContext<'_>, server_id: &str) -> String {
        ctx.project
            .server(server_id)
            .map(|server| server.ip_address.clone())
            .unwrap_or_else(|| server_id.to_string())
    }
}

fn step_tokens(ctx: &RunContext<'_>, step: &Step, paths: &ReleasePaths) -> ScriptTokens {
    let deployment = ctx.deployment;
    let (deployer_name, deployer_email) = deployment.deployer();

    let mut tokens = ScriptTokens::new();
    tokens
        .insert("release", &deployment.release_id)
        .insert("release_path", &paths.release_path)
        .insert("project_path", &paths.project_path)
        .insert("branch", &deployment.branch)
        .insert("sha", deployment.commit_sha.as_deref().unwrap_or_default())
        .insert("short_sha", deployment.short_commit().unwrap_or_default())
        .insert("deployer_name", deployer_name)
        .insert("deployer_email", deployer_email)
        .insert("committer_name", deployment.committer.as_deref().unwrap_or_default())
        .insert("committer_email", deployment.committer_email.as_deref().unwrap_or_default());

    if !step.is_custom() {
        let include_dev = if ctx.project.include_dev { "1" } else { "" };
        tokens
            .insert("remote_archive", &paths.remote_archive)
            .insert("include_dev", include_dev)
            .insert("builds_to_keep", (ctx.project.builds_to_keep + 1).to_string())
            .insert("shared_path", &paths.shared_path)
            .insert("releases_path", &paths.releases_path);
    }

    tokens
}

/// Appends each line to the server log and persists it, and turns a pending
/// abort into an interrupt.
struct LogSink<'a> {
    log: &'a mut ServerLog,
    deployments: &'a DeploymentRepository,
    abort: Option<(&'a AbortRegistry, &'a str)>,
    interrupted: bool,
}

impl<'a> LogSink<'a> {
    fn new(
        log: &'a mut ServerLog,
        deployments: &'a DeploymentRepository,
        abort: Option<(&'a AbortRegistry, &'a str)>,
    ) -> Self {
        Self {
            log,
            deployments,
            abort,
            interrupted: false,
        }
    }
}

#[async_trait]
impl OutputSink for LogSink<'_> {
    async fn line(&mut self, line: OutputLine) -> LineControl {
        self.log.append(&line);

        let mut control = LineControl::Continue;
        if let Some((aborts, deployment_id)) = self.abort {
            if !self.interrupted && aborts.is_requested(deployment_id) {
                self.interrupted = true;
                self.log.append(&OutputLine::error("SIGINT"));
                control = LineControl::Interrupt;
            }
        }

        if let Err(e) = self.deployments.update_log(self.log).await {
            warn!("Failed to save output for log {}: {}", self.log.id, e);
        }
        control
    }
}
