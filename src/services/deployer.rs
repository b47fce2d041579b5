use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, Result};
use crate::executor::{ssh, CommandRunner, RunOutcome, SshTarget, TracingSink};
use crate::models::{
    Deployment, DeploymentStatus, LogStatus, Project, ProjectStatus, Server, Stage,
};
use crate::repository::{DeploymentRepository, ProjectRepository, UserRepository};
use crate::scripts::{self, ScriptParser, ScriptTokens};
use crate::services::abort_registry::AbortRegistry;
use crate::services::mirror::GitMirror;
use crate::services::notifier::DeploymentNotifier;
use crate::services::step_runner::{ReleasePaths, RunContext, StepOutcome, StepRunner};
use crate::services::transfer::FileTransfer;
use crate::services::workspace::DeployWorkspace;

#[derive(Debug, Clone)]
pub struct DeploySettings {
    /// Private keys and release archives live here for the length of a run.
    pub scratch_dir: PathBuf,
    pub mirrors_dir: PathBuf,
    pub verbose: bool,
}

/// Why the step sequence stopped early. `stage` is `None` when the run
/// stopped while preparing the release, before any step ran.
#[derive(Debug)]
struct Halt {
    stage: Option<Stage>,
    outcome: StepOutcome,
}

impl Halt {
    fn preparing(error: AppError) -> Self {
        Self {
            stage: None,
            outcome: StepOutcome::Failed(error.to_string()),
        }
    }
}

/// Runs one queued deployment from start to finish.
#[derive(Clone)]
pub struct Deployer {
    deployments: DeploymentRepository,
    projects: ProjectRepository,
    users: UserRepository,
    runner: Arc<dyn CommandRunner>,
    steps: StepRunner,
    mirror: GitMirror,
    scripts: ScriptParser,
    aborts: AbortRegistry,
    notifier: Arc<dyn DeploymentNotifier>,
    settings: DeploySettings,
}

impl Deployer {
    pub fn new(
        pool: crate::repository::DbPool,
        runner: Arc<dyn CommandRunner>,
        aborts: AbortRegistry,
        notifier: Arc<dyn DeploymentNotifier>,
        settings: DeploySettings,
    ) -> Self {
        let deployments = DeploymentRepository::new(pool.clone());
        let transfer = FileTransfer::new(runner.clone(), settings.scratch_dir.clone());
        let steps = StepRunner::new(
            deployments.clone(),
            runner.clone(),
            transfer,
            aborts.clone(),
            settings.verbose,
        );

        Self {
            deployments,
            projects: ProjectRepository::new(pool.clone()),
            users: UserRepository::new(pool),
            mirror: GitMirror::new(runner.clone(), settings.mirrors_dir.clone()),
            runner,
            steps,
            scripts: ScriptParser::new(),
            aborts,
            notifier,
            settings,
        }
    }

    /// Executes the deployment and returns it in its terminal state.
    ///
    /// Failures inside the pipeline are recorded on the deployment rather
    /// than returned; an `Err` here means the deployment could not be loaded.
    pub async fn run(&self, deployment_id: &str) -> Result<Deployment> {
        let mut deployment = self.deployments.get(deployment_id).await?;
        let mut project = self.projects.get(&deployment.project_id).await?;

        info!(
            deployment_id = %deployment.id,
            project_id = %project.id,
            branch = %deployment.branch,
            "Starting deployment"
        );

        let started = self.mark_deploying(&mut deployment, &mut project).await;
        let workspace = DeployWorkspace::prepare(&self.settings.scratch_dir, &project, &deployment);
        let halt = match (started, &workspace) {
            (Err(e), _) => Some(Halt::preparing(e)),
            (Ok(()), Ok(workspace)) => self.execute(&mut deployment, &project, workspace).await,
            (Ok(()), Err(e)) => Some(Halt::preparing(AppError::Configuration(format!(
                "Could not prepare workspace - {}",
                e
            )))),
        };

        self.resolve(&mut deployment, &mut project, halt, workspace.as_ref().ok())
            .await;
        self.finish(&mut deployment, &mut project).await;

        drop(workspace);
        Ok(deployment)
    }

    async fn mark_deploying(
        &self,
        deployment: &mut Deployment,
        project: &mut Project,
    ) -> Result<()> {
        // An abort requested while queued stays visible until a step consumes it.
        if deployment.status != DeploymentStatus::Aborting {
            deployment.status = DeploymentStatus::Deploying;
        }
        deployment.started_at = Some(Utc::now());
        self.deployments.update(deployment).await?;
        project.status = ProjectStatus::Deploying;
        self.projects.update_status(project).await
    }

    async fn execute(
        &self,
        deployment: &mut Deployment,
        project: &Project,
        workspace: &DeployWorkspace,
    ) -> Option<Halt> {
        if let Err(e) = self.prepare_release(deployment, project, workspace).await {
            return Some(Halt::preparing(e));
        }

        let mut steps = std::mem::take(&mut deployment.steps);
        let mut halt = None;
        {
            let ctx = RunContext {
                deployment: &*deployment,
                project,
                workspace,
            };

            for step in steps.iter_mut() {
                let outcome = match self.steps.run(&ctx, step).await {
                    Ok(outcome) => outcome,
                    Err(e) => StepOutcome::Failed(e.to_string()),
                };

                if outcome != StepOutcome::Completed {
                    halt = Some(Halt {
                        stage: Some(step.stage),
                        outcome,
                    });
                    break;
                }
            }
        }
        deployment.steps = steps;

        halt
    }

    /// Refreshes the mirror, resolves the commit and builds the archive.
    async fn prepare_release(
        &self,
        deployment: &mut Deployment,
        project: &Project,
        workspace: &DeployWorkspace,
    ) -> Result<()> {
        self.mirror.refresh(project, workspace.private_key()).await?;

        if deployment.commit_sha.is_none() {
            self.update_repo_info(deployment).await?;
        }

        let sha = deployment
            .commit_sha
            .clone()
            .ok_or_else(|| AppError::ArchiveBuild("no commit to archive".to_string()))?;
        self.mirror
            .create_archive(&project.id, &sha, workspace.archive_path())
            .await?;

        debug!("Built release archive {}", workspace.archive_path().display());
        Ok(())
    }

    async fn update_repo_info(&self, deployment: &mut Deployment) -> Result<()> {
        let details = self
            .mirror
            .commit_details(&deployment.project_id, &deployment.branch)
            .await?;

        if deployment.user_id.is_none() && deployment.source.is_none() {
            if let Some(user) = self.users.find_by_email(&details.email).await? {
                deployment.user_id = Some(user.id.clone());
                deployment.user = Some(user);
            }
        }

        deployment.commit_sha = Some(details.sha);
        deployment.committer = Some(details.committer);
        deployment.committer_email = Some(details.email);
        self.deployments.update(deployment).await
    }

    async fn resolve(
        &self,
        deployment: &mut Deployment,
        project: &mut Project,
        halt: Option<Halt>,
        workspace: Option<&DeployWorkspace>,
    ) {
        let Some(halt) = halt else {
            deployment.status = DeploymentStatus::Completed;
            project.status = ProjectStatus::Finished;
            return;
        };

        match &halt.outcome {
            StepOutcome::Cancelled => {
                info!(deployment_id = %deployment.id, "Deployment aborted");
                deployment.status = DeploymentStatus::Aborted;
            }
            StepOutcome::Failed(reason) => {
                warn!(deployment_id = %deployment.id, "Deployment failed: {}", reason);
                deployment.status = DeploymentStatus::Failed;
            }
            StepOutcome::Completed => {}
        }
        project.status = ProjectStatus::Failed;

        self.cancel_pending_logs(deployment).await;

        match halt.stage {
            Some(stage) if stage.is_before_live() => {
                if let Some(workspace) = workspace {
                    self.cleanup_failed_release(deployment, project, workspace).await;
                }
            }
            Some(_) => {
                // The new release is already live; only post-activation work is missing.
                deployment.status = DeploymentStatus::CompletedWithErrors;
                project.status = ProjectStatus::Finished;
            }
            None => {}
        }
    }

    async fn cancel_pending_logs(&self, deployment: &mut Deployment) {
        for log in deployment.pending_logs_mut() {
            log.status = LogStatus::Cancelled;
            if let Err(e) = self.deployments.update_log(log).await {
                warn!("Failed to cancel log {}: {}", log.id, e);
            }
        }
    }

    /// Best effort: removes the half-built release from every code server.
    async fn cleanup_failed_release(
        &self,
        deployment: &Deployment,
        project: &Project,
        workspace: &DeployWorkspace,
    ) {
        for server in project.servers.iter().filter(|server| server.deploy_code) {
            match self.cleanup_server(deployment, server, workspace).await {
                Ok(RunOutcome::Succeeded) => {
                    debug!("Removed failed release from {}", server.name);
                }
                Ok(outcome) => {
                    warn!("Cleanup on {} did not succeed: {:?}", server.name, outcome);
                }
                Err(e) => {
                    warn!("Cleanup on {} failed: {}", server.name, e);
                }
            }
        }
    }

    async fn cleanup_server(
        &self,
        deployment: &Deployment,
        server: &Server,
        workspace: &DeployWorkspace,
    ) -> Result<RunOutcome> {
        let paths = ReleasePaths::new(server, &deployment.release_id, workspace.archive_name());
        let mut tokens = ScriptTokens::new();
        tokens
            .insert("project_path", &paths.project_path)
            .insert("release_path", &paths.release_path)
            .insert("remote_archive", &paths.remote_archive);

        let script = self.scripts.render(scripts::CLEANUP_FAILED_RELEASE, &tokens)?;
        let target = SshTarget::for_server(server, workspace.private_key(), None);
        let remote = ssh::wrap_script(&self.scripts, &target, &script, self.settings.verbose)?;

        let mut sink = TracingSink { label: &server.name };
        self.runner
            .run_with_input(&remote.command, Some(&remote.script), &mut sink)
            .await
    }

    async fn finish(&self, deployment: &mut Deployment, project: &mut Project) {
        let finished_at = Utc::now();
        deployment.finished_at = Some(finished_at);
        if let Err(e) = self.deployments.update(deployment).await {
            error!("Failed to save deployment {}: {}", deployment.id, e);
        }

        project.last_run = Some(finished_at);
        if let Err(e) = self.projects.update_status(project).await {
            error!("Failed to save project {}: {}", project.id, e);
        }

        // A request that arrived after the last cancellable step has nothing left to stop.
        self.aborts.take(&deployment.id);

        self.notifier.deployment_finished(project, deployment).await;

        info!(
            deployment_id = %deployment.id,
            status = ?deployment.status,
            "Deployment finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LogStatus, Step, User};
    use crate::repository::{DbPool, memory_pool};
    use crate::services::notifier::LogNotifier;
    use crate::services::test_support::{self, FakeRunner};

    struct Run {
        deployment: Deployment,
        project: Project,
        runner: Arc<FakeRunner>,
        aborts: AbortRegistry,
        scratch: tempfile::TempDir,
    }

    async fn seeded_pool(project: &Project) -> DbPool {
        let pool = memory_pool().await;
        ProjectRepository::new(pool.clone())
            .create(project)
            .await
            .unwrap();
        UserRepository::new(pool.clone())
            .create(&User {
                id: "u1".to_string(),
                name: "Ada Lovelace".to_string(),
                email: "ada@example.com".to_string(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        DeploymentRepository::new(pool.clone())
            .create(&test_support::deployment("d1", project))
            .await
            .unwrap();
        pool
    }

    async fn deploy(project: Project, runner: FakeRunner, aborts: AbortRegistry) -> Run {
        let pool = seeded_pool(&project).await;
        deploy_on(pool, runner, aborts).await
    }

    async fn deploy_on(pool: DbPool, runner: FakeRunner, aborts: AbortRegistry) -> Run {
        let scratch = tempfile::tempdir().unwrap();
        let runner = Arc::new(runner);
        let deployer = Deployer::new(
            pool.clone(),
            runner.clone(),
            aborts.clone(),
            Arc::new(LogNotifier),
            DeploySettings {
                scratch_dir: scratch.path().join("storage"),
                mirrors_dir: scratch.path().join("mirrors"),
                verbose: false,
            },
        );

        deployer.run("d1").await.unwrap();

        Run {
            deployment: DeploymentRepository::new(pool.clone()).get("d1").await.unwrap(),
            project: ProjectRepository::new(pool).get("p1").await.unwrap(),
            runner,
            aborts,
            scratch,
        }
    }

    fn all_cancelled(deployment: &Deployment) -> bool {
        deployment
            .steps
            .iter()
            .flat_map(|step| &step.logs)
            .all(|log| log.status == LogStatus::Cancelled)
    }

    fn step(deployment: &Deployment, stage: Stage) -> &Step {
        deployment
            .steps
            .iter()
            .find(|step| step.stage == stage)
            .unwrap()
    }

    fn statuses(step: &Step) -> Vec<LogStatus> {
        step.logs.iter().map(|log| log.status).collect()
    }

    fn scratch_is_empty(run: &Run) -> bool {
        std::fs::read_dir(run.scratch.path().join("storage"))
            .unwrap()
            .next()
            .is_none()
    }

    #[tokio::test]
    async fn successful_deployment_runs_every_stage() {
        let run = deploy(test_support::project(), FakeRunner::new(), AbortRegistry::new()).await;

        assert_eq!(run.deployment.status, DeploymentStatus::Completed);
        assert_eq!(run.project.status, ProjectStatus::Finished);
        assert!(run.project.last_run.is_some());
        assert!(run.deployment.finished_at.is_some());

        assert_eq!(run.deployment.commit_sha.as_deref(), Some("0123456789abcdef"));
        assert_eq!(run.deployment.committer.as_deref(), Some("Ada Lovelace"));
        assert_eq!(run.deployment.user_id.as_deref(), Some("u1"));

        for step in &run.deployment.steps {
            assert_eq!(step.logs.len(), 2);
            assert!(step.logs.iter().all(|log| log.status == LogStatus::Completed));
        }

        assert_eq!(run.runner.count("git fetch --all"), 1);
        assert_eq!(run.runner.count("git archive --format=tar 0123456789abcdef"), 1);
        assert_eq!(run.runner.count("rsync"), 2);
        assert_eq!(run.runner.count("# Create the new release"), 2);
        assert_eq!(run.runner.count("# Install dependencies"), 2);
        assert_eq!(run.runner.count("# Activate the release"), 2);
        assert_eq!(run.runner.count("# Purge old releases"), 2);
        assert_eq!(run.runner.count("# Clean up failed release"), 0);
        assert_eq!(run.runner.count("export APP_ENV=production"), 8);
        assert!(scratch_is_empty(&run));
    }

    #[tokio::test]
    async fn activation_failure_cleans_up_code_servers() {
        let runner = FakeRunner::new().fail_on("# Activate the release", "ln: permission denied");
        let run = deploy(test_support::project(), runner, AbortRegistry::new()).await;

        assert_eq!(run.deployment.status, DeploymentStatus::Failed);
        assert_eq!(run.project.status, ProjectStatus::Failed);

        let activate = step(&run.deployment, Stage::DoActivate);
        assert_eq!(statuses(activate), vec![LogStatus::Failed, LogStatus::Cancelled]);
        assert!(activate.logs[0].output.contains("<error>ln: permission denied</error>"));
        assert_eq!(
            statuses(step(&run.deployment, Stage::DoPurge)),
            vec![LogStatus::Cancelled, LogStatus::Cancelled]
        );

        assert_eq!(run.runner.count("# Activate the release"), 1);
        assert_eq!(run.runner.count("# Clean up failed release"), 2);
        assert!(scratch_is_empty(&run));
    }

    #[tokio::test]
    async fn abort_during_install_interrupts_and_cleans_up() {
        let aborts = AbortRegistry::new();
        let trigger = aborts.clone();
        let runner = FakeRunner::new().on("# Install dependencies", move || trigger.request("d1"));
        let run = deploy(test_support::project(), runner, aborts).await;

        assert_eq!(run.deployment.status, DeploymentStatus::Aborted);
        assert_eq!(run.project.status, ProjectStatus::Failed);

        let install = step(&run.deployment, Stage::DoInstall);
        assert_eq!(statuses(install), vec![LogStatus::Cancelled, LogStatus::Cancelled]);
        assert!(install.logs[0].output.contains("<error>SIGINT</error>"));
        assert_eq!(
            statuses(step(&run.deployment, Stage::DoActivate)),
            vec![LogStatus::Cancelled, LogStatus::Cancelled]
        );

        assert_eq!(run.runner.count("# Activate the release"), 0);
        assert_eq!(run.runner.count("# Clean up failed release"), 2);
        assert!(!run.aborts.is_requested("d1"));
    }

    #[tokio::test]
    async fn abort_after_activation_is_ignored() {
        let aborts = AbortRegistry::new();
        let trigger = aborts.clone();
        let runner = FakeRunner::new().on("# Purge old releases", move || trigger.request("d1"));
        let run = deploy(test_support::project(), runner, aborts).await;

        assert_eq!(run.deployment.status, DeploymentStatus::Completed);
        assert_eq!(
            statuses(step(&run.deployment, Stage::DoPurge)),
            vec![LogStatus::Completed, LogStatus::Completed]
        );
        assert!(!run.aborts.is_requested("d1"));
    }

    #[tokio::test]
    async fn purge_failure_completes_with_errors_without_cleanup() {
        let runner = FakeRunner::new().fail_on("# Purge old releases", "rm: busy");
        let run = deploy(test_support::project(), runner, AbortRegistry::new()).await;

        assert_eq!(run.deployment.status, DeploymentStatus::CompletedWithErrors);
        assert_eq!(run.project.status, ProjectStatus::Finished);
        assert_eq!(
            statuses(step(&run.deployment, Stage::DoPurge)),
            vec![LogStatus::Failed, LogStatus::Cancelled]
        );
        assert_eq!(run.runner.count("# Clean up failed release"), 0);
    }

    #[tokio::test]
    async fn mirror_failure_fails_before_any_step() {
        let runner = FakeRunner::new().fail_on("git fetch --all", "could not read from remote");
        let run = deploy(test_support::project(), runner, AbortRegistry::new()).await;

        assert_eq!(run.deployment.status, DeploymentStatus::Failed);
        assert_eq!(run.project.status, ProjectStatus::Failed);
        assert!(all_cancelled(&run.deployment));
        assert_eq!(run.runner.count("git archive"), 0);
        assert_eq!(run.runner.count("# Clean up failed release"), 0);
        assert!(scratch_is_empty(&run));
    }

    #[tokio::test]
    async fn custom_commands_run_on_every_server_as_their_user() {
        let mut project = test_support::project();
        let mut migrate = test_support::command(
            "migrate",
            Stage::AfterActivate,
            "php artisan migrate --release={release} --by={deployer_name}",
        );
        migrate.username = Some("www-data".to_string());
        project.commands.push(migrate);

        let run = deploy(project, FakeRunner::new(), AbortRegistry::new()).await;

        assert_eq!(run.deployment.status, DeploymentStatus::Completed);
        let custom = step(&run.deployment, Stage::AfterActivate);
        assert_eq!(custom.logs.len(), 3);
        assert_eq!(
            run.runner
                .count("php artisan migrate --release=20260101120000 --by='Ada Lovelace'"),
            3
        );
        assert_eq!(run.runner.count("www-data@10.0.0.3"), 1);
    }

    #[tokio::test]
    async fn invalid_variable_name_fails_the_first_step() {
        let mut project = test_support::project();
        project.variables[0].name = "APP-ENV".to_string();

        let run = deploy(project, FakeRunner::new(), AbortRegistry::new()).await;

        assert_eq!(run.deployment.status, DeploymentStatus::Failed);
        let clone = step(&run.deployment, Stage::DoClone);
        assert_eq!(clone.logs[0].status, LogStatus::Failed);
        assert!(clone.logs[0].output.contains("[10.0.0.1]: "));
        assert!(clone.logs[0].output.contains("Invalid variable name: APP-ENV"));
        assert_eq!(run.runner.count("# Clean up failed release"), 2);
    }

    #[tokio::test]
    async fn commit_lookup_failure_fails_before_any_step() {
        let runner = FakeRunner::new().fail_on("git log", "unknown revision");
        let run = deploy(test_support::project(), runner, AbortRegistry::new()).await;

        assert_eq!(run.deployment.status, DeploymentStatus::Failed);
        assert!(run.deployment.commit_sha.is_none());
        assert!(all_cancelled(&run.deployment));
        assert_eq!(run.runner.count("git archive"), 0);
        assert_eq!(run.runner.count("rsync"), 0);
        assert_eq!(run.runner.count("# Clean up failed release"), 0);
        assert!(scratch_is_empty(&run));
    }

    #[tokio::test]
    async fn archive_failure_fails_before_any_step() {
        let runner = FakeRunner::new().fail_on("git archive", "fatal: not a tree object");
        let run = deploy(test_support::project(), runner, AbortRegistry::new()).await;

        assert_eq!(run.deployment.status, DeploymentStatus::Failed);
        assert_eq!(run.project.status, ProjectStatus::Failed);
        assert_eq!(run.deployment.commit_sha.as_deref(), Some("0123456789abcdef"));
        assert!(all_cancelled(&run.deployment));
        assert_eq!(run.runner.count("rsync"), 0);
        assert_eq!(run.runner.count("# Clean up failed release"), 0);
        assert!(scratch_is_empty(&run));
    }

    #[tokio::test]
    async fn archive_transfer_failure_fails_and_cleans_up() {
        let runner = FakeRunner::new().fail_on("rsync", "connection reset by peer");
        let run = deploy(test_support::project(), runner, AbortRegistry::new()).await;

        assert_eq!(run.deployment.status, DeploymentStatus::Failed);
        assert_eq!(run.project.status, ProjectStatus::Failed);

        let clone = step(&run.deployment, Stage::DoClone);
        assert_eq!(statuses(clone), vec![LogStatus::Failed, LogStatus::Cancelled]);
        assert!(clone.logs[0].output.contains("connection reset by peer"));
        for stage in [Stage::DoInstall, Stage::DoActivate, Stage::DoPurge] {
            assert_eq!(
                statuses(step(&run.deployment, stage)),
                vec![LogStatus::Cancelled, LogStatus::Cancelled]
            );
        }

        assert_eq!(run.runner.count("rsync"), 1);
        assert_eq!(run.runner.count("# Create the new release"), 0);
        assert_eq!(run.runner.count("# Clean up failed release"), 2);
        assert!(scratch_is_empty(&run));
    }

    #[tokio::test]
    async fn abort_after_activation_keeps_a_failing_exit() {
        let aborts = AbortRegistry::new();
        let trigger = aborts.clone();
        let runner = FakeRunner::new()
            .on("# Purge old releases", move || trigger.request("d1"))
            .fail_on("# Purge old releases", "rm: busy");
        let run = deploy(test_support::project(), runner, aborts).await;

        assert_eq!(run.deployment.status, DeploymentStatus::CompletedWithErrors);
        let purge = step(&run.deployment, Stage::DoPurge);
        assert_eq!(statuses(purge), vec![LogStatus::Failed, LogStatus::Cancelled]);
        assert!(!purge.logs[0].output.contains("SIGINT"));
        assert_eq!(run.runner.count("# Clean up failed release"), 0);
        assert!(!run.aborts.is_requested("d1"));
    }

    #[tokio::test]
    async fn failure_to_start_still_finishes_the_deployment() {
        let project = test_support::project();
        let pool = seeded_pool(&project).await;
        sqlx::query(
            r#"
            CREATE TRIGGER projects_read_only BEFORE UPDATE ON projects
            BEGIN
                SELECT RAISE(ABORT, 'projects are read only');
            END
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        let run = deploy_on(pool, FakeRunner::new(), AbortRegistry::new()).await;

        assert_eq!(run.deployment.status, DeploymentStatus::Failed);
        assert!(run.deployment.started_at.is_some());
        assert!(run.deployment.finished_at.is_some());
        assert!(all_cancelled(&run.deployment));
        assert!(run.runner.commands().is_empty());
        assert!(scratch_is_empty(&run));
    }
}
