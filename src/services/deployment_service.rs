use chrono::Utc;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{
    Deployment, DeploymentStatus, LogStatus, Project, ProjectStatus, ServerLog, Stage, Step,
};
use crate::repository::{DbPool, DeploymentRepository, ProjectRepository, UserRepository};
use crate::services::abort_registry::AbortRegistry;
use crate::services::deploy_queue::DeployQueue;

/// What the caller asked for when queueing a deployment.
#[derive(Debug, Clone, Default)]
pub struct NewDeployment {
    /// Defaults to the project's branch.
    pub branch: Option<String>,
    /// Resolved from the branch head when absent.
    pub commit: Option<String>,
    pub committer: Option<String>,
    pub committer_email: Option<String>,
    pub user_id: Option<String>,
    pub source: Option<String>,
    pub is_webhook: bool,
    pub reason: Option<String>,
}

#[derive(Clone)]
pub struct DeploymentService {
    deployments: DeploymentRepository,
    projects: ProjectRepository,
    users: UserRepository,
    aborts: AbortRegistry,
    queue: DeployQueue,
}

impl DeploymentService {
    pub fn new(pool: DbPool, aborts: AbortRegistry, queue: DeployQueue) -> Self {
        Self {
            deployments: DeploymentRepository::new(pool.clone()),
            projects: ProjectRepository::new(pool.clone()),
            users: UserRepository::new(pool),
            aborts,
            queue,
        }
    }

    /// Records a pending deployment with its full step plan and hands it to
    /// the deploy worker.
    pub async fn queue_deployment(
        &self,
        project_id: &str,
        request: NewDeployment,
    ) -> Result<Deployment> {
        let mut project = self.projects.get(project_id).await?;

        let user = match &request.user_id {
            Some(user_id) => Some(self.users.get(user_id).await?.ok_or_else(|| {
                AppError::InvalidRequest(format!("Unknown user: {}", user_id))
            })?),
            None => None,
        };

        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let mut deployment = Deployment {
            steps: build_steps(&project, &id),
            id,
            project_id: project.id.clone(),
            release_id: now.format("%Y%m%d%H%M%S").to_string(),
            status: DeploymentStatus::Pending,
            branch: request
                .branch
                .filter(|branch| !branch.trim().is_empty())
                .unwrap_or_else(|| project.branch.clone()),
            commit_sha: request.commit.filter(|sha| !sha.trim().is_empty()),
            committer: request.committer,
            committer_email: request.committer_email,
            user_id: request.user_id,
            source: request.source,
            is_webhook: request.is_webhook,
            reason: request.reason,
            started_at: None,
            finished_at: None,
            created_at: now,
            user: None,
        };

        self.deployments.create(&deployment).await?;
        deployment.user = user;

        project.status = ProjectStatus::Pending;
        self.projects.update_status(&project).await?;

        self.queue.dispatch(&deployment.id)?;
        tracing::info!(
            deployment_id = %deployment.id,
            project = %project.name,
            "Deployment queued"
        );

        Ok(deployment)
    }

    pub async fn get_deployment(&self, id: &str) -> Result<Deployment> {
        self.deployments.get(id).await
    }

    pub async fn list_deployments(&self, project_id: &str) -> Result<Vec<Deployment>> {
        if !self.projects.exists(project_id).await? {
            return Err(AppError::ProjectNotFound(project_id.to_string()));
        }
        self.deployments.list_by_project(project_id).await
    }

    /// Marks the deployment as aborting and raises the abort flag. The
    /// running step notices the flag on its next output line, or when it
    /// finishes on the current server.
    pub async fn abort_deployment(&self, id: &str) -> Result<Deployment> {
        let mut deployment = self.deployments.get(id).await?;
        if !deployment.status.is_abortable() {
            return Err(AppError::InvalidRequest(format!(
                "Deployment {} cannot be aborted while {:?}",
                id, deployment.status
            )));
        }

        self.deployments
            .update_status(id, DeploymentStatus::Aborting)
            .await?;
        self.aborts.request(id);
        deployment.status = DeploymentStatus::Aborting;

        tracing::info!(deployment_id = %id, "Abort requested");
        Ok(deployment)
    }
}

/// The step plan: for every built-in stage, its `before` commands, the stage
/// itself, then its `after` commands. Built-in steps run on code servers
/// only; custom commands run on every server.
pub fn build_steps(project: &Project, deployment_id: &str) -> Vec<Step> {
    let mut steps = Vec::new();

    for stage in Stage::BUILT_IN {
        for command in project.commands_for(stage.before()) {
            let step = new_step(
                project,
                deployment_id,
                stage.before(),
                Some(command.id.clone()),
                steps.len(),
            );
            steps.push(step);
        }
        let step = new_step(project, deployment_id, stage, None, steps.len());
        steps.push(step);
        for command in project.commands_for(stage.after()) {
            let step = new_step(
                project,
                deployment_id,
                stage.after(),
                Some(command.id.clone()),
                steps.len(),
            );
            steps.push(step);
        }
    }

    steps
}

fn new_step(
    project: &Project,
    deployment_id: &str,
    stage: Stage,
    command_id: Option<String>,
    position: usize,
) -> Step {
    let step_id = Uuid::new_v4().to_string();
    let command = command_id
        .as_ref()
        .and_then(|id| project.commands.iter().find(|command| &command.id == id))
        .cloned();
    let custom = command_id.is_some();

    let logs = project
        .servers
        .iter()
        .filter(|server| custom || server.deploy_code)
        .enumerate()
        .map(|(index, server)| ServerLog {
            id: Uuid::new_v4().to_string(),
            step_id: step_id.clone(),
            server_id: server.id.clone(),
            status: LogStatus::Pending,
            output: String::new(),
            position: index as i64,
            started_at: None,
            finished_at: None,
        })
        .collect();

    Step {
        id: step_id,
        deployment_id: deployment_id.to_string(),
        stage,
        command_id,
        position: position as i64,
        command,
        logs,
    }
}
