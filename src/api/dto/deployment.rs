use crate::models::{Deployment, ServerLog, Step};
use crate::services::NewDeployment;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
pub struct QueueDeploymentRequest {
    pub branch: Option<String>,
    pub commit: Option<String>,
    pub committer: Option<String>,
    pub committer_email: Option<String>,
    pub user_id: Option<String>,
    pub source: Option<String>,
    #[serde(default)]
    pub is_webhook: bool,
    pub reason: Option<String>,
}

impl From<QueueDeploymentRequest> for NewDeployment {
    fn from(req: QueueDeploymentRequest) -> Self {
        Self {
            branch: req.branch,
            commit: req.commit,
            committer: req.committer,
            committer_email: req.committer_email,
            user_id: req.user_id,
            source: req.source,
            is_webhook: req.is_webhook,
            reason: req.reason,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ServerLogResponse {
    pub id: String,
    pub server_id: String,
    pub status: String,
    pub output: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl From<ServerLog> for ServerLogResponse {
    fn from(log: ServerLog) -> Self {
        Self {
            id: log.id,
            server_id: log.server_id,
            status: format!("{:?}", log.status),
            output: log.output,
            started_at: log.started_at.map(|t| t.to_rfc3339()),
            finished_at: log.finished_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StepResponse {
    pub id: String,
    pub stage: String,
    /// The custom command's name, or the stage for built-in steps.
    pub name: String,
    pub position: i64,
    pub logs: Vec<ServerLogResponse>,
}

impl From<Step> for StepResponse {
    fn from(step: Step) -> Self {
        let stage = format!("{:?}", step.stage);
        Self {
            id: step.id,
            name: step
                .command
                .map(|command| command.name)
                .unwrap_or_else(|| stage.clone()),
            stage,
            position: step.position,
            logs: step.logs.into_iter().map(ServerLogResponse::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeploymentResponse {
    pub id: String,
    pub project_id: String,
    pub release_id: String,
    pub status: String,
    pub branch: String,
    pub commit: Option<String>,
    pub short_commit: Option<String>,
    pub committer: Option<String>,
    pub committer_email: Option<String>,
    pub deployer_name: String,
    pub deployer_email: String,
    pub is_webhook: bool,
    pub reason: Option<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub created_at: String,
    pub steps: Vec<StepResponse>,
}

impl From<Deployment> for DeploymentResponse {
    fn from(deployment: Deployment) -> Self {
        let (deployer_name, deployer_email) = deployment.deployer();
        let short_commit = deployment.short_commit().map(str::to_string);

        Self {
            id: deployment.id,
            project_id: deployment.project_id,
            release_id: deployment.release_id,
            status: format!("{:?}", deployment.status),
            branch: deployment.branch,
            commit: deployment.commit_sha,
            short_commit,
            committer: deployment.committer,
            committer_email: deployment.committer_email,
            deployer_name,
            deployer_email,
            is_webhook: deployment.is_webhook,
            reason: deployment.reason,
            started_at: deployment.started_at.map(|t| t.to_rfc3339()),
            finished_at: deployment.finished_at.map(|t| t.to_rfc3339()),
            created_at: deployment.created_at.to_rfc3339(),
            steps: deployment
                .steps
                .into_iter()
                .map(StepResponse::from)
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeploymentsListResponse {
    pub data: Vec<DeploymentResponse>,
}
