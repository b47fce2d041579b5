use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Deployment, DeploymentStatus, Project};

/// Told about every deployment that reaches a terminal state.
#[async_trait]
pub trait DeploymentNotifier: Send + Sync {
    async fn deployment_finished(&self, project: &Project, deployment: &Deployment);
}

/// Default notifier: a log line only.
pub struct LogNotifier;

#[async_trait]
impl DeploymentNotifier for LogNotifier {
    async fn deployment_finished(&self, project: &Project, deployment: &Deployment) {
        tracing::info!(
            project = %project.name,
            deployment_id = %deployment.id,
            status = ?deployment.status,
            "Deployment finished"
        );
    }
}

#[derive(Debug, Serialize)]
pub struct FinishedPayload {
    pub project_id: String,
    pub project_name: String,
    pub deployment_id: String,
    pub release_id: String,
    pub status: DeploymentStatus,
    pub branch: String,
    pub commit: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl FinishedPayload {
    pub fn new(project: &Project, deployment: &Deployment) -> Self {
        Self {
            project_id: project.id.clone(),
            project_name: project.name.clone(),
            deployment_id: deployment.id.clone(),
            release_id: deployment.release_id.clone(),
            status: deployment.status,
            branch: deployment.branch.clone(),
            commit: deployment.commit_sha.clone(),
            finished_at: deployment.finished_at,
        }
    }
}

/// POSTs a JSON summary to a configured URL. Delivery happens in the
/// background; failures are logged and never reach the deployment.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl DeploymentNotifier for WebhookNotifier {
    async fn deployment_finished(&self, project: &Project, deployment: &Deployment) {
        let payload = FinishedPayload::new(project, deployment);
        let client = self.client.clone();
        let url = self.url.clone();

        tokio::spawn(async move {
            match client.post(&url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!("Notified {} about deployment {}", url, payload.deployment_id);
                }
                Ok(response) => {
                    tracing::warn!("Notification to {} returned {}", url, response.status());
                }
                Err(e) => {
                    tracing::warn!("Notification to {} failed: {}", url, e);
                }
            }
        });
    }
}
