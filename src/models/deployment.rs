use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{LogStatus, Step, User};

const SHORT_SHA_LEN: usize = 7;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Deployment {
    pub id: String,
    pub project_id: String,
    pub release_id: String,
    pub status: DeploymentStatus,
    pub branch: String,
    /// `None` until the commit has been resolved from the mirror.
    pub commit_sha: Option<String>,
    pub committer: Option<String>,
    pub committer_email: Option<String>,
    pub user_id: Option<String>,
    /// Name of the external trigger, e.g. a webhook integration.
    pub source: Option<String>,
    pub is_webhook: bool,
    pub reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[sqlx(skip)]
    pub user: Option<User>,
    #[sqlx(skip)]
    pub steps: Vec<Step>,
}

impl Deployment {
    pub fn short_commit(&self) -> Option<&str> {
        self.commit_sha
            .as_deref()
            .map(|sha| sha.get(..SHORT_SHA_LEN).unwrap_or(sha))
    }

    /// Who gets credited in scripts: the triggering user, else the webhook
    /// source, else the literal `webhook`.
    pub fn deployer(&self) -> (String, String) {
        if let Some(user) = &self.user {
            return (user.name.clone(), user.email.clone());
        }

        match &self.source {
            Some(source) if self.is_webhook && !source.is_empty() => {
                (source.clone(), String::new())
            }
            _ => ("webhook".to_string(), String::new()),
        }
    }

    pub fn pending_logs_mut(&mut self) -> impl Iterator<Item = &mut super::ServerLog> {
        self.steps
            .iter_mut()
            .flat_map(|step| step.logs.iter_mut())
            .filter(|log| log.status == LogStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[repr(i32)]
pub enum DeploymentStatus {
    Pending = 0,
    Deploying = 1,
    Completed = 2,
    Failed = 3,
    CompletedWithErrors = 4,
    Aborting = 5,
    Aborted = 6,
}

impl DeploymentStatus {
    pub fn is_abortable(self) -> bool {
        matches!(self, DeploymentStatus::Pending | DeploymentStatus::Deploying)
    }
}
