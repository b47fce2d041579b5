use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Stage, StepCommand};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub repository: String,
    pub branch: String,
    #[serde(skip_serializing)]
    pub private_key: String,
    pub builds_to_keep: i64,
    pub include_dev: bool,
    pub status: ProjectStatus,
    pub last_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[sqlx(skip)]
    pub servers: Vec<Server>,
    #[sqlx(skip)]
    pub variables: Vec<Variable>,
    #[sqlx(skip)]
    pub project_files: Vec<ProjectFile>,
    #[sqlx(skip)]
    pub shared_files: Vec<SharedFile>,
    #[sqlx(skip)]
    pub commands: Vec<StepCommand>,
}

impl Project {
    pub fn server(&self, id: &str) -> Option<&Server> {
        self.servers.iter().find(|server| server.id == id)
    }

    /// Custom commands attached to a before/after slot, in position order.
    pub fn commands_for(&self, stage: Stage) -> Vec<&StepCommand> {
        let mut commands: Vec<&StepCommand> = self
            .commands
            .iter()
            .filter(|command| command.stage == stage)
            .collect();
        commands.sort_by_key(|command| command.position);
        commands
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[repr(i32)]
pub enum ProjectStatus {
    Finished = 0,
    Pending = 1,
    Deploying = 2,
    Failed = 3,
    NotDeployed = 4,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Server {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub ip_address: String,
    pub port: u16,
    pub username: String,
    pub path: String,
    /// Servers without this flag only take part in custom steps.
    pub deploy_code: bool,
    pub position: i64,
}

impl Server {
    /// Deploy path without a trailing slash.
    pub fn clean_path(&self) -> &str {
        let trimmed = self.path.trim_end_matches('/');
        if trimmed.is_empty() { "/" } else { trimmed }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Variable {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProjectFile {
    pub id: String,
    pub project_id: String,
    pub name: String,
    /// Target path relative to the release directory.
    pub path: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SharedFile {
    pub id: String,
    pub project_id: String,
    pub name: String,
    /// Path inside the release; a trailing slash marks a directory.
    pub file: String,
}
