use chrono::Utc;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::ProjectFile;
use crate::repository::{DbPool, ProjectFileRepository, ProjectRepository};

/// Fields a caller may set on a project file.
#[derive(Debug, Clone, Default)]
pub struct ProjectFileChanges {
    pub name: Option<String>,
    pub path: Option<String>,
    pub content: Option<String>,
}

#[derive(Clone)]
pub struct ProjectFileService {
    files: ProjectFileRepository,
    projects: ProjectRepository,
}

impl ProjectFileService {
    pub fn new(pool: DbPool) -> Self {
        Self {
            files: ProjectFileRepository::new(pool.clone()),
            projects: ProjectRepository::new(pool),
        }
    }

    pub async fn create(
        &self,
        project_id: &str,
        name: &str,
        path: &str,
        content: &str,
    ) -> Result<ProjectFile> {
        if !self.projects.exists(project_id).await? {
            return Err(AppError::ProjectNotFound(project_id.to_string()));
        }

        let now = Utc::now();
        let file = ProjectFile {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            name: name.trim().to_string(),
            path: validate_path(path)?,
            content: content.to_string(),
            created_at: now,
            updated_at: now,
        };

        self.files.create(&file).await?;
        Ok(file)
    }

    pub async fn update(&self, id: &str, changes: ProjectFileChanges) -> Result<ProjectFile> {
        let mut file = self.files.get(id).await?;

        if let Some(name) = changes.name {
            file.name = name.trim().to_string();
        }
        if let Some(path) = changes.path {
            file.path = validate_path(&path)?;
        }
        if let Some(content) = changes.content {
            file.content = content;
        }

        self.files.update(&file).await?;
        self.files.get(id).await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.files.delete(id).await
    }
}

/// Project files are written relative to the release directory; anything
/// that could climb out of it is rejected.
fn validate_path(path: &str) -> Result<String> {
    let path = path.trim().trim_start_matches('/');
    if path.is_empty() || path.split('/').any(|part| part == "..") {
        return Err(AppError::Configuration(format!("Invalid file path: {}", path)));
    }
    Ok(path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Project, ProjectStatus};
    use crate::repository::memory_pool;

    async fn service_with_project() -> ProjectFileService {
        let pool = memory_pool().await;
        let project = Project {
            id: "p1".to_string(),
            name: "shop".to_string(),
            repository: "git@example.com:acme/shop.git".to_string(),
            branch: "main".to_string(),
            private_key: "KEY".to_string(),
            builds_to_keep: 5,
            include_dev: false,
            status: ProjectStatus::NotDeployed,
            last_run: None,
            created_at: Utc::now(),
            servers: Vec::new(),
            variables: Vec::new(),
            project_files: Vec::new(),
            shared_files: Vec::new(),
            commands: Vec::new(),
        };
        ProjectRepository::new(pool.clone()).create(&project).await.unwrap();
        ProjectFileService::new(pool)
    }

    #[tokio::test]
    async fn create_update_delete() {
        let service = service_with_project().await;

        let file = service.create("p1", "env", "/.env", "A=1").await.unwrap();
        assert_eq!(file.path, ".env");

        let updated = service
            .update(
                &file.id,
                ProjectFileChanges {
                    content: Some("A=2".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.content, "A=2");
        assert_eq!(updated.name, "env");

        service.delete(&file.id).await.unwrap();
        assert!(matches!(
            service.delete(&file.id).await,
            Err(AppError::ProjectFileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn rejects_unknown_project_and_escaping_paths() {
        let service = service_with_project().await;

        assert!(matches!(
            service.create("nope", "env", ".env", "").await,
            Err(AppError::ProjectNotFound(_))
        ));
        assert!(matches!(
            service.create("p1", "env", "../.env", "").await,
            Err(AppError::Configuration(_))
        ));
    }
}
