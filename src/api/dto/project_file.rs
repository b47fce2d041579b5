use crate::models::ProjectFile;
use crate::services::ProjectFileChanges;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CreateProjectFileRequest {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProjectFileRequest {
    pub name: Option<String>,
    pub path: Option<String>,
    pub content: Option<String>,
}

impl From<UpdateProjectFileRequest> for ProjectFileChanges {
    fn from(req: UpdateProjectFileRequest) -> Self {
        Self {
            name: req.name,
            path: req.path,
            content: req.content,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProjectFileResponse {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub path: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<ProjectFile> for ProjectFileResponse {
    fn from(file: ProjectFile) -> Self {
        Self {
            id: file.id,
            project_id: file.project_id,
            name: file.name,
            path: file.path,
            content: file.content,
            created_at: file.created_at.to_rfc3339(),
            updated_at: file.updated_at.to_rfc3339(),
        }
    }
}
