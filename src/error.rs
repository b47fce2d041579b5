use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Deployment not found: {0}")]
    DeploymentNotFound(String),

    #[error("Project file not found: {0}")]
    ProjectFileNotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Could not refresh repository mirror - {0}")]
    MirrorRefresh(String),

    #[error("Could not get repository info - {0}")]
    MetadataFetch(String),

    #[error("Could not create release archive - {0}")]
    ArchiveBuild(String),

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Remote command failed: {0}")]
    RemoteExecution(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            AppError::ProjectNotFound(id) => {
                (StatusCode::NOT_FOUND, format!("Project '{}' not found", id))
            }
            AppError::DeploymentNotFound(id) => (
                StatusCode::NOT_FOUND,
                format!("Deployment '{}' not found", id),
            ),
            AppError::ProjectFileNotFound(id) => (
                StatusCode::NOT_FOUND,
                format!("Project file '{}' not found", id),
            ),
            AppError::InvalidRequest(e) => (StatusCode::CONFLICT, e),
            AppError::Configuration(e) => (StatusCode::BAD_REQUEST, e),
            err @ (AppError::MirrorRefresh(_)
            | AppError::MetadataFetch(_)
            | AppError::ArchiveBuild(_)
            | AppError::Transfer(_)
            | AppError::RemoteExecution(_)) => {
                tracing::error!("{}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };

        let body = json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
