use crate::api::dto::project_file::{
    CreateProjectFileRequest, ProjectFileResponse, UpdateProjectFileRequest,
};
use crate::api::routes::AppState;
use crate::error::Result;
use axum::{
    Json,
    extract::{Path, State},
};

pub async fn create_project_file(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(req): Json<CreateProjectFileRequest>,
) -> Result<Json<ProjectFileResponse>> {
    let file = state
        .project_file_service
        .create(&project_id, &req.name, &req.path, &req.content)
        .await?;
    Ok(Json(ProjectFileResponse::from(file)))
}

pub async fn update_project_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateProjectFileRequest>,
) -> Result<Json<ProjectFileResponse>> {
    let file = state.project_file_service.update(&id, req.into()).await?;
    Ok(Json(ProjectFileResponse::from(file)))
}

pub async fn delete_project_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state.project_file_service.delete(&id).await?;
    Ok(Json(serde_json::json!({
        "success": true
    })))
}
