use crate::api::dto::deployment::{
    DeploymentResponse, DeploymentsListResponse, QueueDeploymentRequest,
};
use crate::api::routes::AppState;
use crate::error::Result;
use axum::{
    Json,
    extract::{Path, State},
};

pub async fn queue_deployment(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(req): Json<QueueDeploymentRequest>,
) -> Result<Json<DeploymentResponse>> {
    let deployment = state
        .deployment_service
        .queue_deployment(&project_id, req.into())
        .await?;
    Ok(Json(DeploymentResponse::from(deployment)))
}

pub async fn list_deployments(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<DeploymentsListResponse>> {
    let deployments = state
        .deployment_service
        .list_deployments(&project_id)
        .await?;
    Ok(Json(DeploymentsListResponse {
        data: deployments
            .into_iter()
            .map(DeploymentResponse::from)
            .collect(),
    }))
}

pub async fn get_deployment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeploymentResponse>> {
    let deployment = state.deployment_service.get_deployment(&id).await?;
    Ok(Json(DeploymentResponse::from(deployment)))
}

pub async fn abort_deployment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeploymentResponse>> {
    let deployment = state.deployment_service.abort_deployment(&id).await?;
    Ok(Json(DeploymentResponse::from(deployment)))
}
