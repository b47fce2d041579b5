use super::handlers::{deployment, health, project_file};
use super::middleware::cors::add_cors;
use crate::services::{DeploymentService, ProjectFileService};
use axum::{
    Router,
    routing::{get, post, put},
};

#[derive(Clone)]
pub struct AppState {
    pub deployment_service: DeploymentService,
    pub project_file_service: ProjectFileService,
}

pub fn create_router(
    deployment_service: DeploymentService,
    project_file_service: ProjectFileService,
) -> Router {
    let state = AppState {
        deployment_service,
        project_file_service,
    };

    let api_routes = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Deployments
        .route(
            "/api/projects/{id}/deployments",
            post(deployment::queue_deployment).get(deployment::list_deployments),
        )
        .route("/api/deployments/{id}", get(deployment::get_deployment))
        .route(
            "/api/deployments/{id}/abort",
            put(deployment::abort_deployment),
        )
        // Project files
        .route(
            "/api/projects/{id}/files",
            post(project_file::create_project_file),
        )
        .route(
            "/api/files/{id}",
            put(project_file::update_project_file).delete(project_file::delete_project_file),
        )
        .with_state(state);

    add_cors(api_routes)
}
