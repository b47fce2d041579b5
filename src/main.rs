mod api;
mod config;
mod error;
mod executor;
mod models;
mod paths;
mod repository;
mod scripts;
mod services;

use crate::config::Config;
use crate::executor::{CommandRunner, ProcessExecutor};
use crate::repository::establish_connection;
use crate::services::{
    AbortRegistry, DeployQueue, DeploySettings, Deployer, DeploymentNotifier, DeploymentService,
    LogNotifier, ProjectFileService, WebhookNotifier,
};
use api::create_router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deployer=debug,tower_http=debug,axum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Starting deployer with config: {:?}", config);

    if let Some(path) = config.database_url.strip_prefix("sqlite:") {
        let path = std::path::Path::new(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Establish database connection
    let db_pool = establish_connection(&config.database_url).await?;
    tracing::info!("Database connected: {}", config.database_url);

    let settings = DeploySettings {
        scratch_dir: paths::storage_dir()?,
        mirrors_dir: paths::mirrors_dir()?,
        verbose: config.debug,
    };
    std::fs::create_dir_all(&settings.scratch_dir)?;
    std::fs::create_dir_all(&settings.mirrors_dir)?;

    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessExecutor::new(config.shell.clone()));
    let notifier: Arc<dyn DeploymentNotifier> = match &config.notify_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(LogNotifier),
    };
    let aborts = AbortRegistry::new();

    // Initialize services
    let deployer = Deployer::new(
        db_pool.clone(),
        runner,
        aborts.clone(),
        notifier,
        settings,
    );
    let queue = DeployQueue::spawn(deployer);
    let deployment_service = DeploymentService::new(db_pool.clone(), aborts, queue);
    let project_file_service = ProjectFileService::new(db_pool);

    // Create router
    let app = create_router(deployment_service, project_file_service);
    let app = app.layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let addr = addr.parse::<SocketAddr>()?;
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
