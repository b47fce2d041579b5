mod connection;
mod deployment_repository;
mod project_file_repository;
mod project_repository;
mod user_repository;

#[cfg(test)]
pub use connection::memory_pool;
pub use connection::establish_connection;
pub use deployment_repository::DeploymentRepository;
pub use project_file_repository::ProjectFileRepository;
pub use project_repository::ProjectRepository;
pub use user_repository::UserRepository;

pub type DbPool = sqlx::SqlitePool;
