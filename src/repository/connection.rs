use crate::repository::DbPool;
use anyhow::Result;

pub async fn establish_connection(database_url: &str) -> Result<DbPool> {
    let db_url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{}", database_url)
    };

    let connection_string = format!("{}?mode=rwc", db_url);
    let pool = sqlx::SqlitePool::connect(&connection_string).await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            repository TEXT NOT NULL,
            branch TEXT NOT NULL,
            private_key TEXT NOT NULL,
            builds_to_keep INTEGER NOT NULL DEFAULT 10,
            include_dev BOOLEAN NOT NULL DEFAULT 0,
            status INTEGER NOT NULL DEFAULT 4,
            last_run TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS servers (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            name TEXT NOT NULL,
            ip_address TEXT NOT NULL,
            port INTEGER NOT NULL DEFAULT 22,
            username TEXT NOT NULL,
            path TEXT NOT NULL,
            deploy_code BOOLEAN NOT NULL DEFAULT 1,
            position INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS variables (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            name TEXT NOT NULL,
            value TEXT NOT NULL,
            FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS project_files (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            name TEXT NOT NULL,
            path TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS shared_files (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            name TEXT NOT NULL,
            file TEXT NOT NULL,
            FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS commands (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            name TEXT NOT NULL,
            script TEXT NOT NULL,
            username TEXT,
            stage INTEGER NOT NULL,
            position INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS deployments (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            release_id TEXT NOT NULL,
            status INTEGER NOT NULL,
            branch TEXT NOT NULL,
            commit_sha TEXT,
            committer TEXT,
            committer_email TEXT,
            user_id TEXT,
            source TEXT,
            is_webhook BOOLEAN NOT NULL DEFAULT 0,
            reason TEXT,
            started_at TEXT,
            finished_at TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS deploy_steps (
            id TEXT PRIMARY KEY,
            deployment_id TEXT NOT NULL,
            stage INTEGER NOT NULL,
            command_id TEXT,
            position INTEGER NOT NULL,
            FOREIGN KEY (deployment_id) REFERENCES deployments(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS server_logs (
            id TEXT PRIMARY KEY,
            step_id TEXT NOT NULL,
            server_id TEXT NOT NULL,
            status INTEGER NOT NULL,
            output TEXT NOT NULL DEFAULT '',
            position INTEGER NOT NULL,
            started_at TEXT,
            finished_at TEXT,
            FOREIGN KEY (step_id) REFERENCES deploy_steps(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_servers_project_id ON servers(project_id);
        CREATE INDEX IF NOT EXISTS idx_deployments_project_id ON deployments(project_id);
        CREATE INDEX IF NOT EXISTS idx_deploy_steps_deployment_id ON deploy_steps(deployment_id);
        CREATE INDEX IF NOT EXISTS idx_server_logs_step_id ON server_logs(step_id);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Single-connection in-memory database; every pooled connection to
/// `sqlite::memory:` would otherwise see its own empty database.
#[cfg(test)]
pub async fn memory_pool() -> DbPool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    run_migrations(&pool).await.expect("migrations");
    pool
}
