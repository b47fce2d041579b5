use crate::error::{AppError, Result};
use crate::models::{Project, ProjectFile, Server, SharedFile, StepCommand, Variable};
use crate::repository::DbPool;

#[derive(Clone)]
pub struct ProjectRepository {
    pool: DbPool,
}

impl ProjectRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Loads a project with everything a deployment needs.
    pub async fn get(&self, id: &str) -> Result<Project> {
        let mut project = sqlx::query_as::<_, Project>(
            r#"
            SELECT id, name, repository, branch, private_key, builds_to_keep, include_dev,
                   status, last_run, created_at
            FROM projects
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::ProjectNotFound(id.to_string()))?;

        project.servers = sqlx::query_as::<_, Server>(
            "SELECT * FROM servers WHERE project_id = ? ORDER BY position, name",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        // Exported in the order they were configured.
        project.variables = sqlx::query_as::<_, Variable>(
            "SELECT * FROM variables WHERE project_id = ? ORDER BY rowid",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        project.project_files = sqlx::query_as::<_, ProjectFile>(
            "SELECT * FROM project_files WHERE project_id = ? ORDER BY name",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        project.shared_files = sqlx::query_as::<_, SharedFile>(
            "SELECT * FROM shared_files WHERE project_id = ? ORDER BY name",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        project.commands = sqlx::query_as::<_, StepCommand>(
            "SELECT * FROM commands WHERE project_id = ? ORDER BY stage, position",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(project)
    }

    pub async fn exists(&self, id: &str) -> Result<bool> {
        let found: Option<(String,)> = sqlx::query_as("SELECT id FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// Inserts the project and all attached records in one transaction.
    pub async fn create(&self, project: &Project) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO projects (
                id, name, repository, branch, private_key, builds_to_keep, include_dev,
                status, last_run, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&project.id)
        .bind(&project.name)
        .bind(&project.repository)
        .bind(&project.branch)
        .bind(&project.private_key)
        .bind(project.builds_to_keep)
        .bind(project.include_dev)
        .bind(project.status as i32)
        .bind(project.last_run)
        .bind(project.created_at)
        .execute(&mut *tx)
        .await?;

        for server in &project.servers {
            sqlx::query(
                r#"
                INSERT INTO servers (
                    id, project_id, name, ip_address, port, username, path, deploy_code, position
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&server.id)
            .bind(&project.id)
            .bind(&server.name)
            .bind(&server.ip_address)
            .bind(server.port)
            .bind(&server.username)
            .bind(&server.path)
            .bind(server.deploy_code)
            .bind(server.position)
            .execute(&mut *tx)
            .await?;
        }

        for variable in &project.variables {
            sqlx::query("INSERT INTO variables (id, project_id, name, value) VALUES (?, ?, ?, ?)")
                .bind(&variable.id)
                .bind(&project.id)
                .bind(&variable.name)
                .bind(&variable.value)
                .execute(&mut *tx)
                .await?;
        }

        for file in &project.project_files {
            sqlx::query(
                r#"
                INSERT INTO project_files (
                    id, project_id, name, path, content, created_at, updated_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&file.id)
            .bind(&project.id)
            .bind(&file.name)
            .bind(&file.path)
            .bind(&file.content)
            .bind(file.created_at)
            .bind(file.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        for shared in &project.shared_files {
            sqlx::query("INSERT INTO shared_files (id, project_id, name, file) VALUES (?, ?, ?, ?)")
                .bind(&shared.id)
                .bind(&project.id)
                .bind(&shared.name)
                .bind(&shared.file)
                .execute(&mut *tx)
                .await?;
        }

        for command in &project.commands {
            sqlx::query(
                r#"
                INSERT INTO commands (id, project_id, name, script, username, stage, position)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&command.id)
            .bind(&project.id)
            .bind(&command.name)
            .bind(&command.script)
            .bind(&command.username)
            .bind(command.stage as i32)
            .bind(command.position)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn update_status(&self, project: &Project) -> Result<()> {
        sqlx::query("UPDATE projects SET status = ?, last_run = ? WHERE id = ?")
            .bind(project.status as i32)
            .bind(project.last_run)
            .bind(&project.id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory_pool;
    use crate::services::test_support;

    #[tokio::test]
    async fn variables_keep_their_configured_order() {
        let pool = memory_pool().await;
        let repo = ProjectRepository::new(pool);

        let mut project = test_support::project();
        for (id, name) in [("v2", "ZONE"), ("v3", "BASE_URL")] {
            project.variables.push(Variable {
                id: id.to_string(),
                project_id: "p1".to_string(),
                name: name.to_string(),
                value: "x".to_string(),
            });
        }
        repo.create(&project).await.unwrap();

        let loaded = repo.get("p1").await.unwrap();
        let names: Vec<&str> = loaded.variables.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["APP_ENV", "ZONE", "BASE_URL"]);
        assert_eq!(loaded.servers.len(), 3);
    }
}
