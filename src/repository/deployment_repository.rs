use crate::error::{AppError, Result};
use crate::models::{Deployment, DeploymentStatus, ServerLog, Step, StepCommand, User};
use crate::repository::DbPool;

#[derive(Clone)]
pub struct DeploymentRepository {
    pool: DbPool,
}

impl DeploymentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Inserts a deployment together with its steps and server logs.
    pub async fn create(&self, deployment: &Deployment) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO deployments (
                id, project_id, release_id, status, branch, commit_sha, committer,
                committer_email, user_id, source, is_webhook, reason, started_at,
                finished_at, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&deployment.id)
        .bind(&deployment.project_id)
        .bind(&deployment.release_id)
        .bind(deployment.status as i32)
        .bind(&deployment.branch)
        .bind(&deployment.commit_sha)
        .bind(&deployment.committer)
        .bind(&deployment.committer_email)
        .bind(&deployment.user_id)
        .bind(&deployment.source)
        .bind(deployment.is_webhook)
        .bind(&deployment.reason)
        .bind(deployment.started_at)
        .bind(deployment.finished_at)
        .bind(deployment.created_at)
        .execute(&mut *tx)
        .await?;

        for step in &deployment.steps {
            sqlx::query(
                r#"
                INSERT INTO deploy_steps (id, deployment_id, stage, command_id, position)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&step.id)
            .bind(&deployment.id)
            .bind(step.stage as i32)
            .bind(&step.command_id)
            .bind(step.position)
            .execute(&mut *tx)
            .await?;

            for log in &step.logs {
                sqlx::query(
                    r#"
                    INSERT INTO server_logs (
                        id, step_id, server_id, status, output, position, started_at, finished_at
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&log.id)
                .bind(&step.id)
                .bind(&log.server_id)
                .bind(log.status as i32)
                .bind(&log.output)
                .bind(log.position)
                .bind(log.started_at)
                .bind(log.finished_at)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Loads a deployment with its user, steps, commands and logs, all in
    /// execution order.
    pub async fn get(&self, id: &str) -> Result<Deployment> {
        let mut deployment =
            sqlx::query_as::<_, Deployment>("SELECT * FROM deployments WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| AppError::DeploymentNotFound(id.to_string()))?;

        if let Some(user_id) = &deployment.user_id {
            deployment.user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        }

        let mut steps = sqlx::query_as::<_, Step>(
            "SELECT * FROM deploy_steps WHERE deployment_id = ? ORDER BY position",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        for step in &mut steps {
            if let Some(command_id) = &step.command_id {
                step.command =
                    sqlx::query_as::<_, StepCommand>("SELECT * FROM commands WHERE id = ?")
                        .bind(command_id)
                        .fetch_optional(&self.pool)
                        .await?;
            }

            step.logs = sqlx::query_as::<_, ServerLog>(
                "SELECT * FROM server_logs WHERE step_id = ? ORDER BY position",
            )
            .bind(&step.id)
            .fetch_all(&self.pool)
            .await?;
        }

        deployment.steps = steps;
        Ok(deployment)
    }

    /// Deployments of a project, newest first, without steps.
    pub async fn list_by_project(&self, project_id: &str) -> Result<Vec<Deployment>> {
        let deployments = sqlx::query_as::<_, Deployment>(
            "SELECT * FROM deployments WHERE project_id = ? ORDER BY created_at DESC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(deployments)
    }

    /// Persists the deployment's own columns; steps and logs are saved
    /// through [`DeploymentRepository::update_log`].
    pub async fn update(&self, deployment: &Deployment) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE deployments
            SET status = ?, commit_sha = ?, committer = ?, committer_email = ?, user_id = ?,
                started_at = ?, finished_at = ?
            WHERE id = ?
            "#,
        )
        .bind(deployment.status as i32)
        .bind(&deployment.commit_sha)
        .bind(&deployment.committer)
        .bind(&deployment.committer_email)
        .bind(&deployment.user_id)
        .bind(deployment.started_at)
        .bind(deployment.finished_at)
        .bind(&deployment.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn update_log(&self, log: &ServerLog) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE server_logs
            SET status = ?, output = ?, started_at = ?, finished_at = ?
            WHERE id = ?
            "#,
        )
        .bind(log.status as i32)
        .bind(&log.output)
        .bind(log.started_at)
        .bind(log.finished_at)
        .bind(&log.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn update_status(&self, id: &str, status: DeploymentStatus) -> Result<()> {
        sqlx::query("UPDATE deployments SET status = ? WHERE id = ?")
            .bind(status as i32)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
