use crate::error::{AppError, Result};
use crate::models::ProjectFile;
use crate::repository::DbPool;
use chrono::Utc;

#[derive(Clone)]
pub struct ProjectFileRepository {
    pool: DbPool,
}

impl ProjectFileRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: &str) -> Result<ProjectFile> {
        let file = sqlx::query_as::<_, ProjectFile>("SELECT * FROM project_files WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::ProjectFileNotFound(id.to_string()))?;

        Ok(file)
    }

    pub async fn create(&self, file: &ProjectFile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO project_files (id, project_id, name, path, content, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&file.id)
        .bind(&file.project_id)
        .bind(&file.name)
        .bind(&file.path)
        .bind(&file.content)
        .bind(file.created_at)
        .bind(file.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn update(&self, file: &ProjectFile) -> Result<()> {
        let result = sqlx::query(
            "UPDATE project_files SET name = ?, path = ?, content = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&file.name)
        .bind(&file.path)
        .bind(&file.content)
        .bind(Utc::now())
        .bind(&file.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::ProjectFileNotFound(file.id.clone()));
        }

        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM project_files WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::ProjectFileNotFound(id.to_string()));
        }

        Ok(())
    }
}
