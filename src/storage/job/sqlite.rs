use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::debug;

use super::entity::JobRow;
use super::mapping::format_time;
use super::JobStorage;
use crate::schedule::types::{Job, JobFilter, JobStatus, NewJob};
use crate::web::Pagination;

pub struct SqliteJobStorage {
    pool: SqlitePool,
}

impl SqliteJobStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn rows_to_jobs(rows: Vec<JobRow>) -> Result<Vec<Job>> {
        rows.into_iter().map(Job::try_from).collect()
    }
}

#[async_trait]
impl JobStorage for SqliteJobStorage {
    async fn insert(&self, job: &NewJob) -> Result<Job> {
        let now = format_time(Utc::now());
        let row: JobRow = sqlx::query_as(
            r#"
            INSERT INTO processing_jobs
            (name, description, audio_file_id, project_id, effects_config, output_format,
             status, progress, callback_url, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&job.name)
        .bind(&job.description)
        .bind(job.audio_file_id)
        .bind(job.project_id)
        .bind(serde_json::to_string(&job.effects_config)?)
        .bind(job.output_format.extension())
        .bind(JobStatus::Pending.as_str())
        .bind(&job.callback_url)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        debug!(job_id = row.id, "Inserted job");
        Job::try_from(row)
    }

    async fn get(&self, id: i64) -> Result<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as("SELECT * FROM processing_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Job::try_from).transpose()
    }

    async fn list(&self, filter: &JobFilter, pagination: &Pagination) -> Result<Vec<Job>> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM processing_jobs WHERE 1 = 1");
        if let Some(project_id) = filter.project_id {
            query.push(" AND project_id = ").push_bind(project_id);
        }
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        query
            .push(" ORDER BY created_at ASC, id ASC LIMIT ")
            .push_bind(pagination.limit() as i64)
            .push(" OFFSET ")
            .push_bind(pagination.offset() as i64);

        let rows: Vec<JobRow> = query.build_query_as().fetch_all(&self.pool).await?;
        Self::rows_to_jobs(rows)
    }

    async fn claim(&self, id: i64) -> Result<bool> {
        let now = format_time(Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE processing_jobs
            SET status = ?, started_at = ?, updated_at = ?, progress = 0
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(JobStatus::Processing.as_str())
        .bind(&now)
        .bind(&now)
        .bind(id)
        .bind(JobStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_progress(&self, id: i64, progress: f64, current_step: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE processing_jobs
            SET progress = ?, current_step = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(progress.clamp(0.0, 1.0))
        .bind(current_step)
        .bind(format_time(Utc::now()))
        .bind(id)
        .bind(JobStatus::Processing.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn complete(&self, id: i64, result_location: &str) -> Result<bool> {
        let now = format_time(Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE processing_jobs
            SET status = ?, progress = 1.0, current_step = NULL, result_location = ?,
                completed_at = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(JobStatus::Completed.as_str())
        .bind(result_location)
        .bind(&now)
        .bind(&now)
        .bind(id)
        .bind(JobStatus::Processing.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn fail(&self, id: i64, error: &str) -> Result<bool> {
        if error.trim().is_empty() {
            return Err(anyhow!("job {} cannot fail with an empty error", id));
        }

        let now = format_time(Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE processing_jobs
            SET status = ?, error = ?, completed_at = ?, updated_at = ?
            WHERE id = ? AND status IN (?, ?)
            "#,
        )
        .bind(JobStatus::Failed.as_str())
        .bind(error)
        .bind(&now)
        .bind(&now)
        .bind(id)
        .bind(JobStatus::Pending.as_str())
        .bind(JobStatus::Processing.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn count_by_status(&self) -> Result<Vec<(JobStatus, i64)>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM processing_jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                let status: String = row.get("status");
                let status = status.parse().map_err(|e: String| anyhow!(e))?;
                Ok((status, row.get::<i64, _>("count")))
            })
            .collect()
    }

    async fn stale(&self, before: DateTime<Utc>) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            "SELECT * FROM processing_jobs WHERE status = ? AND updated_at < ? ORDER BY id ASC",
        )
        .bind(JobStatus::Processing.as_str())
        .bind(format_time(before))
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_jobs(rows)
    }
}
