use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use super::{Delivery, TaskQueue};

const QUEUED: &str = "queued";
const LEASED: &str = "leased";
const ACKED: &str = "acked";

pub struct SqliteTaskQueue {
    pool: SqlitePool,
}

impl SqliteTaskQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn deadline(visibility: Duration) -> i64 {
    now_millis() + visibility.as_millis() as i64
}

#[async_trait]
impl TaskQueue for SqliteTaskQueue {
    async fn enqueue(&self, job_id: i64) -> Result<i64> {
        let task_id: i64 = sqlx::query_scalar(
            "INSERT INTO queue_tasks (job_id, state, attempts, enqueued_at) VALUES (?, ?, 0, ?) RETURNING id",
        )
        .bind(job_id)
        .bind(QUEUED)
        .bind(now_millis())
        .fetch_one(&self.pool)
        .await?;

        debug!(job_id, task_id, "Enqueued task");
        Ok(task_id)
    }

    async fn lease(&self, worker_id: &str, visibility: Duration) -> Result<Option<Delivery>> {
        let now = now_millis();
        let token = Uuid::new_v4().to_string();

        // single statement, so two consumers can never pick the same row
        let row = sqlx::query(
            r#"
            UPDATE queue_tasks
            SET state = ?, attempts = attempts + 1, lease_token = ?, leased_by = ?,
                lease_expires_at = ?
            WHERE id = (
                SELECT id FROM queue_tasks
                WHERE state = ? OR (state = ? AND lease_expires_at <= ?)
                ORDER BY enqueued_at ASC, id ASC
                LIMIT 1
            )
            RETURNING id, job_id, attempts, lease_token
            "#,
        )
        .bind(LEASED)
        .bind(&token)
        .bind(worker_id)
        .bind(now + visibility.as_millis() as i64)
        .bind(QUEUED)
        .bind(LEASED)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Delivery {
            task_id: row.get("id"),
            job_id: row.get("job_id"),
            attempts: row.get("attempts"),
            token: row.get("lease_token"),
        }))
    }

    async fn extend(&self, delivery: &Delivery, visibility: Duration) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE queue_tasks SET lease_expires_at = ? WHERE id = ? AND state = ? AND lease_token = ?",
        )
        .bind(deadline(visibility))
        .bind(delivery.task_id)
        .bind(LEASED)
        .bind(&delivery.token)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE queue_tasks
            SET state = ?, lease_expires_at = NULL
            WHERE id = ? AND state = ? AND lease_token = ?
            "#,
        )
        .bind(ACKED)
        .bind(delivery.task_id)
        .bind(LEASED)
        .bind(&delivery.token)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn depth(&self) -> Result<i64> {
        let depth = sqlx::query_scalar("SELECT COUNT(*) FROM queue_tasks WHERE state != ?")
            .bind(ACKED)
            .fetch_one(&self.pool)
            .await?;
        Ok(depth)
    }

    async fn count_for_job(&self, job_id: i64) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM queue_tasks WHERE job_id = ?")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
