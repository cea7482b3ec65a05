use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

pub mod sqlite;

/// A leased task. `token` identifies this particular lease; once the lease
/// expires and the task is handed out again the old token stops working.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub task_id: i64,
    pub job_id: i64,
    pub token: String,
    pub attempts: i64,
}

/// At-least-once queue of job ids.
///
/// A leased task stays invisible to other consumers for the visibility
/// timeout. If it is not acknowledged in time it is delivered again, so
/// consumers must tolerate seeing the same job twice.
#[async_trait]
pub trait TaskQueue: Send + Sync + 'static {
    async fn enqueue(&self, job_id: i64) -> Result<i64>;
    /// Oldest visible task, or `None` when the queue is empty.
    async fn lease(&self, worker_id: &str, visibility: Duration) -> Result<Option<Delivery>>;
    /// Push the lease deadline out. False when the lease was lost.
    async fn extend(&self, delivery: &Delivery, visibility: Duration) -> Result<bool>;
    /// False when the lease was lost to another consumer.
    async fn ack(&self, delivery: &Delivery) -> Result<bool>;
    /// Tasks not yet acknowledged.
    async fn depth(&self) -> Result<i64>;
    async fn count_for_job(&self, job_id: i64) -> Result<i64>;
}
