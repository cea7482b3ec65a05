use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::schedule::types::{Job, JobFilter, JobStatus, NewJob};
use crate::web::Pagination;

pub mod entity;
pub mod mapping;
pub mod sqlite;

/// Durable record of processing jobs.
///
/// Every status-changing method is a conditional update on the current
/// status and reports whether it applied, so a job can never move backwards
/// and two workers can never both claim it.
#[async_trait]
pub trait JobStorage: Send + Sync + 'static {
    async fn insert(&self, job: &NewJob) -> Result<Job>;
    async fn get(&self, id: i64) -> Result<Option<Job>>;
    /// Ordered by creation.
    async fn list(&self, filter: &JobFilter, pagination: &Pagination) -> Result<Vec<Job>>;
    /// `pending -> processing`.
    async fn claim(&self, id: i64) -> Result<bool>;
    async fn update_progress(&self, id: i64, progress: f64, current_step: &str) -> Result<bool>;
    /// `processing -> completed`.
    async fn complete(&self, id: i64, result_location: &str) -> Result<bool>;
    /// `pending|processing -> failed`. `error` must be non-empty.
    async fn fail(&self, id: i64, error: &str) -> Result<bool>;
    async fn count_by_status(&self) -> Result<Vec<(JobStatus, i64)>>;
    /// `processing` jobs whose last update is older than `before`.
    async fn stale(&self, before: DateTime<Utc>) -> Result<Vec<Job>>;
}
