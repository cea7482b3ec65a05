use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tracing::info;

use crate::error::JobError;
use crate::schedule::types::{JobFilter, JobStatus, JobSubmission, JobSummary};
use crate::schedule::JobManager;
use crate::utils::http::ApiResponse;
use crate::web::{ApiJson, ApiQuery, Pagination};

pub fn jobs_router(manager: Arc<JobManager>) -> Router {
    Router::new()
        .route("/", get(list_jobs).post(submit_job))
        .route("/stats", get(job_stats))
        .route("/:job_id", get(job_status))
        .with_state(manager)
}

pub fn effects_router(manager: Arc<JobManager>) -> Router {
    Router::new().route("/", get(list_effects)).with_state(manager)
}

#[derive(Debug, Deserialize)]
struct ListJobsQuery {
    project_id: Option<i64>,
    status: Option<String>,
    index: Option<u64>,
    size: Option<u64>,
}

async fn submit_job(
    State(manager): State<Arc<JobManager>>,
    ApiJson(submission): ApiJson<JobSubmission>,
) -> Result<impl IntoResponse, JobError> {
    let job = manager.submit(submission).await?;
    info!(job_id = job.id, "Accepted job '{}'", job.name);
    Ok((StatusCode::CREATED, Json(ApiResponse::success(job))))
}

async fn job_status(
    State(manager): State<Arc<JobManager>>,
    Path(job_id): Path<i64>,
) -> Result<impl IntoResponse, JobError> {
    let status = manager.get_status(job_id).await?;
    Ok(Json(ApiResponse::success(status)))
}

async fn list_jobs(
    State(manager): State<Arc<JobManager>>,
    ApiQuery(query): ApiQuery<ListJobsQuery>,
) -> Result<impl IntoResponse, JobError> {
    let status = query
        .status
        .as_deref()
        .map(JobStatus::from_str)
        .transpose()
        .map_err(|e| JobError::invalid("status", e))?;
    let filter = JobFilter {
        project_id: query.project_id,
        status,
    };
    let pagination = Pagination::from_query(query.index, query.size);
    let jobs: Vec<JobSummary> = manager
        .list_jobs(&filter, &pagination)
        .await?
        .into_iter()
        .map(JobSummary::from)
        .collect();
    Ok(Json(ApiResponse::success(jobs)))
}

async fn job_stats(State(manager): State<Arc<JobManager>>) -> Result<impl IntoResponse, JobError> {
    Ok(Json(ApiResponse::success(manager.stats().await?)))
}

async fn list_effects(State(manager): State<Arc<JobManager>>) -> impl IntoResponse {
    Json(ApiResponse::success(manager.effect_names()))
}
