use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::error::JobError;
use crate::media::types::{NewProject, ProjectUpdate};
use crate::media::MediaLibrary;
use crate::utils::http::ApiResponse;
use crate::web::{ApiJson, ApiQuery, Pagination};

pub fn projects_router(library: Arc<MediaLibrary>) -> Router {
    Router::new()
        .route("/", get(list_projects).post(create_project))
        .route(
            "/:project_id",
            get(get_project).put(update_project).delete(delete_project),
        )
        .with_state(library)
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    index: Option<u64>,
    size: Option<u64>,
}

async fn create_project(
    State(library): State<Arc<MediaLibrary>>,
    ApiJson(project): ApiJson<NewProject>,
) -> Result<impl IntoResponse, JobError> {
    let project = library.create_project(project).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(project))))
}

async fn list_projects(
    State(library): State<Arc<MediaLibrary>>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<impl IntoResponse, JobError> {
    let projects = library.list_projects(&Pagination::from_query(query.index, query.size)).await?;
    Ok(Json(ApiResponse::success(projects)))
}

async fn get_project(
    State(library): State<Arc<MediaLibrary>>,
    Path(project_id): Path<i64>,
) -> Result<impl IntoResponse, JobError> {
    Ok(Json(ApiResponse::success(library.get_project(project_id).await?)))
}

async fn update_project(
    State(library): State<Arc<MediaLibrary>>,
    Path(project_id): Path<i64>,
    ApiJson(update): ApiJson<ProjectUpdate>,
) -> Result<impl IntoResponse, JobError> {
    let project = library.update_project(project_id, update).await?;
    Ok(Json(ApiResponse::success(project)))
}

async fn delete_project(
    State(library): State<Arc<MediaLibrary>>,
    Path(project_id): Path<i64>,
) -> Result<impl IntoResponse, JobError> {
    library.delete_project(project_id).await?;
    Ok(Json(ApiResponse::success(())))
}
