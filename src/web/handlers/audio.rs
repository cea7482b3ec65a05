use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::error::JobError;
use crate::media::MediaLibrary;
use crate::utils::http::ApiResponse;
use crate::web::{ApiJson, ApiQuery, Pagination};

/// Headroom over the file limit for the multipart framing and other fields.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn audio_router(library: Arc<MediaLibrary>) -> Router {
    let body_limit = usize::try_from(library.max_file_size())
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/upload", post(upload_audio).layer(DefaultBodyLimit::max(body_limit)))
        .route("/import", post(import_audio))
        .route("/files", get(list_audio_files))
        .route("/files/:audio_file_id", get(get_audio_file))
        .with_state(library)
}

#[derive(Debug, Deserialize)]
struct ImportRequest {
    url: String,
    #[serde(default)]
    project_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ListFilesQuery {
    project_id: Option<i64>,
    index: Option<u64>,
    size: Option<u64>,
}

async fn upload_audio(
    State(library): State<Arc<MediaLibrary>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, JobError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut project_id = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(&e.body_text(), e.status()))?
    {
        match field.name() {
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| multipart_error(&e.body_text(), e.status()))?;
                file = Some((filename, bytes.to_vec()));
            }
            Some("project_id") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| multipart_error(&e.body_text(), e.status()))?;
                let raw = raw.trim();
                if !raw.is_empty() {
                    project_id = Some(
                        raw.parse::<i64>()
                            .map_err(|_| JobError::invalid("project_id", "must be an integer"))?,
                    );
                }
            }
            _ => {}
        }
    }

    let (filename, bytes) = file.ok_or_else(|| JobError::invalid("file", "missing file field"))?;
    let stored = library.store_upload(&filename, &bytes, project_id).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(stored))))
}

async fn import_audio(
    State(library): State<Arc<MediaLibrary>>,
    ApiJson(req): ApiJson<ImportRequest>,
) -> Result<impl IntoResponse, JobError> {
    let stored = library.import_from_url(&req.url, req.project_id).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(stored))))
}

async fn list_audio_files(
    State(library): State<Arc<MediaLibrary>>,
    ApiQuery(query): ApiQuery<ListFilesQuery>,
) -> Result<impl IntoResponse, JobError> {
    let files = library
        .list_audio_files(query.project_id, &Pagination::from_query(query.index, query.size))
        .await?;
    Ok(Json(ApiResponse::success(files)))
}

async fn get_audio_file(
    State(library): State<Arc<MediaLibrary>>,
    Path(audio_file_id): Path<i64>,
) -> Result<impl IntoResponse, JobError> {
    Ok(Json(ApiResponse::success(library.get_audio_file(audio_file_id).await?)))
}

fn multipart_error(message: &str, status: StatusCode) -> JobError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        JobError::PayloadTooLarge(message.to_string())
    } else {
        JobError::invalid("file", message)
    }
}
