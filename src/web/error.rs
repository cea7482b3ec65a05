use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use crate::error::JobError;
use crate::utils::http::ApiResponse;

impl JobError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            JobError::NotFound { .. } => StatusCode::NOT_FOUND,
            JobError::InvalidConfig { .. } => StatusCode::BAD_REQUEST,
            JobError::Conflict(_) => StatusCode::CONFLICT,
            JobError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            JobError::EnqueueFailure(_) | JobError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for JobError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {:#}", self);
        }
        let body = ApiResponse::<()>::error(self.code(), self.to_string(), self.field().map(str::to_string));
        (status, Json(body)).into_response()
    }
}
