//! JSON body and query extractors that reject with `JobError`, so malformed
//! requests get the same envelope as validation failures.

use async_trait::async_trait;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, Query, Request};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::Json;
use serde::de::DeserializeOwned;

use crate::error::JobError;

/// `Json<T>` with rejections reported as `INVALID_CONFIG` on the offending field.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = JobError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(json_rejection(rejection)),
        }
    }
}

/// `Query<T>` with rejections reported as `INVALID_CONFIG` on `query`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = JobError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(Self(value)),
            Err(rejection) => Err(query_rejection(rejection)),
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> JobError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return JobError::PayloadTooLarge(rejection.body_text());
    }
    match rejection {
        JsonRejection::JsonDataError(e) => {
            let text = e.body_text();
            // "Failed to deserialize the JSON body into the target type: <detail>"
            let detail = text.split_once(": ").map_or(text.as_str(), |(_, rest)| rest);
            let (field, reason) = rejected_field(detail);
            JobError::invalid(field, reason)
        }
        other => JobError::invalid("body", other.body_text()),
    }
}

fn query_rejection(rejection: QueryRejection) -> JobError {
    JobError::invalid("query", rejection.body_text())
}

/// Pick the top-level field out of a serde error message. Falls back to `body`.
fn rejected_field(detail: &str) -> (String, String) {
    if let Some((path, reason)) = detail.split_once(": ") {
        if !path.is_empty() && !path.contains(char::is_whitespace) {
            let top = path.split(['.', '[']).next().unwrap_or(path);
            if !top.is_empty() {
                return (top.to_string(), reason.to_string());
            }
        }
    }

    if let Some(rest) = detail.split_once("missing field `").map(|(_, rest)| rest) {
        if let Some((name, _)) = rest.split_once('`') {
            return (name.to_string(), detail.to_string());
        }
    }

    ("body".to_string(), detail.to_string())
}
