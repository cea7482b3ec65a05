use axum::{response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::utils::http::ApiResponse;

pub const SERVICE_NAME: &str = "audio-drama-fx-engine";

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    git_hash: &'static str,
    timestamp: String,
}

pub fn health_router() -> Router {
    Router::new().route("/", get(health))
}

async fn health() -> impl IntoResponse {
    Json(ApiResponse::success(HealthStatus {
        status: "healthy",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        git_hash: env!("GIT_HASH"),
        timestamp: Utc::now().to_rfc3339(),
    }))
}
