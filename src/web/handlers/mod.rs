use std::sync::Arc;

use axum::Router;

use crate::AppContext;

pub mod audio;
pub mod health;
pub mod jobs;
pub mod projects;

pub fn router(ctx: Arc<AppContext>) -> Router {
    let api = Router::new()
        .nest("/jobs", jobs::jobs_router(ctx.jobs.clone()))
        .nest("/effects", jobs::effects_router(ctx.jobs.clone()))
        .nest("/projects", projects::projects_router(ctx.library.clone()))
        .nest("/audio", audio::audio_router(ctx.library.clone()))
        .nest("/health", health::health_router());

    Router::new().nest("/api/v1", api)
}
