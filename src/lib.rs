pub mod audio;
pub mod client;
pub mod config;
pub mod error;
pub mod media;
pub mod schedule;
pub mod storage;
pub mod utils;
pub mod web;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use audio::AudioTools;
use config::Settings;
use media::MediaLibrary;
use schedule::{EffectRegistry, JobManager, WorkerConfig};
use storage::catalog::sqlite::SqliteCatalogStorage;
use storage::job::sqlite::SqliteJobStorage;
use storage::queue::sqlite::SqliteTaskQueue;

/// Shared state handed to the HTTP layer.
pub struct AppContext {
    pub settings: Settings,
    pub jobs: Arc<JobManager>,
    pub library: Arc<MediaLibrary>,
}

impl AppContext {
    pub fn audio_tools(&self) -> AudioTools {
        AudioTools::new(self.settings.ffmpeg_path.clone(), self.settings.temp_dir.clone())
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            ack_timeout: self.settings.ack_timeout(),
            job_timeout: self.settings.job_timeout(),
            poll_interval: self.settings.queue_poll_interval(),
            output_dir: self.settings.output_dir.clone(),
        }
    }
}

/// Open storage and wire the job manager and media library from `settings`.
pub async fn bootstrap(settings: Settings) -> Result<Arc<AppContext>> {
    let pool = storage::connect(&settings.database_url).await?;

    let catalog = Arc::new(SqliteCatalogStorage::new(pool.clone()));
    let tools = AudioTools::new(settings.ffmpeg_path.clone(), settings.temp_dir.clone());
    let effects = EffectRegistry::builtin(settings.upload_dir.clone(), tools);
    info!("Registered effects: {}", effects.names().join(", "));

    let jobs = JobManager::new(
        Arc::new(SqliteJobStorage::new(pool.clone())),
        catalog.clone(),
        Arc::new(SqliteTaskQueue::new(pool)),
        Arc::new(effects),
    )
    .with_default_output_format(settings.default_output_format)
    .with_stale_after(settings.stale_after());

    let library = MediaLibrary::new(
        catalog,
        settings.upload_dir.clone(),
        settings.max_file_size,
        settings.allowed_audio_formats.clone(),
    );

    Ok(Arc::new(AppContext {
        settings,
        jobs: Arc::new(jobs),
        library: Arc::new(library),
    }))
}
