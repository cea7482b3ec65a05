use anyhow::Result;
use async_trait::async_trait;

use crate::media::types::{AudioFile, NewAudioFile, NewProject, Project, ProjectUpdate};
use crate::web::Pagination;

pub mod entity;
pub mod sqlite;

/// Projects and the audio files uploaded into them.
#[async_trait]
pub trait CatalogStorage: Send + Sync + 'static {
    async fn create_project(&self, project: &NewProject) -> Result<Project>;
    async fn get_project(&self, id: i64) -> Result<Option<Project>>;
    async fn find_project_by_name(&self, name: &str) -> Result<Option<Project>>;
    /// Active projects only.
    async fn list_projects(&self, pagination: &Pagination) -> Result<Vec<Project>>;
    async fn update_project(&self, id: i64, update: &ProjectUpdate) -> Result<Option<Project>>;
    /// Soft delete. Returns false when the project does not exist.
    async fn deactivate_project(&self, id: i64) -> Result<bool>;

    async fn create_audio_file(&self, file: &NewAudioFile) -> Result<AudioFile>;
    async fn get_audio_file(&self, id: i64) -> Result<Option<AudioFile>>;
    async fn list_audio_files(
        &self,
        project_id: Option<i64>,
        pagination: &Pagination,
    ) -> Result<Vec<AudioFile>>;
}

#[cfg(test)]
mod tests;
