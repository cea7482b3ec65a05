use sqlx::FromRow;

use crate::media::types::{AudioFile, Project};
use crate::storage::job::mapping::parse_time;

#[derive(Clone, Debug, FromRow)]
pub struct ProjectRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone, Debug, FromRow)]
pub struct AudioFileRow {
    pub id: i64,
    pub filename: String,
    pub original_filename: String,
    pub file_path: String,
    pub file_size: i64,
    pub format: String,
    pub sample_rate: Option<i64>,
    pub channels: Option<i64>,
    pub duration: Option<f64>,
    pub project_id: Option<i64>,
    pub uploaded_at: String,
}

impl TryFrom<ProjectRow> for Project {
    type Error = anyhow::Error;

    fn try_from(row: ProjectRow) -> anyhow::Result<Self> {
        Ok(Project {
            id: row.id,
            name: row.name,
            description: row.description,
            is_active: row.is_active,
            created_at: parse_time(&row.created_at)?,
            updated_at: parse_time(&row.updated_at)?,
        })
    }
}

impl TryFrom<AudioFileRow> for AudioFile {
    type Error = anyhow::Error;

    fn try_from(row: AudioFileRow) -> anyhow::Result<Self> {
        Ok(AudioFile {
            id: row.id,
            filename: row.filename,
            original_filename: row.original_filename,
            file_path: row.file_path,
            file_size: row.file_size,
            format: row.format,
            sample_rate: row.sample_rate,
            channels: row.channels,
            duration: row.duration,
            project_id: row.project_id,
            uploaded_at: parse_time(&row.uploaded_at)?,
        })
    }
}
