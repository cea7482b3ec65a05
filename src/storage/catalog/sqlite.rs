use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::entity::{AudioFileRow, ProjectRow};
use super::CatalogStorage;
use crate::media::types::{AudioFile, NewAudioFile, NewProject, Project, ProjectUpdate};
use crate::storage::job::mapping::format_time;
use crate::web::Pagination;

pub struct SqliteCatalogStorage {
    pool: SqlitePool,
}

impl SqliteCatalogStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogStorage for SqliteCatalogStorage {
    async fn create_project(&self, project: &NewProject) -> Result<Project> {
        let now = format_time(Utc::now());
        let row: ProjectRow = sqlx::query_as(
            r#"
            INSERT INTO projects (name, description, is_active, created_at, updated_at)
            VALUES (?, ?, 1, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&project.name)
        .bind(&project.description)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        Project::try_from(row)
    }

    async fn get_project(&self, id: i64) -> Result<Option<Project>> {
        let row: Option<ProjectRow> = sqlx::query_as("SELECT * FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Project::try_from).transpose()
    }

    async fn find_project_by_name(&self, name: &str) -> Result<Option<Project>> {
        let row: Option<ProjectRow> = sqlx::query_as("SELECT * FROM projects WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Project::try_from).transpose()
    }

    async fn list_projects(&self, pagination: &Pagination) -> Result<Vec<Project>> {
        let rows: Vec<ProjectRow> = sqlx::query_as(
            "SELECT * FROM projects WHERE is_active = 1 ORDER BY id ASC LIMIT ? OFFSET ?",
        )
        .bind(pagination.limit() as i64)
        .bind(pagination.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Project::try_from).collect()
    }

    async fn update_project(&self, id: i64, update: &ProjectUpdate) -> Result<Option<Project>> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE projects SET updated_at = ");
        query.push_bind(format_time(Utc::now()));
        if let Some(name) = &update.name {
            query.push(", name = ").push_bind(name.clone());
        }
        if let Some(description) = &update.description {
            query.push(", description = ").push_bind(description.clone());
        }
        if let Some(is_active) = update.is_active {
            query.push(", is_active = ").push_bind(is_active);
        }
        query.push(" WHERE id = ").push_bind(id).push(" RETURNING *");

        let row: Option<ProjectRow> = query.build_query_as().fetch_optional(&self.pool).await?;
        row.map(Project::try_from).transpose()
    }

    async fn deactivate_project(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE projects SET is_active = 0, updated_at = ? WHERE id = ?")
            .bind(format_time(Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn create_audio_file(&self, file: &NewAudioFile) -> Result<AudioFile> {
        let row: AudioFileRow = sqlx::query_as(
            r#"
            INSERT INTO audio_files
            (filename, original_filename, file_path, file_size, format,
             sample_rate, channels, duration, project_id, uploaded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&file.filename)
        .bind(&file.original_filename)
        .bind(&file.file_path)
        .bind(file.file_size)
        .bind(&file.format)
        .bind(file.sample_rate)
        .bind(file.channels)
        .bind(file.duration)
        .bind(file.project_id)
        .bind(format_time(Utc::now()))
        .fetch_one(&self.pool)
        .await?;

        AudioFile::try_from(row)
    }

    async fn get_audio_file(&self, id: i64) -> Result<Option<AudioFile>> {
        let row: Option<AudioFileRow> = sqlx::query_as("SELECT * FROM audio_files WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(AudioFile::try_from).transpose()
    }

    async fn list_audio_files(
        &self,
        project_id: Option<i64>,
        pagination: &Pagination,
    ) -> Result<Vec<AudioFile>> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM audio_files");
        if let Some(project_id) = project_id {
            query.push(" WHERE project_id = ").push_bind(project_id);
        }
        query
            .push(" ORDER BY id ASC LIMIT ")
            .push_bind(pagination.limit() as i64)
            .push(" OFFSET ")
            .push_bind(pagination.offset() as i64);

        let rows: Vec<AudioFileRow> = query.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(AudioFile::try_from).collect()
    }
}
