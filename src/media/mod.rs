use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audio::wav_info;
use crate::error::JobError;
use crate::storage::catalog::CatalogStorage;
use crate::utils::http::{download_audio, DownloadError};
use crate::web::Pagination;

pub mod types;

use types::{AudioFile, NewAudioFile, NewProject, Project, ProjectUpdate};

const MAX_PROJECT_NAME_LEN: usize = 255;

/// Projects and the audio files that jobs read from.
pub struct MediaLibrary {
    catalog: Arc<dyn CatalogStorage>,
    upload_dir: PathBuf,
    max_file_size: u64,
    allowed_formats: Vec<String>,
}

impl MediaLibrary {
    pub fn new(
        catalog: Arc<dyn CatalogStorage>,
        upload_dir: impl Into<PathBuf>,
        max_file_size: u64,
        allowed_formats: Vec<String>,
    ) -> Self {
        Self {
            catalog,
            upload_dir: upload_dir.into(),
            max_file_size,
            allowed_formats,
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    pub async fn create_project(&self, project: NewProject) -> Result<Project, JobError> {
        let name = validate_project_name(&project.name)?;
        if self.catalog.find_project_by_name(&name).await?.is_some() {
            return Err(JobError::Conflict(format!("project '{}' already exists", name)));
        }

        let created = self
            .catalog
            .create_project(&NewProject {
                name: name.clone(),
                description: project.description,
            })
            .await
            .map_err(|e| unique_to_conflict(e, &name))?;
        info!(project_id = created.id, "Created project '{}'", created.name);
        Ok(created)
    }

    pub async fn get_project(&self, id: i64) -> Result<Project, JobError> {
        self.catalog
            .get_project(id)
            .await?
            .ok_or_else(|| JobError::not_found("project", id))
    }

    pub async fn list_projects(&self, pagination: &Pagination) -> Result<Vec<Project>, JobError> {
        Ok(self.catalog.list_projects(pagination).await?)
    }

    pub async fn update_project(&self, id: i64, mut update: ProjectUpdate) -> Result<Project, JobError> {
        if let Some(name) = &update.name {
            let name = validate_project_name(name)?;
            if let Some(existing) = self.catalog.find_project_by_name(&name).await? {
                if existing.id != id {
                    return Err(JobError::Conflict(format!("project '{}' already exists", name)));
                }
            }
            update.name = Some(name);
        }

        let conflict_name = update.name.clone().unwrap_or_default();
        self.catalog
            .update_project(id, &update)
            .await
            .map_err(|e| unique_to_conflict(e, &conflict_name))?
            .ok_or_else(|| JobError::not_found("project", id))
    }

    /// Soft delete: the project disappears from listings but existing rows
    /// keep pointing at it.
    pub async fn delete_project(&self, id: i64) -> Result<(), JobError> {
        if !self.catalog.deactivate_project(id).await? {
            return Err(JobError::not_found("project", id));
        }
        info!(project_id = id, "Deactivated project");
        Ok(())
    }

    pub async fn get_audio_file(&self, id: i64) -> Result<AudioFile, JobError> {
        self.catalog
            .get_audio_file(id)
            .await?
            .ok_or_else(|| JobError::not_found("audio file", id))
    }

    pub async fn list_audio_files(
        &self,
        project_id: Option<i64>,
        pagination: &Pagination,
    ) -> Result<Vec<AudioFile>, JobError> {
        Ok(self.catalog.list_audio_files(project_id, pagination).await?)
    }

    /// Store an uploaded file under a fresh name and record it.
    pub async fn store_upload(
        &self,
        original_filename: &str,
        bytes: &[u8],
        project_id: Option<i64>,
    ) -> Result<AudioFile, JobError> {
        let format = self.check_extension(original_filename)?;
        self.check_size(bytes.len() as u64)?;
        self.check_project(project_id).await?;

        fs::create_dir_all(&self.upload_dir)
            .await
            .map_err(anyhow::Error::from)?;
        let filename = format!("{}.{}", Uuid::new_v4(), format);
        let path = self.upload_dir.join(&filename);
        fs::write(&path, bytes).await.map_err(anyhow::Error::from)?;

        self.register(path, filename, original_filename, format, project_id)
            .await
    }

    /// Download `url` into the upload directory and record it.
    pub async fn import_from_url(&self, url: &str, project_id: Option<i64>) -> Result<AudioFile, JobError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| JobError::invalid("url", e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(JobError::invalid("url", "only http and https are supported"));
        }
        let original_filename = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .ok_or_else(|| JobError::invalid("url", "no file name in URL"))?;
        let format = self.check_extension(&original_filename)?;
        self.check_project(project_id).await?;

        let incoming = self.upload_dir.join("incoming").join(Uuid::new_v4().to_string());
        let downloaded = match download_audio(url, &incoming, self.max_file_size).await {
            Ok(path) => path,
            Err(e) => {
                discard(&incoming).await;
                return Err(match e {
                    DownloadError::TooLarge { limit } => {
                        JobError::PayloadTooLarge(format!("download exceeds the limit of {} bytes", limit))
                    }
                    DownloadError::Io(e) => JobError::Storage(e.into()),
                    other => JobError::invalid("url", format!("download failed: {}", other)),
                });
            }
        };

        let size = fs::metadata(&downloaded)
            .await
            .map_err(anyhow::Error::from)?
            .len();
        if let Err(e) = self.check_size(size) {
            discard(&incoming).await;
            return Err(e);
        }

        let filename = format!("{}.{}", Uuid::new_v4(), format);
        let path = self.upload_dir.join(&filename);
        fs::rename(&downloaded, &path).await.map_err(anyhow::Error::from)?;
        discard(&incoming).await;

        self.register(path, filename, &original_filename, format, project_id)
            .await
    }

    async fn register(
        &self,
        path: PathBuf,
        filename: String,
        original_filename: &str,
        format: String,
        project_id: Option<i64>,
    ) -> Result<AudioFile, JobError> {
        let (sample_rate, channels, duration) = if format == "wav" {
            match wav_info(&path) {
                Ok(info) => (
                    Some(info.sample_rate as i64),
                    Some(info.channels as i64),
                    Some(info.duration),
                ),
                Err(e) => {
                    discard_file(&path).await;
                    return Err(JobError::invalid("file", format!("not a readable WAV file: {}", e)));
                }
            }
        } else {
            (None, None, None)
        };

        let file_size = fs::metadata(&path)
            .await
            .map_err(anyhow::Error::from)?
            .len() as i64;

        let file = self
            .catalog
            .create_audio_file(&NewAudioFile {
                filename,
                original_filename: original_filename.to_string(),
                file_path: path.to_string_lossy().to_string(),
                file_size,
                format,
                sample_rate,
                channels,
                duration,
                project_id,
            })
            .await?;
        info!(audio_file_id = file.id, "Stored audio file '{}'", file.original_filename);
        Ok(file)
    }

    fn check_extension(&self, filename: &str) -> Result<String, JobError> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        if extension.is_empty() || !self.allowed_formats.contains(&extension) {
            return Err(JobError::invalid(
                "file",
                format!(
                    "unsupported file type '{}', allowed: {}",
                    extension,
                    self.allowed_formats.join(", ")
                ),
            ));
        }
        Ok(extension)
    }

    fn check_size(&self, size: u64) -> Result<(), JobError> {
        if size == 0 {
            return Err(JobError::invalid("file", "file is empty"));
        }
        if size > self.max_file_size {
            return Err(JobError::PayloadTooLarge(format!(
                "{} bytes exceeds the limit of {} bytes",
                size, self.max_file_size
            )));
        }
        Ok(())
    }

    async fn check_project(&self, project_id: Option<i64>) -> Result<(), JobError> {
        if let Some(id) = project_id {
            match self.catalog.get_project(id).await? {
                None => return Err(JobError::not_found("project", id)),
                Some(project) if !project.is_active => {
                    return Err(JobError::invalid("project_id", format!("project {} is inactive", id)))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

fn validate_project_name(name: &str) -> Result<String, JobError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(JobError::invalid("name", "must not be empty"));
    }
    if name.chars().count() > MAX_PROJECT_NAME_LEN {
        return Err(JobError::invalid(
            "name",
            format!("must be at most {} characters", MAX_PROJECT_NAME_LEN),
        ));
    }
    Ok(name.to_string())
}

fn unique_to_conflict(error: anyhow::Error, name: &str) -> JobError {
    let unique = error
        .downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .map(|e| e.is_unique_violation())
        .unwrap_or(false);
    if unique {
        JobError::Conflict(format!("project '{}' already exists", name))
    } else {
        JobError::Storage(error)
    }
}

async fn discard(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir).await {
        warn!("Failed to remove {:?}: {}", dir, e);
    }
}

async fn discard_file(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        warn!("Failed to remove {:?}: {}", path, e);
    }
}
