use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Envelope for every JSON response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiErrorBody>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub field: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>, field: Option<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiErrorBody {
                code: code.into(),
                message: message.into(),
                field,
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("server answered {0}")]
    Status(reqwest::StatusCode),

    #[error("response exceeds the limit of {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("no file name in URL")]
    NoFileName,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Stream `url` into `dest_dir`, keeping the last path segment as the file
/// name. Stops and removes the partial file once `max_bytes` is exceeded.
pub async fn download_audio(url: &str, dest_dir: &Path, max_bytes: u64) -> Result<PathBuf, DownloadError> {
    info!("Starting download from URL: {}", url);

    let filename = url
        .split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .ok_or(DownloadError::NoFileName)?;
    let dest_path = dest_dir.join(filename);

    fs::create_dir_all(dest_dir).await?;

    let mut response = reqwest::get(url).await?;
    if !response.status().is_success() {
        return Err(DownloadError::Status(response.status()));
    }
    if response.content_length().is_some_and(|len| len > max_bytes) {
        return Err(DownloadError::TooLarge { limit: max_bytes });
    }

    let mut file = fs::File::create(&dest_path).await?;
    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await? {
        written += chunk.len() as u64;
        if written > max_bytes {
            drop(file);
            fs::remove_file(&dest_path).await?;
            return Err(DownloadError::TooLarge { limit: max_bytes });
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    info!("Downloaded {} bytes to {:?}", written, dest_path);
    Ok(dest_path)
}
