use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::info;

use crate::schedule::types::OutputFormat;

const DEFAULT_DATABASE_URL: &str = "sqlite://./fx_data/database/fx.db?mode=rwc";
const DEFAULT_UPLOAD_DIR: &str = "./fx_data/uploads";
const DEFAULT_OUTPUT_DIR: &str = "./fx_data/processed";
const DEFAULT_TEMP_DIR: &str = "./fx_data/tmp";
const DEFAULT_LOG_DIR: &str = "./logs";

/// Runtime settings, read once at startup and handed to every component
/// that needs them.
///
/// Every field can be overridden with an `FX_*` environment variable or an
/// entry in `.env`.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub log_dir: PathBuf,
    pub ffmpeg_path: String,
    /// Size of the worker pool, i.e. the number of jobs in flight at once.
    pub max_concurrent_jobs: usize,
    pub job_timeout_secs: u64,
    /// Lease length on a dequeued task. Unacknowledged tasks are handed to
    /// another worker once it runs out.
    pub ack_timeout_secs: u64,
    pub queue_poll_interval_ms: u64,
    pub stale_after_secs: u64,
    /// How often the scheduler looks for stale `processing` jobs.
    pub stale_check_interval_secs: u64,
    pub default_output_format: OutputFormat,
    pub max_file_size: u64,
    pub allowed_audio_formats: Vec<String>,
    /// Upper bound on task leases per second across the pool. `0` disables it.
    pub dispatch_rate_per_sec: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            host: "127.0.0.1".to_string(),
            port: 8000,
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            temp_dir: PathBuf::from(DEFAULT_TEMP_DIR),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            ffmpeg_path: "ffmpeg".to_string(),
            max_concurrent_jobs: 2,
            job_timeout_secs: 30 * 60,
            ack_timeout_secs: 5 * 60,
            queue_poll_interval_ms: 1000,
            stale_after_secs: 60 * 60,
            stale_check_interval_secs: 60,
            default_output_format: OutputFormat::Wav,
            max_file_size: 100 * 1024 * 1024,
            allowed_audio_formats: ["wav", "mp3", "flac", "m4a", "aac", "ogg"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            dispatch_rate_per_sec: 2,
        }
    }
}

impl Settings {
    /// Load settings from the process environment, falling back to `.env`
    /// and then to the defaults.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        let settings = Self {
            database_url: var("FX_DATABASE_URL").unwrap_or(defaults.database_url),
            host: var("FX_HOST").unwrap_or(defaults.host),
            port: parsed("FX_PORT", defaults.port)?,
            upload_dir: var("FX_UPLOAD_DIR").map(PathBuf::from).unwrap_or(defaults.upload_dir),
            output_dir: var("FX_OUTPUT_DIR").map(PathBuf::from).unwrap_or(defaults.output_dir),
            temp_dir: var("FX_TEMP_DIR").map(PathBuf::from).unwrap_or(defaults.temp_dir),
            log_dir: var("FX_LOG_DIR").map(PathBuf::from).unwrap_or(defaults.log_dir),
            ffmpeg_path: var("FX_FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
            max_concurrent_jobs: parsed("FX_MAX_CONCURRENT_JOBS", defaults.max_concurrent_jobs)?,
            job_timeout_secs: parsed("FX_JOB_TIMEOUT_SECS", defaults.job_timeout_secs)?,
            ack_timeout_secs: parsed("FX_ACK_TIMEOUT_SECS", defaults.ack_timeout_secs)?,
            queue_poll_interval_ms: parsed("FX_QUEUE_POLL_INTERVAL_MS", defaults.queue_poll_interval_ms)?,
            stale_after_secs: parsed("FX_STALE_AFTER_SECS", defaults.stale_after_secs)?,
            stale_check_interval_secs: parsed(
                "FX_STALE_CHECK_INTERVAL_SECS",
                defaults.stale_check_interval_secs,
            )?,
            default_output_format: parsed("FX_DEFAULT_OUTPUT_FORMAT", defaults.default_output_format)?,
            max_file_size: parsed("FX_MAX_FILE_SIZE", defaults.max_file_size)?,
            allowed_audio_formats: var("FX_ALLOWED_AUDIO_FORMATS")
                .map(|v| parse_format_list(&v))
                .unwrap_or(defaults.allowed_audio_formats),
            dispatch_rate_per_sec: parsed("FX_DISPATCH_RATE_PER_SEC", defaults.dispatch_rate_per_sec)?,
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(anyhow!("FX_MAX_CONCURRENT_JOBS must be at least 1"));
        }
        if self.ack_timeout_secs == 0 {
            return Err(anyhow!("FX_ACK_TIMEOUT_SECS must be at least 1"));
        }
        if self.job_timeout_secs == 0 {
            return Err(anyhow!("FX_JOB_TIMEOUT_SECS must be at least 1"));
        }
        if self.stale_check_interval_secs == 0 {
            return Err(anyhow!("FX_STALE_CHECK_INTERVAL_SECS must be at least 1"));
        }
        if self.allowed_audio_formats.is_empty() {
            return Err(anyhow!("FX_ALLOWED_AUDIO_FORMATS must name at least one extension"));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue_poll_interval_ms)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_secs as i64)
    }

    pub fn stale_check_interval(&self) -> Duration {
        Duration::from_secs(self.stale_check_interval_secs)
    }

    /// Create the data directories, including the parent of a file-backed
    /// SQLite database.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.upload_dir, &self.output_dir, &self.temp_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
        }

        if let Some(db_path) = self.database_url.strip_prefix("sqlite://") {
            let db_path = db_path.split('?').next().unwrap_or(db_path);
            if let Some(dir) = std::path::Path::new(db_path).parent() {
                if !dir.as_os_str().is_empty() {
                    std::fs::create_dir_all(dir).with_context(|| {
                        format!("failed to create database directory {}", dir.display())
                    })?;
                }
            }
        }

        info!(
            upload_dir = %self.upload_dir.display(),
            output_dir = %self.output_dir.display(),
            "Data directories ready"
        );
        Ok(())
    }
}

fn var(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) => Some(value),
        Err(_) => dotenv::var(key).ok(),
    }
}

fn parsed<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid value for {}: {:?} ({})", key, raw, e)),
        None => Ok(default),
    }
}

fn parse_format_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_start_matches('.').to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
