use sqlx::FromRow;

/// Row of `processing_jobs` as stored: enums and the effect chain are text,
/// timestamps are RFC 3339 strings.
#[derive(Clone, Debug, PartialEq, FromRow)]
pub struct JobRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub audio_file_id: i64,
    pub project_id: Option<i64>,
    pub effects_config: String,
    pub output_format: String,
    pub status: String,
    pub progress: f64,
    pub current_step: Option<String>,
    pub callback_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub result_location: Option<String>,
    pub error: Option<String>,
}
