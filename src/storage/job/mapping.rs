use anyhow::{anyhow, Result};
use chrono::{DateTime, SecondsFormat, Utc};

use super::entity::JobRow;
use crate::schedule::types::Job;

/// Fixed-width UTC timestamps so stored values compare correctly as text.
pub(crate) fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

pub(crate) fn parse_opt_time(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(parse_time).transpose()
}

impl TryFrom<JobRow> for Job {
    type Error = anyhow::Error;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(Job {
            id: row.id,
            name: row.name,
            description: row.description,
            audio_file_id: row.audio_file_id,
            project_id: row.project_id,
            effects_config: serde_json::from_str(&row.effects_config)?,
            output_format: row.output_format.parse().map_err(|e: String| anyhow!(e))?,
            status: row.status.parse().map_err(|e: String| anyhow!(e))?,
            progress: row.progress,
            current_step: row.current_step,
            callback_url: row.callback_url,
            created_at: parse_time(&row.created_at)?,
            updated_at: parse_time(&row.updated_at)?,
            started_at: parse_opt_time(row.started_at.as_deref())?,
            completed_at: parse_opt_time(row.completed_at.as_deref())?,
            result_location: row.result_location,
            error: row.error,
        })
    }
}
