use std::collections::HashSet;
use std::fmt::{self, Display};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Allowed lifecycle edges. `pending -> failed` only happens when the
    /// task could not be enqueued.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Wav,
    Mp3,
    Flac,
    M4a,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Wav => "wav",
            OutputFormat::Mp3 => "mp3",
            OutputFormat::Flac => "flac",
            OutputFormat::M4a => "m4a",
        }
    }

    /// ffmpeg codec arguments for formats that are not written natively.
    pub fn ffmpeg_codec_args(&self) -> &'static [&'static str] {
        match self {
            OutputFormat::Wav => &["-codec:a", "pcm_s16le"],
            OutputFormat::Mp3 => &["-codec:a", "libmp3lame", "-q:a", "2"],
            OutputFormat::Flac => &["-codec:a", "flac"],
            OutputFormat::M4a => &["-codec:a", "aac", "-b:a", "192k"],
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "wav" => Ok(OutputFormat::Wav),
            "mp3" => Ok(OutputFormat::Mp3),
            "flac" => Ok(OutputFormat::Flac),
            "m4a" => Ok(OutputFormat::M4a),
            other => Err(format!(
                "unsupported output format '{}', expected one of wav, mp3, flac, m4a",
                other
            )),
        }
    }
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// One named effect and its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectStep {
    pub name: String,
    pub params: Value,
}

impl EffectStep {
    /// `{"enabled": false}` switches an effect off without removing it.
    pub fn is_enabled(&self) -> bool {
        self.params
            .get("enabled")
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }
}

/// Ordered effect chain. On the wire it is a JSON object whose key order is
/// the application order; duplicate keys are kept here so validation can
/// reject them instead of silently keeping the last one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectChain(Vec<EffectStep>);

impl EffectChain {
    pub fn new(steps: Vec<EffectStep>) -> Self {
        Self(steps)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EffectStep> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn first_duplicate(&self) -> Option<&str> {
        let mut seen = HashSet::new();
        self.0
            .iter()
            .map(|s| s.name.as_str())
            .find(|name| !seen.insert(*name))
    }
}

impl<const N: usize> From<[(&str, Value); N]> for EffectChain {
    fn from(steps: [(&str, Value); N]) -> Self {
        Self(
            steps
                .into_iter()
                .map(|(name, params)| EffectStep {
                    name: name.to_string(),
                    params,
                })
                .collect(),
        )
    }
}

impl Serialize for EffectChain {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for step in &self.0 {
            map.serialize_entry(&step.name, &step.params)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for EffectChain {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ChainVisitor;

        impl<'de> Visitor<'de> for ChainVisitor {
            type Value = EffectChain;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of effect name to parameters")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut steps = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, params)) = access.next_entry::<String, Value>()? {
                    steps.push(EffectStep { name, params });
                }
                Ok(EffectChain(steps))
            }
        }

        deserializer.deserialize_map(ChainVisitor)
    }
}

/// Submission request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub audio_file_id: i64,
    #[serde(default)]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub effects_config: Option<EffectChain>,
    /// Kept as a string so an unknown value is a validation error rather
    /// than a body rejection.
    #[serde(default)]
    pub output_format: Option<String>,
    #[serde(default)]
    pub callback_url: Option<String>,
}

/// Validated insert payload for the job store.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub name: String,
    pub description: Option<String>,
    pub audio_file_id: i64,
    pub project_id: Option<i64>,
    pub effects_config: EffectChain,
    pub output_format: OutputFormat,
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub audio_file_id: i64,
    pub project_id: Option<i64>,
    pub effects_config: EffectChain,
    pub output_format: OutputFormat,
    pub status: JobStatus,
    pub progress: f64,
    pub current_step: Option<String>,
    pub callback_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result_location: Option<String>,
    pub error: Option<String>,
}

/// What the status endpoint returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub id: i64,
    pub status: JobStatus,
    pub progress: f64,
    pub current_step: Option<String>,
    pub result_location: Option<String>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            status: job.status,
            progress: job.progress,
            current_step: job.current_step.clone(),
            result_location: job.result_location.clone(),
            error: job.error.clone(),
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: i64,
    pub name: String,
    pub status: JobStatus,
    pub audio_file_id: i64,
    pub project_id: Option<i64>,
    pub output_format: OutputFormat,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobSummary {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            name: job.name,
            status: job.status,
            audio_file_id: job.audio_file_id,
            project_id: job.project_id,
            output_format: job.output_format,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobFilter {
    pub project_id: Option<i64>,
    pub status: Option<JobStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub total: i64,
    pub queue_depth: i64,
    /// `processing` jobs not touched within the stale window.
    pub stale_processing: i64,
}

impl JobStats {
    pub fn record(&mut self, status: JobStatus, count: i64) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Processing => self.processing += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::Failed => self.failed += count,
        }
        self.total += count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_parses_from_its_display_form() {
        for status in JobStatus::ALL {
            assert_eq!(status.to_string().parse::<JobStatus>(), Ok(status));
        }
        assert!("bogus".parse::<JobStatus>().is_err());
    }

    #[test]
    fn status_transitions_are_one_directional() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Processing.can_transition_to(Pending));
        for terminal in [Completed, Failed] {
            assert!(terminal.is_terminal());
            for next in JobStatus::ALL {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn output_format_rejects_ogg() {
        assert_eq!("MP3".parse::<OutputFormat>(), Ok(OutputFormat::Mp3));
        assert!("ogg".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn effect_chain_keeps_wire_order() {
        let chain: EffectChain = serde_json::from_str(
            r#"{"eq_adjustment": {"low_gain_db": 3}, "compression": {}, "voice_enhancement": {"enabled": false}}"#,
        )
        .unwrap();
        assert_eq!(chain.names(), vec!["eq_adjustment", "compression", "voice_enhancement"]);
        assert!(!chain.iter().nth(2).unwrap().is_enabled());
        assert_eq!(
            serde_json::to_value(&chain).unwrap(),
            json!({"eq_adjustment": {"low_gain_db": 3}, "compression": {}, "voice_enhancement": {"enabled": false}})
        );
    }

    #[test]
    fn effect_chain_reports_duplicate_keys() {
        let chain: EffectChain =
            serde_json::from_str(r#"{"compression": {}, "compression": {"ratio": 2}}"#).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.first_duplicate(), Some("compression"));
    }
}
