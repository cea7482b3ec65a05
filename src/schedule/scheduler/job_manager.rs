use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::error::JobError;
use crate::schedule::callback::{EventCallback, JobEvent};
use crate::schedule::effects::EffectRegistry;
use crate::schedule::types::{
    EffectChain, Job, JobFilter, JobStats, JobStatusView, JobSubmission, NewJob, OutputFormat,
};
use crate::storage::catalog::CatalogStorage;
use crate::storage::job::JobStorage;
use crate::storage::queue::TaskQueue;
use crate::web::Pagination;

const MAX_NAME_LEN: usize = 255;

/// Front door of the pipeline: validates submissions, creates and enqueues
/// jobs, and serves reads of job state.
pub struct JobManager {
    jobs: Arc<dyn JobStorage>,
    catalog: Arc<dyn CatalogStorage>,
    queue: Arc<dyn TaskQueue>,
    effects: Arc<EffectRegistry>,
    events: EventCallback,
    default_output_format: OutputFormat,
    stale_after: chrono::Duration,
}

impl JobManager {
    pub fn new(
        jobs: Arc<dyn JobStorage>,
        catalog: Arc<dyn CatalogStorage>,
        queue: Arc<dyn TaskQueue>,
        effects: Arc<EffectRegistry>,
    ) -> Self {
        Self {
            jobs,
            catalog,
            queue,
            effects,
            events: EventCallback::new(64),
            default_output_format: OutputFormat::Wav,
            stale_after: chrono::Duration::hours(1),
        }
    }

    pub fn with_default_output_format(mut self, format: OutputFormat) -> Self {
        self.default_output_format = format;
        self
    }

    pub fn with_stale_after(mut self, stale_after: chrono::Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn jobs(&self) -> &Arc<dyn JobStorage> {
        &self.jobs
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogStorage> {
        &self.catalog
    }

    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }

    pub fn effects(&self) -> &Arc<EffectRegistry> {
        &self.effects
    }

    pub fn events(&self) -> &EventCallback {
        &self.events
    }

    /// Terminal transitions observed by this process's workers.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Validate, persist as `pending` and enqueue exactly one task.
    ///
    /// Nothing is written when validation fails. If the enqueue fails the
    /// job is left `failed` with an `enqueue failure` error.
    pub async fn submit(&self, submission: JobSubmission) -> Result<Job, JobError> {
        let new_job = self.validate(submission).await?;

        let job = self.jobs.insert(&new_job).await?;
        info!(job_id = job.id, audio_file_id = job.audio_file_id, "Created job '{}'", job.name);

        if let Err(e) = self.queue.enqueue(job.id).await {
            error!(job_id = job.id, "Failed to enqueue job: {}", e);
            let detail = format!("enqueue failure: {}", e);
            if let Err(mark_err) = self.jobs.fail(job.id, &detail).await {
                error!(job_id = job.id, "Failed to mark job as failed: {}", mark_err);
            }
            return Err(JobError::EnqueueFailure(e.to_string()));
        }

        Ok(job)
    }

    async fn validate(&self, submission: JobSubmission) -> Result<NewJob, JobError> {
        let name = submission.name.trim().to_string();
        if name.is_empty() {
            return Err(JobError::invalid("name", "must not be empty"));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(JobError::invalid("name", format!("must be at most {} characters", MAX_NAME_LEN)));
        }

        let output_format = match submission.output_format.as_deref() {
            None => self.default_output_format,
            Some(raw) => raw
                .parse::<OutputFormat>()
                .map_err(|reason| JobError::invalid("output_format", reason))?,
        };

        let effects_config = submission.effects_config.unwrap_or_default();
        self.validate_effects(&effects_config)?;

        let callback_url = match submission.callback_url {
            Some(url) if !url.trim().is_empty() => Some(validate_callback_url(url.trim())?),
            _ => None,
        };

        if self.catalog.get_audio_file(submission.audio_file_id).await?.is_none() {
            return Err(JobError::not_found("audio file", submission.audio_file_id));
        }
        if let Some(project_id) = submission.project_id {
            match self.catalog.get_project(project_id).await? {
                None => return Err(JobError::not_found("project", project_id)),
                Some(project) if !project.is_active => {
                    return Err(JobError::invalid(
                        "project_id",
                        format!("project {} is inactive", project_id),
                    ))
                }
                Some(_) => {}
            }
        }

        Ok(NewJob {
            name,
            description: submission.description,
            audio_file_id: submission.audio_file_id,
            project_id: submission.project_id,
            effects_config,
            output_format,
            callback_url,
        })
    }

    fn validate_effects(&self, chain: &EffectChain) -> Result<(), JobError> {
        if let Some(duplicate) = chain.first_duplicate() {
            return Err(JobError::invalid(
                "effects_config",
                format!("effect '{}' appears more than once", duplicate),
            ));
        }

        for step in chain.iter() {
            let field = format!("effects_config.{}", step.name);
            let effect = self.effects.get(&step.name).ok_or_else(|| {
                JobError::invalid(
                    field.clone(),
                    format!(
                        "unknown effect '{}', expected one of: {}",
                        step.name,
                        self.effects.names().join(", ")
                    ),
                )
            })?;

            match step.params.get("enabled") {
                None | Some(Value::Bool(_)) => {}
                Some(_) => return Err(JobError::invalid(field, "'enabled' must be a boolean")),
            }
            if !step.is_enabled() {
                continue;
            }

            effect
                .validate_params(&step.params)
                .map_err(|e| JobError::invalid(field, e.to_string()))?;
        }
        Ok(())
    }

    pub async fn get_job(&self, id: i64) -> Result<Job, JobError> {
        self.jobs
            .get(id)
            .await?
            .ok_or_else(|| JobError::not_found("job", id))
    }

    /// Read-only; repeated calls with no worker progress return the same
    /// view.
    pub async fn get_status(&self, id: i64) -> Result<JobStatusView, JobError> {
        let job = self.get_job(id).await?;
        Ok(JobStatusView::from(&job))
    }

    pub async fn list_jobs(&self, filter: &JobFilter, pagination: &Pagination) -> Result<Vec<Job>, JobError> {
        Ok(self.jobs.list(filter, pagination).await?)
    }

    pub async fn stale_jobs(&self) -> Result<Vec<Job>, JobError> {
        Ok(self.jobs.stale(Utc::now() - self.stale_after).await?)
    }

    pub async fn stats(&self) -> Result<JobStats, JobError> {
        let mut stats = JobStats::default();
        for (status, count) in self.jobs.count_by_status().await? {
            stats.record(status, count);
        }
        stats.queue_depth = self.queue.depth().await?;
        stats.stale_processing = self.stale_jobs().await?.len() as i64;
        Ok(stats)
    }

    pub fn effect_names(&self) -> Vec<String> {
        self.effects.names()
    }

    /// Log `processing` jobs that have not moved within the stale window.
    /// They are not retried.
    pub async fn report_stale_jobs(&self) -> Result<usize, JobError> {
        let stale = self.stale_jobs().await?;
        for job in &stale {
            warn!(
                job_id = job.id,
                updated_at = %job.updated_at,
                "Job has been processing without progress; its worker probably died"
            );
        }
        Ok(stale.len())
    }
}

fn validate_callback_url(raw: &str) -> Result<String, JobError> {
    let url = reqwest::Url::parse(raw)
        .map_err(|e| JobError::invalid("callback_url", e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url.to_string()),
        other => Err(JobError::invalid(
            "callback_url",
            format!("unsupported scheme '{}'", other),
        )),
    }
}
