use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::RateLimiter;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use super::JobManager;
use crate::audio::{AudioStream, AudioTools};
use crate::error::ExecutionError;
use crate::schedule::callback::{HttpCallback, JobCallback};
use crate::schedule::types::{Job, JobStatus, OutputFormat};
use crate::storage::queue::Delivery;

pub type DispatchLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Lease length; renewed every third of it while a job runs.
    pub ack_timeout: Duration,
    pub job_timeout: Duration,
    /// Sleep between polls of an empty queue.
    pub poll_interval: Duration,
    pub output_dir: PathBuf,
}

/// Pulls one task at a time from the queue and runs its job to a terminal
/// state.
pub struct JobWorker {
    id: String,
    manager: Arc<JobManager>,
    tools: AudioTools,
    config: WorkerConfig,
    limiter: Option<Arc<DispatchLimiter>>,
    shutdown: watch::Receiver<bool>,
}

impl JobWorker {
    pub fn new(
        id: String,
        manager: Arc<JobManager>,
        tools: AudioTools,
        config: WorkerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            manager,
            tools,
            config,
            limiter: None,
            shutdown,
        }
    }

    pub fn with_limiter(mut self, limiter: Option<Arc<DispatchLimiter>>) -> Self {
        self.limiter = limiter;
        self
    }

    pub async fn run(mut self) {
        info!(worker = %self.id, "Worker started");
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            match self.process_next().await {
                Ok(true) => continue,
                Ok(false) => {
                    tokio::select! {
                        _ = sleep(self.config.poll_interval) => {}
                        _ = self.shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    error!(worker = %self.id, "Error processing task: {}", e);
                    sleep(Duration::from_millis(100)).await;
                }
            }
        }
        info!(worker = %self.id, "Worker stopped");
    }

    /// Lease and handle one task. `Ok(false)` when the queue was empty.
    pub async fn process_next(&self) -> Result<bool> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let delivery = match self
            .manager
            .queue()
            .lease(&self.id, self.config.ack_timeout)
            .await?
        {
            Some(delivery) => delivery,
            None => return Ok(false),
        };

        self.handle(delivery).await?;
        Ok(true)
    }

    async fn handle(&self, delivery: Delivery) -> Result<()> {
        let job_id = delivery.job_id;
        let job = match self.manager.jobs().get(job_id).await? {
            Some(job) => job,
            None => {
                warn!(worker = %self.id, job_id, "Dropping task for unknown job");
                self.ack(&delivery).await;
                return Ok(());
            }
        };

        if !self.manager.jobs().claim(job_id).await? {
            // a previous holder died mid-run or the job already finished
            warn!(
                worker = %self.id,
                job_id,
                status = %job.status,
                attempts = delivery.attempts,
                "Job is not pending, dropping redelivered task"
            );
            self.ack(&delivery).await;
            return Ok(());
        }

        info!(worker = %self.id, job_id, attempt = delivery.attempts, "Processing job '{}'", job.name);
        let heartbeat = self.spawn_heartbeat(delivery.clone());

        let cancelled = Arc::new(AtomicBool::new(false));
        let outcome = tokio::time::timeout(
            self.config.job_timeout,
            self.execute(&job, cancelled.clone()),
        )
        .await;
        heartbeat.abort();

        let stored = match outcome {
            Ok(Ok(location)) => {
                info!(job_id, "Job completed: {}", location);
                self.manager.jobs().complete(job_id, &location).await
            }
            Ok(Err(e)) => {
                warn!(job_id, "Job failed: {}", e);
                self.manager.jobs().fail(job_id, &e.to_string()).await
            }
            Err(_) => {
                warn!(job_id, timeout = ?self.config.job_timeout, "Job timed out");
                // blocking encode work may still be running; it checks the flag
                // once its file is written
                cancelled.store(true, Ordering::SeqCst);
                self.discard_outputs(job_id).await;
                self.manager.jobs().fail(job_id, &ExecutionError::Timeout.to_string()).await
            }
        };

        match stored {
            Ok(true) => {}
            Ok(false) => warn!(job_id, "Job left processing before its result was recorded"),
            Err(e) => error!(job_id, "Failed to record job result: {}", e),
        }

        self.ack(&delivery).await;
        self.notify(job_id).await;
        Ok(())
    }

    async fn execute(
        &self,
        job: &Job,
        cancelled: Arc<AtomicBool>,
    ) -> std::result::Result<String, ExecutionError> {
        let audio = self
            .manager
            .catalog()
            .get_audio_file(job.audio_file_id)
            .await
            .map_err(|e| ExecutionError::Storage(e.to_string()))?
            .ok_or(ExecutionError::MissingInput(job.audio_file_id))?;

        let tools = self.tools.clone();
        let input = PathBuf::from(&audio.file_path);
        let mut stream = tokio::task::spawn_blocking(move || tools.load(&input))
            .await
            .map_err(|e| ExecutionError::Decode(e.to_string()))?
            .map_err(|e| ExecutionError::Decode(e.to_string()))?;

        let steps: Vec<_> = job.effects_config.iter().filter(|s| s.is_enabled()).collect();
        let total = steps.len() + 1;

        for (index, step) in steps.iter().enumerate() {
            self.progress(job.id, index as f64 / total as f64, &step.name).await;

            let effect = self
                .manager
                .effects()
                .get(&step.name)
                .ok_or_else(|| ExecutionError::UnknownEffect(step.name.clone()))?;
            stream = effect
                .apply(stream, &step.params)
                .await
                .map_err(|e| ExecutionError::Effect {
                    effect: step.name.clone(),
                    message: e.to_string(),
                })?;
        }

        self.progress(job.id, steps.len() as f64 / total as f64, "encoding").await;

        let dest = self.output_path(job, &audio.original_filename);
        let tools = self.tools.clone();
        let format = job.output_format;
        let target = dest.clone();
        tokio::task::spawn_blocking(move || encode_output(&tools, &stream, format, &target, &cancelled))
            .await
            .map_err(|e| ExecutionError::Encode(e.to_string()))??;

        Ok(dest.to_string_lossy().to_string())
    }

    /// Remove every output file written for `job_id`.
    async fn discard_outputs(&self, job_id: i64) {
        let prefix = format!("job-{}-", job_id);
        let mut entries = match tokio::fs::read_dir(&self.config.output_dir).await {
            Ok(entries) => entries,
            Err(_) => return,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if !entry.file_name().to_string_lossy().starts_with(&prefix) {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => info!(job_id, "Removed partial output {}", entry.path().display()),
                Err(e) => warn!(job_id, "Failed to remove {}: {}", entry.path().display(), e),
            }
        }
    }

    fn output_path(&self, job: &Job, original_filename: &str) -> PathBuf {
        let stem = Path::new(original_filename)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "audio".to_string());
        self.config.output_dir.join(format!(
            "job-{}-{}_processed.{}",
            job.id,
            stem,
            job.output_format.extension()
        ))
    }

    async fn progress(&self, job_id: i64, progress: f64, step: &str) {
        if let Err(e) = self.manager.jobs().update_progress(job_id, progress, step).await {
            warn!(job_id, "Failed to update progress: {}", e);
        }
    }

    fn spawn_heartbeat(&self, delivery: Delivery) -> tokio::task::JoinHandle<()> {
        let queue = self.manager.queue().clone();
        let visibility = self.config.ack_timeout;
        let every = (visibility / 3).max(Duration::from_millis(10));
        tokio::spawn(async move {
            loop {
                sleep(every).await;
                match queue.extend(&delivery, visibility).await {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(job_id = delivery.job_id, "Lost the lease on a running job");
                        break;
                    }
                    Err(e) => warn!(job_id = delivery.job_id, "Failed to extend lease: {}", e),
                }
            }
        })
    }

    async fn ack(&self, delivery: &Delivery) {
        match self.manager.queue().ack(delivery).await {
            Ok(true) => {}
            Ok(false) => warn!(job_id = delivery.job_id, "Lease expired before ack"),
            Err(e) => error!(job_id = delivery.job_id, "Failed to ack task: {}", e),
        }
    }

    async fn notify(&self, job_id: i64) {
        let job = match self.manager.jobs().get(job_id).await {
            Ok(Some(job)) if job.status.is_terminal() => job,
            Ok(_) => return,
            Err(e) => {
                error!(job_id, "Failed to reload job for callbacks: {}", e);
                return;
            }
        };

        let mut callbacks: Vec<Box<dyn JobCallback>> = vec![Box::new(self.manager.events().clone())];
        if let Some(url) = &job.callback_url {
            callbacks.push(Box::new(HttpCallback::new(url.clone())));
        }

        for callback in callbacks {
            let result = match job.status {
                JobStatus::Completed => callback.on_complete(&job).await,
                _ => {
                    let error = job.error.as_deref().unwrap_or_default();
                    callback.on_error(&job, error).await
                }
            };
            if let Err(e) = result {
                warn!(job_id, "Callback failed: {}", e);
            }
        }
    }
}

/// Encode `stream` to `target` unless the job was cancelled. A file finished
/// after cancellation is removed again.
fn encode_output(
    tools: &AudioTools,
    stream: &AudioStream,
    format: OutputFormat,
    target: &Path,
    cancelled: &AtomicBool,
) -> std::result::Result<(), ExecutionError> {
    if cancelled.load(Ordering::SeqCst) {
        return Err(ExecutionError::Timeout);
    }
    tools
        .encode(stream, format, target)
        .map_err(|e| ExecutionError::Encode(e.to_string()))?;
    if cancelled.load(Ordering::SeqCst) {
        if let Err(e) = std::fs::remove_file(target) {
            warn!("Failed to remove cancelled output {}: {}", target.display(), e);
        }
        return Err(ExecutionError::Timeout);
    }
    Ok(())
}
