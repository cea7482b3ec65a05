use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::json;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tokio::sync::watch;

use super::*;
use crate::audio::{wav_info, AudioTools};
use crate::error::JobError;
use crate::media::types::{NewAudioFile, NewProject};
use crate::storage::catalog::sqlite::SqliteCatalogStorage;
use crate::storage::catalog::CatalogStorage;
use crate::storage::job::sqlite::SqliteJobStorage;
use crate::storage::memory_pool;
use crate::storage::queue::sqlite::SqliteTaskQueue;
use crate::storage::queue::{Delivery, TaskQueue};
use crate::test_support::{write_sine_wav, CountingEffect, FailingEffect, SlowEffect};
use crate::web::Pagination;

struct Pipeline {
    manager: Arc<JobManager>,
    pool: SqlitePool,
    dir: TempDir,
    audio_id: i64,
    _shutdown: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Pipeline {
    async fn new(extra: Vec<Box<dyn AudioEffect>>) -> Self {
        let pool = memory_pool().await;
        Self::with_queue(pool.clone(), Arc::new(SqliteTaskQueue::new(pool)), extra).await
    }

    async fn with_queue(pool: SqlitePool, queue: Arc<dyn TaskQueue>, extra: Vec<Box<dyn AudioEffect>>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let tools = AudioTools::new("ffmpeg", dir.path().join("tmp"));
        let mut registry = EffectRegistry::builtin(dir.path(), tools);
        for effect in extra {
            registry.register(effect);
        }

        let catalog = Arc::new(SqliteCatalogStorage::new(pool.clone()));
        let input = write_sine_wav(dir.path(), "line.wav");
        let audio = catalog.create_audio_file(&audio_row(&input)).await.unwrap();

        let manager = JobManager::new(
            Arc::new(SqliteJobStorage::new(pool.clone())),
            catalog,
            queue,
            Arc::new(registry),
        );
        let (tx, rx) = watch::channel(false);

        Self {
            manager: Arc::new(manager),
            pool,
            dir,
            audio_id: audio.id,
            _shutdown: tx,
            shutdown_rx: rx,
        }
    }

    fn config(&self, job_timeout: Duration) -> WorkerConfig {
        WorkerConfig {
            ack_timeout: Duration::from_secs(30),
            job_timeout,
            poll_interval: Duration::from_millis(20),
            output_dir: self.dir.path().join("processed"),
        }
    }

    fn worker(&self, job_timeout: Duration) -> JobWorker {
        JobWorker::new(
            "test-worker".to_string(),
            self.manager.clone(),
            AudioTools::new("ffmpeg", self.dir.path().join("tmp")),
            self.config(job_timeout),
            self.shutdown_rx.clone(),
        )
    }

    fn submission(&self, effects: serde_json::Value) -> JobSubmission {
        JobSubmission {
            name: "scene 4 - storm".to_string(),
            description: None,
            audio_file_id: self.audio_id,
            project_id: None,
            effects_config: Some(serde_json::from_value(effects).unwrap()),
            output_format: None,
            callback_url: None,
        }
    }

    async fn job_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM processing_jobs")
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }
}

fn audio_row(path: &Path) -> NewAudioFile {
    NewAudioFile {
        filename: "line.wav".to_string(),
        original_filename: "line.wav".to_string(),
        file_path: path.to_string_lossy().to_string(),
        file_size: 16_044,
        format: "wav".to_string(),
        sample_rate: Some(8_000),
        channels: Some(1),
        duration: Some(1.0),
        project_id: None,
    }
}

struct FailingQueue;

#[async_trait]
impl TaskQueue for FailingQueue {
    async fn enqueue(&self, _job_id: i64) -> Result<i64> {
        Err(anyhow!("broker unreachable"))
    }
    async fn lease(&self, _worker_id: &str, _visibility: Duration) -> Result<Option<Delivery>> {
        Ok(None)
    }
    async fn extend(&self, _delivery: &Delivery, _visibility: Duration) -> Result<bool> {
        Ok(false)
    }
    async fn ack(&self, _delivery: &Delivery) -> Result<bool> {
        Ok(false)
    }
    async fn depth(&self) -> Result<i64> {
        Ok(0)
    }
    async fn count_for_job(&self, _job_id: i64) -> Result<i64> {
        Ok(0)
    }
}

const LONG: Duration = Duration::from_secs(30);

#[tokio::test]
async fn test_submit_creates_pending_job_and_one_task() {
    let p = Pipeline::new(vec![]).await;
    let job = p
        .manager
        .submit(p.submission(json!({"voice_enhancement": {}, "compression": {"ratio": 3}})))
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.output_format, OutputFormat::Wav);
    assert_eq!(p.manager.queue().count_for_job(job.id).await.unwrap(), 1);
    assert_eq!(p.manager.queue().depth().await.unwrap(), 1);
}

#[tokio::test]
async fn test_unknown_effect_is_rejected_without_side_effects() {
    let p = Pipeline::new(vec![]).await;
    let err = p
        .manager
        .submit(p.submission(json!({"reverse": {}})))
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::InvalidConfig { .. }));
    assert_eq!(err.field(), Some("effects_config.reverse"));
    assert_eq!(p.job_count().await, 0);
    assert_eq!(p.manager.queue().depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_unsupported_output_format_is_rejected() {
    let p = Pipeline::new(vec![]).await;
    let mut submission = p.submission(json!({}));
    submission.output_format = Some("ogg".to_string());

    let err = p.manager.submit(submission).await.unwrap_err();
    assert_eq!(err.field(), Some("output_format"));
    assert_eq!(p.job_count().await, 0);
}

#[tokio::test]
async fn test_duplicate_effect_is_rejected() {
    let p = Pipeline::new(vec![]).await;
    let submission = JobSubmission {
        effects_config: Some(
            serde_json::from_str(r#"{"compression": {}, "compression": {"ratio": 2}}"#).unwrap(),
        ),
        ..p.submission(json!({}))
    };
    let err = p.manager.submit(submission).await.unwrap_err();
    assert_eq!(err.field(), Some("effects_config"));
    assert_eq!(p.job_count().await, 0);
}

#[tokio::test]
async fn test_bad_effect_params_are_rejected() {
    let p = Pipeline::new(vec![]).await;
    let err = p
        .manager
        .submit(p.submission(json!({"compression": {"ratio": 0.1}})))
        .await
        .unwrap_err();
    assert_eq!(err.field(), Some("effects_config.compression"));
}

#[tokio::test]
async fn test_missing_audio_file_is_not_found() {
    let p = Pipeline::new(vec![]).await;
    let mut submission = p.submission(json!({}));
    submission.audio_file_id = 999_999;

    let err = p.manager.submit(submission).await.unwrap_err();
    assert!(matches!(err, JobError::NotFound { id: 999_999, .. }));
    assert_eq!(p.job_count().await, 0);
}

#[tokio::test]
async fn test_missing_project_is_not_found() {
    let p = Pipeline::new(vec![]).await;
    let mut submission = p.submission(json!({}));
    submission.project_id = Some(77);
    assert!(matches!(
        p.manager.submit(submission).await.unwrap_err(),
        JobError::NotFound { entity: "project", id: 77 }
    ));
}

#[tokio::test]
async fn test_inactive_project_is_rejected() {
    let p = Pipeline::new(vec![]).await;
    let project = p
        .manager
        .catalog()
        .create_project(&NewProject {
            name: "Archived".to_string(),
            description: None,
        })
        .await
        .unwrap();
    assert!(p.manager.catalog().deactivate_project(project.id).await.unwrap());

    let mut submission = p.submission(json!({}));
    submission.project_id = Some(project.id);
    let err = p.manager.submit(submission).await.unwrap_err();
    assert!(matches!(err, JobError::InvalidConfig { .. }));
    assert_eq!(err.field(), Some("project_id"));
    assert_eq!(p.job_count().await, 0);
}

#[tokio::test]
async fn test_enqueue_failure_marks_job_failed() {
    let pool = memory_pool().await;
    let p = Pipeline::with_queue(pool, Arc::new(FailingQueue), vec![]).await;

    let err = p.manager.submit(p.submission(json!({}))).await.unwrap_err();
    assert!(matches!(err, JobError::EnqueueFailure(_)));

    let jobs = p
        .manager
        .list_jobs(&Default::default(), &Pagination::default())
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert!(jobs[0].error.as_deref().unwrap().starts_with("enqueue failure"));
}

#[tokio::test]
async fn test_worker_runs_builtin_chain_to_completion() {
    let p = Pipeline::new(vec![]).await;
    let mut events = p.manager.subscribe();
    let job = p
        .manager
        .submit(p.submission(json!({
            "eq_adjustment": {"low_gain_db": 3, "high_gain_db": -2},
            "compression": {},
            "voice_enhancement": {"target_peak": 0.9}
        })))
        .await
        .unwrap();

    assert!(p.worker(LONG).process_next().await.unwrap());

    let done = p.manager.get_job(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.progress, 1.0);
    assert!(done.error.is_none());
    let location = done.result_location.clone().unwrap();
    assert!(location.ends_with("line_processed.wav"));
    let info = wav_info(Path::new(&location)).unwrap();
    assert_eq!(info.sample_rate, 8_000);

    assert_eq!(
        events.recv().await.unwrap(),
        JobEvent::Completed {
            job_id: job.id,
            result_location: location
        }
    );
    assert_eq!(p.manager.queue().depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_second_effect_failure_stops_the_chain() {
    let first = CountingEffect::new("first");
    let third = CountingEffect::new("third");
    let (first_calls, third_calls) = (first.calls.clone(), third.calls.clone());
    let p = Pipeline::new(vec![
        Box::new(first),
        Box::new(FailingEffect {
            name: "second",
            message: "clipping detected",
        }),
        Box::new(third),
    ])
    .await;

    let job = p
        .manager
        .submit(p.submission(json!({"first": {}, "second": {}, "third": {}})))
        .await
        .unwrap();
    p.worker(LONG).process_next().await.unwrap();

    let failed = p.manager.get_job(job.id).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("effect 'second' failed: clipping detected"));
    assert!(failed.result_location.is_none());
    assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    assert_eq!(third_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_disabled_effect_is_skipped() {
    let skipped = CountingEffect::new("skipped");
    let calls = skipped.calls.clone();
    let p = Pipeline::new(vec![Box::new(skipped)]).await;

    let job = p
        .manager
        .submit(p.submission(json!({"skipped": {"enabled": false}})))
        .await
        .unwrap();
    p.worker(LONG).process_next().await.unwrap();

    assert_eq!(p.manager.get_job(job.id).await.unwrap().status, JobStatus::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_timeout_discards_job_output() {
    let p = Pipeline::new(vec![Box::new(SlowEffect {
        name: "slow",
        delay: Duration::from_millis(300),
    })])
    .await;

    let job = p.manager.submit(p.submission(json!({"slow": {}}))).await.unwrap();
    let output_dir = p.dir.path().join("processed");
    std::fs::create_dir_all(&output_dir).unwrap();
    // written by an encode that outlived the timeout
    let partial = output_dir.join(format!("job-{}-line_processed.wav", job.id));
    std::fs::write(&partial, b"RIFF").unwrap();
    let other = output_dir.join(format!("job-{}-line_processed.wav", job.id + 100));
    std::fs::write(&other, b"RIFF").unwrap();

    let worker = p.worker(Duration::from_millis(50));
    assert!(worker.process_next().await.unwrap());
    assert_eq!(
        p.manager.get_job(job.id).await.unwrap().error.as_deref(),
        Some("timeout")
    );

    tokio::time::sleep(Duration::from_millis(400)).await;
    let prefix = format!("job-{}-", job.id);
    let leftovers: Vec<_> = std::fs::read_dir(&output_dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with(&prefix))
        .collect();
    assert!(leftovers.is_empty(), "unexpected output: {:?}", leftovers);
    assert!(other.exists());
}

#[tokio::test]
async fn test_timeout_fails_job_and_is_not_redelivered() {
    let p = Pipeline::new(vec![Box::new(SlowEffect {
        name: "slow",
        delay: Duration::from_millis(500),
    })])
    .await;

    let job = p.manager.submit(p.submission(json!({"slow": {}}))).await.unwrap();
    let worker = p.worker(Duration::from_millis(50));
    assert!(worker.process_next().await.unwrap());

    let failed = p.manager.get_job(job.id).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("timeout"));
    assert!(failed.result_location.is_none());

    assert!(!worker.process_next().await.unwrap());
    assert_eq!(p.manager.queue().depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_lost_delivery_is_redelivered_and_completed() {
    let p = Pipeline::new(vec![]).await;
    let job = p.manager.submit(p.submission(json!({}))).await.unwrap();

    // a consumer leases and dies before claiming the job
    let lost = p
        .manager
        .queue()
        .lease("crashed", Duration::from_millis(20))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(lost.job_id, job.id);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(p.worker(LONG).process_next().await.unwrap());
    assert_eq!(p.manager.get_job(job.id).await.unwrap().status, JobStatus::Completed);
    assert!(!p.manager.queue().ack(&lost).await.unwrap());
}

#[tokio::test]
async fn test_redelivered_processing_job_is_dropped() {
    let p = Pipeline::new(vec![]).await;
    let job = p.manager.submit(p.submission(json!({}))).await.unwrap();

    // first worker claimed the job, then died holding the lease
    p.manager
        .queue()
        .lease("crashed", Duration::from_millis(20))
        .await
        .unwrap()
        .unwrap();
    assert!(p.manager.jobs().claim(job.id).await.unwrap());
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(p.worker(LONG).process_next().await.unwrap());

    let stuck = p.manager.get_job(job.id).await.unwrap();
    assert_eq!(stuck.status, JobStatus::Processing);
    assert_eq!(p.manager.queue().depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_only_one_worker_executes_a_job() {
    let counted = CountingEffect::new("counted");
    let calls = counted.calls.clone();
    let p = Pipeline::new(vec![Box::new(counted)]).await;
    let job = p.manager.submit(p.submission(json!({"counted": {}}))).await.unwrap();

    let (a, b) = (p.worker(LONG), p.worker(LONG));
    let (ra, rb) = tokio::join!(a.process_next(), b.process_next());
    assert_ne!(ra.unwrap(), rb.unwrap());

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(p.manager.get_job(job.id).await.unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn test_status_reads_do_not_mutate() {
    let p = Pipeline::new(vec![Box::new(FailingEffect {
        name: "broken",
        message: "bad buffer",
    })])
    .await;
    let pending = p.manager.submit(p.submission(json!({}))).await.unwrap();

    let first = p.manager.get_status(pending.id).await.unwrap();
    let second = p.manager.get_status(pending.id).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.status, JobStatus::Pending);

    // run it to completion, then fail a second job
    assert!(p.worker(LONG).process_next().await.unwrap());
    let failed = p.manager.submit(p.submission(json!({"broken": {}}))).await.unwrap();
    assert!(p.worker(LONG).process_next().await.unwrap());

    let completed_a = p.manager.get_status(pending.id).await.unwrap();
    let completed_b = p.manager.get_status(pending.id).await.unwrap();
    assert_eq!(completed_a.status, JobStatus::Completed);
    assert!(completed_a.result_location.is_some());
    assert_eq!(completed_a, completed_b);

    let failed_a = p.manager.get_status(failed.id).await.unwrap();
    let failed_b = p.manager.get_status(failed.id).await.unwrap();
    assert_eq!(failed_a.status, JobStatus::Failed);
    assert_eq!(failed_a.error.as_deref(), Some("effect 'broken' failed: bad buffer"));
    assert_eq!(failed_a, failed_b);

    assert!(matches!(
        p.manager.get_status(424_242).await.unwrap_err(),
        JobError::NotFound { .. }
    ));
}

#[tokio::test]
async fn test_stats_count_stale_processing_jobs() {
    let p = Pipeline::new(vec![]).await;
    let a = p.manager.submit(p.submission(json!({}))).await.unwrap();
    p.manager.submit(p.submission(json!({}))).await.unwrap();
    p.manager.jobs().claim(a.id).await.unwrap();

    let stats = p.manager.stats().await.unwrap();
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.processing, 1);
    assert_eq!(stats.total, 2);
    assert_eq!(stats.queue_depth, 2);
    assert_eq!(stats.stale_processing, 0);

    let manager = JobManager::new(
        p.manager.jobs().clone(),
        p.manager.catalog().clone(),
        p.manager.queue().clone(),
        p.manager.effects().clone(),
    )
    .with_stale_after(chrono::Duration::zero());
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(manager.report_stale_jobs().await.unwrap(), 1);
}

#[tokio::test]
async fn test_scheduler_drains_queue_and_shuts_down() {
    let p = Pipeline::new(vec![]).await;
    let mut events = p.manager.subscribe();
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(p.manager.submit(p.submission(json!({"compression": {}}))).await.unwrap().id);
    }

    let scheduler = Arc::new(
        JobScheduler::new(
            p.manager.clone(),
            AudioTools::new("ffmpeg", p.dir.path().join("tmp")),
            p.config(LONG),
        )
        .with_dispatch_rate(0)
        .with_stale_check_interval(Duration::from_millis(20)),
    );
    scheduler.spawn_workers(2).await;
    let runner = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run().await }
    });

    let mut finished = Vec::new();
    while finished.len() < 3 {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .unwrap()
            .unwrap();
        finished.push(event.job_id());
    }
    finished.sort();
    assert_eq!(finished, ids);

    scheduler.shutdown();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
