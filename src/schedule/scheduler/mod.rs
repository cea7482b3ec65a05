mod job_manager;
mod worker;

use std::num::NonZeroU32;
use std::sync::Arc;

use anyhow::Result;
use governor::{Quota, RateLimiter};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

use crate::audio::AudioTools;

pub use job_manager::JobManager;
pub use worker::{DispatchLimiter, JobWorker, WorkerConfig};

/// Owns the worker pool and the background stale-job reporter.
pub struct JobScheduler {
    manager: Arc<JobManager>,
    tools: AudioTools,
    config: WorkerConfig,
    limiter: Option<Arc<DispatchLimiter>>,
    stale_check_interval: Duration,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl JobScheduler {
    pub fn new(manager: Arc<JobManager>, tools: AudioTools, config: WorkerConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            manager,
            tools,
            config,
            limiter: None,
            stale_check_interval: Duration::from_secs(60),
            workers: Mutex::new(Vec::new()),
            shutdown,
        }
    }

    /// Cap on leases per second across all workers. `0` means unlimited.
    pub fn with_dispatch_rate(mut self, per_second: u32) -> Self {
        self.limiter = NonZeroU32::new(per_second)
            .map(|rate| Arc::new(RateLimiter::direct(Quota::per_second(rate))));
        self
    }

    pub fn with_stale_check_interval(mut self, interval: Duration) -> Self {
        self.stale_check_interval = interval;
        self
    }

    pub fn manager(&self) -> &Arc<JobManager> {
        &self.manager
    }

    pub async fn spawn_workers(&self, count: usize) {
        let mut workers = self.workers.lock().await;
        for index in 0..count {
            let id = format!("worker-{}-{}", index, &Uuid::new_v4().simple().to_string()[..8]);
            let worker = JobWorker::new(
                id,
                self.manager.clone(),
                self.tools.clone(),
                self.config.clone(),
                self.shutdown.subscribe(),
            )
            .with_limiter(self.limiter.clone());
            workers.push(tokio::spawn(worker.run()));
        }
        info!("Spawned {} worker(s), {} running", count, workers.len());
    }

    /// Report stale jobs periodically and wait for the workers to exit.
    pub async fn run(&self) -> Result<()> {
        let manager = self.manager.clone();
        let interval = self.stale_check_interval;
        let mut shutdown = self.shutdown.subscribe();
        let reporter = tokio::spawn(async move {
            loop {
                if let Err(e) = manager.report_stale_jobs().await {
                    error!("Error checking for stale jobs: {}", e);
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.changed() => break,
                }
            }
        });

        let handles: Vec<_> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            handle.await?;
        }
        reporter.abort();
        Ok(())
    }

    /// Ask every worker to stop after its current job.
    pub fn shutdown(&self) {
        info!("Stopping workers");
        self.shutdown.send_replace(true);
    }
}

