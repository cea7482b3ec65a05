#![allow(clippy::uninlined_format_args)]

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use fx_engine::config::Settings;
use fx_engine::schedule::JobScheduler;
use fx_engine::utils::logger;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::from_env()?;
    let _guard = logger::init(&settings.log_dir)?;
    settings.ensure_dirs()?;

    info!("Starting FX engine {} ({})", env!("CARGO_PKG_VERSION"), env!("GIT_HASH"));

    let addr = settings.bind_addr()?;
    let workers = settings.max_concurrent_jobs;
    let dispatch_rate = settings.dispatch_rate_per_sec;
    let stale_check_interval = settings.stale_check_interval();

    info!("Initializing storage and job manager...");
    let ctx = fx_engine::bootstrap(settings).await?;

    info!("Initializing scheduler with {} worker(s)...", workers);
    let scheduler = Arc::new(
        JobScheduler::new(ctx.jobs.clone(), ctx.audio_tools(), ctx.worker_config())
            .with_dispatch_rate(dispatch_rate)
            .with_stale_check_interval(stale_check_interval),
    );
    scheduler.spawn_workers(workers).await;

    let runner = scheduler.clone();
    let scheduler_handle = tokio::spawn(async move {
        if let Err(e) = runner.run().await {
            error!("Scheduler error: {}", e);
        }
    });

    info!("Starting HTTP server at http://{}", addr);
    let served = fx_engine::web::start_server(ctx.clone(), addr).await;
    match &served {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => error!("Server error: {}", e),
    }

    info!("Shutting down...");
    scheduler.shutdown();
    if let Err(e) = scheduler_handle.await {
        error!("Scheduler task panicked: {}", e);
    }

    served
}
