use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

mod error;
mod extract;
pub mod handlers;
mod pagination;

pub use extract::{ApiJson, ApiQuery};
pub use pagination::Pagination;

use crate::AppContext;

pub async fn start_server(ctx: Arc<AppContext>, addr: SocketAddr) -> anyhow::Result<()> {
    info!("Starting server on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    serve(ctx, listener, shutdown_signal()).await
}

/// Serve the API on an already bound listener until `shutdown` resolves.
pub async fn serve<F>(ctx: Arc<AppContext>, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = handlers::router(ctx);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
