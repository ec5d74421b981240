//! `taskgraph serve`: run the scheduler's control loop and the HTTP surface
//! side by side until SIGINT, then drain.

use anyhow::Result;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::info;

use taskgraph_core::Scheduler;

use crate::config::KernelConfig;
use crate::http::{self, AppState};

pub async fn run_serve(pool: SqlitePool, config: &KernelConfig) -> Result<()> {
    let cancel = CancellationToken::new();

    let scheduler = Scheduler::new(pool.clone(), config.scheduler_config(), cancel.clone());
    let scheduler_handle = tokio::spawn(scheduler.run());

    let state = AppState { pool: pool.clone(), default_max_attempts: config.max_attempts };
    let app = http::build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "taskgraph serve listening");

    let server_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("received SIGINT, shutting down");
                }
                _ = server_cancel.cancelled() => {}
            }
        })
        .await?;

    cancel.cancel();
    scheduler_handle.await??;

    info!("taskgraph serve shut down");
    Ok(())
}
