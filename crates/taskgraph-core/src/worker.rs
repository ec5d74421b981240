//! Worker: runs one claimed task to completion and reports the store
//! transition that resulted.
//!
//! A worker never touches `remaining_deps` directly -- only the store, via
//! [`tasks::mark_completed`] and [`tasks::mark_failed_or_retry`], does that.

use std::time::Duration;

use sqlx::SqlitePool;
use taskgraph_db::error::TaskRepoError;
use taskgraph_db::models::Task;
use taskgraph_db::queries::tasks;
use tracing::{debug, error, info};

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Run `task` to completion: sleep for its `duration_ms`, then mark it
/// completed. A `StateConflict` from the completion call means recovery has
/// already acted on this task (most likely the lease expired); the worker
/// drops the result silently since the store is authoritative.
pub async fn run_task(pool: SqlitePool, task: Task) {
    debug!(task_id = %task.id, duration_ms = task.duration_ms, "worker dispatched");

    tokio::time::sleep(Duration::from_millis(task.duration_ms as u64)).await;

    let now = now_millis();
    match tasks::mark_completed(&pool, &task.id, now).await {
        Ok(()) => {
            info!(task_id = %task.id, duration_ms = task.duration_ms, "task completed");
        }
        Err(TaskRepoError::StateConflict { .. }) => {
            debug!(task_id = %task.id, "completion conflicted, task already reclaimed by recovery");
        }
        Err(err) => {
            error!(task_id = %task.id, error = %err, "completion failed unexpectedly, routing to failure path");
            let now = now_millis();
            if let Err(retry_err) = tasks::mark_failed_or_retry(&pool, &task.id, now, &err.to_string()).await {
                error!(task_id = %task.id, error = %retry_err, "failed to record completion failure");
            }
        }
    }
}
