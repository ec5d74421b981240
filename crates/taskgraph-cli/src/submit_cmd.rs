//! `taskgraph submit`: read a single task spec or a `{tasks: [...]}` batch
//! from a JSON file and submit it directly, without starting the scheduler.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use taskgraph_core::submit::{self, SubmitOutcome};

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Submit the task(s) described by `path`. A file with a top-level `tasks`
/// array is submitted as a batch; anything else is parsed as a single spec.
pub async fn run_submit(pool: &SqlitePool, path: &str, default_max_attempts: i64) -> Result<()> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read task spec file {path}"))?;
    let value: serde_json::Value =
        serde_json::from_str(&contents).with_context(|| format!("invalid JSON in {path}"))?;

    let outcome = submit::submit_json(pool, now_millis(), value, default_max_attempts).await?;

    match outcome {
        SubmitOutcome::Single(task) => {
            println!("Submitted task {} ({})", task.id, task.status);
        }
        SubmitOutcome::Batch(created) => {
            println!("Submitted batch of {} tasks:", created.len());
            for task in &created {
                println!("  {} ({})", task.id, task.status);
            }
        }
    }

    Ok(())
}
