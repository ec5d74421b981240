//! `taskgraph status`: list tasks, optionally filtered by status, as a
//! table.

use std::str::FromStr;

use anyhow::{bail, Result};
use sqlx::SqlitePool;

use taskgraph_db::models::TaskStatus;
use taskgraph_db::queries::tasks;

/// List tasks, optionally restricted to `status_filter`.
pub async fn run_status(pool: &SqlitePool, status_filter: Option<&str>) -> Result<()> {
    let status = match status_filter {
        Some(raw) => match TaskStatus::from_str(raw) {
            Ok(s) => Some(s),
            Err(_) => bail!("invalid status filter: {raw:?}"),
        },
        None => None,
    };

    let rows = tasks::list_tasks(pool, status).await?;

    if rows.is_empty() {
        println!("No tasks.");
        return Ok(());
    }

    println!(
        "{:<20} {:<10} {:<10} {:>6} {:>6} {:>6}",
        "ID", "STATUS", "TYPE", "DEPS", "ATTEMPT", "MAX"
    );
    for task in &rows {
        println!(
            "{:<20} {:<10} {:<10} {:>6} {:>6} {:>6}",
            task.id, task.status, task.r#type, task.remaining_deps, task.attempts, task.max_attempts
        );
    }

    Ok(())
}
