//! `taskgraph show <id>`: print one task's full row plus its dependency
//! ids.

use anyhow::{bail, Result};
use sqlx::SqlitePool;

use taskgraph_db::queries::tasks;

pub async fn run_show(pool: &SqlitePool, id: &str) -> Result<()> {
    let Some(task) = tasks::get_task(pool, id).await? else {
        bail!("task {id:?} not found");
    };
    let deps = tasks::get_dependencies(pool, id).await?;

    println!("id:               {}", task.id);
    println!("type:             {}", task.r#type);
    println!("status:           {}", task.status);
    println!("duration_ms:      {}", task.duration_ms);
    println!("remaining_deps:   {}", task.remaining_deps);
    println!("attempts:         {}/{}", task.attempts, task.max_attempts);
    println!("created_at:       {}", task.created_at);
    println!("updated_at:       {}", task.updated_at);
    println!("started_at:       {}", task.started_at.map(|v| v.to_string()).unwrap_or_else(|| "-".to_owned()));
    println!("finished_at:      {}", task.finished_at.map(|v| v.to_string()).unwrap_or_else(|| "-".to_owned()));
    println!("lease_expires_at: {}", task.lease_expires_at.map(|v| v.to_string()).unwrap_or_else(|| "-".to_owned()));
    println!("last_error:       {}", task.last_error.as_deref().unwrap_or("-"));
    println!(
        "dependencies:     {}",
        if deps.is_empty() { "-".to_owned() } else { deps.join(", ") }
    );

    Ok(())
}
