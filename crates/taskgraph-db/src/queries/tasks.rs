//! Database query functions against the `tasks` and `task_dependencies`
//! tables, including the atomic claim/complete/fail transitions the
//! scheduler and worker pool depend on for correctness.

use std::collections::{HashMap, HashSet, VecDeque};

use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::warn;

use crate::error::TaskRepoError;
use crate::models::{Task, TaskStatus};
use crate::pool::begin_immediate;

type TxResult<T> = Result<T, TaskRepoError>;

// ---------------------------------------------------------------------------
// Plain CRUD
// ---------------------------------------------------------------------------

/// Insert a new task row as part of an in-progress transaction.
///
/// The caller is responsible for having already checked for duplicate and
/// unknown-dependency conditions; this is the raw insert.
pub async fn insert_task(
    tx: &mut Transaction<'_, Sqlite>,
    id: &str,
    task_type: &str,
    duration_ms: i64,
    remaining_deps: i64,
    max_attempts: i64,
    now: i64,
) -> TxResult<Task> {
    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks \
            (id, task_type, duration_ms, status, remaining_deps, attempts, max_attempts, created_at, updated_at) \
         VALUES (?, ?, ?, 'queued', ?, 0, ?, ?, ?) \
         RETURNING *",
    )
    .bind(id)
    .bind(task_type)
    .bind(duration_ms)
    .bind(remaining_deps)
    .bind(max_attempts)
    .bind(now)
    .bind(now)
    .fetch_one(&mut **tx)
    .await?;

    Ok(task)
}

/// Insert a dependency edge: `task_id` depends on `depends_on_id`.
///
/// Idempotent via `ON CONFLICT DO NOTHING` -- a batch submit that names the
/// same edge twice does not error.
pub async fn insert_dependency(
    tx: &mut Transaction<'_, Sqlite>,
    task_id: &str,
    depends_on_id: &str,
) -> TxResult<()> {
    sqlx::query(
        "INSERT INTO task_dependencies (task_id, depends_on_id) VALUES (?, ?) \
         ON CONFLICT DO NOTHING",
    )
    .bind(task_id)
    .bind(depends_on_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Fetch a single task by id.
pub async fn get_task(pool: &SqlitePool, id: &str) -> TxResult<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(task)
}

/// List all tasks, optionally filtered to a single status, ordered by
/// creation time.
pub async fn list_tasks(pool: &SqlitePool, status: Option<TaskStatus>) -> TxResult<Vec<Task>> {
    let tasks = match status {
        Some(status) => {
            sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE status = ? ORDER BY created_at ASC")
                .bind(status)
                .fetch_all(pool)
                .await?
        }
        None => {
            sqlx::query_as::<_, Task>("SELECT * FROM tasks ORDER BY created_at ASC")
                .fetch_all(pool)
                .await?
        }
    };

    Ok(tasks)
}

/// Get the ids of all tasks that `task_id` depends on.
pub async fn get_dependencies(pool: &SqlitePool, task_id: &str) -> TxResult<Vec<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT depends_on_id FROM task_dependencies WHERE task_id = ?")
            .bind(task_id)
            .fetch_all(pool)
            .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Among `ids`, which already exist in the store.
///
/// Used by the submit path to detect `DuplicateId` (an id present in the
/// store) separately from an id merely repeated within the same batch.
pub async fn existing_ids(
    tx: &mut Transaction<'_, Sqlite>,
    ids: &[String],
) -> TxResult<HashSet<String>> {
    if ids.is_empty() {
        return Ok(HashSet::new());
    }

    let placeholders = std::iter::repeat("?").take(ids.len()).collect::<Vec<_>>().join(", ");
    let sql = format!("SELECT id FROM tasks WHERE id IN ({placeholders})");

    let mut query = sqlx::query_as::<_, (String,)>(&sql);
    for id in ids {
        query = query.bind(id);
    }
    let rows = query.fetch_all(&mut **tx).await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Current status of each of `ids` that exists in the store.
///
/// Used by the submit path to decide whether a dependency on an
/// already-stored task contributes to the new task's `remaining_deps`.
pub async fn statuses_for(
    tx: &mut Transaction<'_, Sqlite>,
    ids: &[String],
) -> TxResult<HashMap<String, TaskStatus>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders = std::iter::repeat("?").take(ids.len()).collect::<Vec<_>>().join(", ");
    let sql = format!("SELECT id, status FROM tasks WHERE id IN ({placeholders})");

    let mut query = sqlx::query_as::<_, (String, TaskStatus)>(&sql);
    for id in ids {
        query = query.bind(id);
    }
    let rows = query.fetch_all(&mut **tx).await?;

    Ok(rows.into_iter().collect())
}

/// Number of tasks currently RUNNING with a live lease.
///
/// A row whose lease has already expired does not count toward capacity
/// even if recovery hasn't swept it yet -- this is what lets the scheduler
/// keep making progress in the window between a worker dying and the next
/// recovery sweep reclaiming its slot.
pub async fn count_running(pool: &SqlitePool, now: i64) -> TxResult<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM tasks \
         WHERE status = 'running' AND (lease_expires_at IS NULL OR lease_expires_at >= ?)",
    )
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

// ---------------------------------------------------------------------------
// Atomic claim
// ---------------------------------------------------------------------------

/// Atomically claim up to `limit` runnable tasks, incrementing their attempt
/// counters and setting a fresh lease.
///
/// A single `UPDATE ... RETURNING` statement: SQLite executes one statement
/// under an implicit, fully-serialized write, so this needs no explicit
/// `BEGIN IMMEDIATE` of its own -- there is no window for a second claim to
/// observe the same candidate rows.
pub async fn claim_runnable(
    pool: &SqlitePool,
    now: i64,
    lease_ms: i64,
    limit: i64,
) -> TxResult<Vec<Task>> {
    let claimed = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET status = 'running', \
             attempts = attempts + 1, \
             started_at = ?, \
             lease_expires_at = ?, \
             updated_at = ? \
         WHERE id IN ( \
             SELECT id FROM tasks \
             WHERE status = 'queued' AND remaining_deps = 0 \
             ORDER BY created_at ASC, id ASC \
             LIMIT ? \
         ) \
         RETURNING *",
    )
    .bind(now)
    .bind(now + lease_ms)
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(claimed)
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// Mark a task COMPLETED and decrement `remaining_deps` on every direct
/// dependent, all inside one `BEGIN IMMEDIATE` transaction so a concurrent
/// claim never observes a completed dependency without its effect on
/// dependents.
pub async fn mark_completed(pool: &SqlitePool, id: &str, now: i64) -> TxResult<()> {
    let mut tx = begin_immediate(pool).await.map_err(map_anyhow)?;

    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'completed', finished_at = ?, lease_expires_at = NULL, updated_at = ? \
         WHERE id = ? AND status = 'running'",
    )
    .bind(now)
    .bind(now)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        tx.rollback().await?;
        return Err(TaskRepoError::StateConflict {
            task_id: id.to_owned(),
            expected: "running",
        });
    }

    sqlx::query(
        "UPDATE tasks SET remaining_deps = remaining_deps - 1, updated_at = ? \
         WHERE id IN (SELECT task_id FROM task_dependencies WHERE depends_on_id = ?)",
    )
    .bind(now)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Failure, retry, and BLOCKED propagation
// ---------------------------------------------------------------------------

/// Outcome of applying a failure to a running (or lease-expired) task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Attempts remain; the task was requeued.
    Requeued,
    /// Attempts exhausted; the task FAILED and BLOCKED its dependents.
    Failed,
}

/// Mark a RUNNING task failed, requeuing it if attempts remain or
/// transitioning it to FAILED (and its dependents to BLOCKED) if exhausted.
pub async fn mark_failed_or_retry(
    pool: &SqlitePool,
    id: &str,
    now: i64,
    error: &str,
) -> TxResult<FailureOutcome> {
    let mut tx = begin_immediate(pool).await.map_err(map_anyhow)?;
    let outcome = apply_failure(&mut tx, id, now, error, "running").await?;
    tx.commit().await?;
    Ok(outcome)
}

/// Find every RUNNING task whose lease has expired as of `now` and apply the
/// same failure/retry logic as [`mark_failed_or_retry`] to each, all inside
/// one transaction.
///
/// Returns the ids processed, in the order they were found.
pub async fn sweep_expired_leases(pool: &SqlitePool, now: i64) -> TxResult<Vec<(String, FailureOutcome)>> {
    let mut tx = begin_immediate(pool).await.map_err(map_anyhow)?;

    let expired: Vec<(String,)> = sqlx::query_as(
        "SELECT id FROM tasks WHERE status = 'running' AND lease_expires_at < ?",
    )
    .bind(now)
    .fetch_all(&mut *tx)
    .await?;

    let mut results = Vec::with_capacity(expired.len());
    for (id,) in expired {
        let outcome = apply_failure(&mut tx, &id, now, "lease expired", "running").await?;
        results.push((id, outcome));
    }

    tx.commit().await?;
    Ok(results)
}

/// Core failure transition, reusable by both the direct `mark_failed_or_retry`
/// entry point and the lease-expiry sweep. `expected_status` lets both share
/// the same optimistic-locking guard.
async fn apply_failure(
    tx: &mut Transaction<'_, Sqlite>,
    id: &str,
    now: i64,
    error: &str,
    expected_status: &'static str,
) -> TxResult<FailureOutcome> {
    let row: Option<(i64, i64)> =
        sqlx::query_as("SELECT attempts, max_attempts FROM tasks WHERE id = ? AND status = ?")
            .bind(id)
            .bind(expected_status)
            .fetch_optional(&mut **tx)
            .await?;

    let (attempts, max_attempts) = row.ok_or_else(|| TaskRepoError::StateConflict {
        task_id: id.to_owned(),
        expected: expected_status,
    })?;

    if attempts < max_attempts {
        sqlx::query(
            "UPDATE tasks \
             SET status = 'queued', started_at = NULL, lease_expires_at = NULL, \
                 last_error = ?, updated_at = ? \
             WHERE id = ? AND status = ?",
        )
        .bind(error)
        .bind(now)
        .bind(id)
        .bind(expected_status)
        .execute(&mut **tx)
        .await?;

        Ok(FailureOutcome::Requeued)
    } else {
        sqlx::query(
            "UPDATE tasks \
             SET status = 'failed', finished_at = ?, lease_expires_at = NULL, \
                 last_error = ?, updated_at = ? \
             WHERE id = ? AND status = ?",
        )
        .bind(now)
        .bind(error)
        .bind(now)
        .bind(id)
        .bind(expected_status)
        .execute(&mut **tx)
        .await?;

        propagate_blocked(tx, id, now).await?;
        Ok(FailureOutcome::Failed)
    }
}

/// Breadth-first walk of the dependency graph from `failed_id`, transitioning
/// every reachable QUEUED dependent to BLOCKED.
///
/// Only QUEUED rows are touched, so RUNNING or already-terminal tasks are
/// left alone and the walk cannot re-visit a task it already blocked.
async fn propagate_blocked(
    tx: &mut Transaction<'_, Sqlite>,
    failed_id: &str,
    now: i64,
) -> TxResult<()> {
    let mut queue: VecDeque<String> = VecDeque::from([failed_id.to_owned()]);
    let mut visited: HashSet<String> = HashSet::new();

    while let Some(current) = queue.pop_front() {
        let dependents: Vec<(String,)> = sqlx::query_as(
            "SELECT task_id FROM task_dependencies WHERE depends_on_id = ?",
        )
        .bind(&current)
        .fetch_all(&mut **tx)
        .await?;

        for (dependent_id,) in dependents {
            if !visited.insert(dependent_id.clone()) {
                continue;
            }

            let result = sqlx::query(
                "UPDATE tasks SET status = 'blocked', updated_at = ? WHERE id = ? AND status = 'queued'",
            )
            .bind(now)
            .bind(&dependent_id)
            .execute(&mut **tx)
            .await?;

            if result.rows_affected() > 0 {
                warn!(task_id = %dependent_id, ancestor = %failed_id, "task blocked by failed ancestor");
            }

            queue.push_back(dependent_id);
        }
    }

    Ok(())
}

fn map_anyhow(err: anyhow::Error) -> TaskRepoError {
    TaskRepoError::Store(sqlx::Error::Io(std::io::Error::other(err.to_string())))
}
