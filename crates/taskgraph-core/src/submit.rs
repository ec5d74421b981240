//! Submission of new tasks into the dependency DAG, singly or in batches.
//!
//! Both paths validate duplicates, unknown dependencies, and (for batches)
//! internal cycles before writing anything -- a rejected submission leaves
//! the store untouched.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Deserialize;
use sqlx::SqlitePool;
use taskgraph_db::models::{Task, TaskStatus};
use taskgraph_db::pool::begin_immediate;
use taskgraph_db::queries::tasks;
use tracing::info;

use crate::error::KernelError;

/// A task to be submitted, before it has an assigned `created_at`.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub id: String,
    pub task_type: String,
    pub duration_ms: i64,
    pub max_attempts: i64,
    pub depends_on: Vec<String>,
}

/// The wire shape of a task spec, shared by the HTTP surface and the
/// `taskgraph submit` CLI command.
///
/// `max_attempts` is optional on the wire; callers resolve it against a
/// process-wide default before building a [`NewTask`].
#[derive(Debug, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub duration_ms: i64,
    pub max_attempts: Option<i64>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl TaskSpec {
    /// Reject specs that could never be accepted regardless of store state.
    pub fn validate(&self) -> Result<(), KernelError> {
        if self.id.trim().is_empty() {
            return Err(KernelError::Validation("id must not be empty".to_owned()));
        }
        if self.duration_ms <= 0 {
            return Err(KernelError::Validation("duration_ms must be positive".to_owned()));
        }
        if let Some(max_attempts) = self.max_attempts {
            if max_attempts <= 0 {
                return Err(KernelError::Validation("max_attempts must be positive".to_owned()));
            }
        }
        Ok(())
    }

    fn into_new_task(self, default_max_attempts: i64) -> NewTask {
        NewTask {
            id: self.id,
            task_type: self.task_type,
            duration_ms: self.duration_ms,
            max_attempts: self.max_attempts.unwrap_or(default_max_attempts),
            depends_on: self.dependencies,
        }
    }
}

/// A batch of specs under the `{"tasks": [...]}` wire shape.
#[derive(Debug, Deserialize)]
pub struct BatchSpec {
    pub tasks: Vec<TaskSpec>,
}

/// The result of submitting an arbitrary JSON payload: either a single task
/// or an inserted batch, mirroring which wire shape was recognized.
#[derive(Debug)]
pub enum SubmitOutcome {
    Single(Box<Task>),
    Batch(Vec<Task>),
}

/// Submit a JSON payload that is either a single [`TaskSpec`] or a
/// [`BatchSpec`] (`{"tasks": [...]}`), the shape the HTTP surface and the
/// `taskgraph submit` CLI command both accept.
pub async fn submit_json(
    pool: &SqlitePool,
    now: i64,
    value: serde_json::Value,
    default_max_attempts: i64,
) -> Result<SubmitOutcome, KernelError> {
    if value.get("tasks").is_some() {
        let batch: BatchSpec = serde_json::from_value(value)
            .map_err(|e| KernelError::Validation(format!("invalid batch spec: {e}")))?;
        for spec in &batch.tasks {
            spec.validate()?;
        }
        let new_tasks: Vec<NewTask> =
            batch.tasks.into_iter().map(|spec| spec.into_new_task(default_max_attempts)).collect();
        let created = submit_batch(pool, now, new_tasks).await?;
        Ok(SubmitOutcome::Batch(created))
    } else {
        let spec: TaskSpec = serde_json::from_value(value)
            .map_err(|e| KernelError::Validation(format!("invalid task spec: {e}")))?;
        spec.validate()?;
        let new_task = spec.into_new_task(default_max_attempts);
        let task = submit_one(pool, now, new_task).await?;
        Ok(SubmitOutcome::Single(Box::new(task)))
    }
}

/// Submit a single task.
///
/// Runs inside a `BEGIN IMMEDIATE` transaction so a concurrent submit of the
/// same id cannot race between the existence check and the insert.
pub async fn submit_one(pool: &SqlitePool, now: i64, new_task: NewTask) -> Result<Task, KernelError> {
    let mut tx = begin_immediate(pool).await?;

    let existing = tasks::existing_ids(&mut tx, std::slice::from_ref(&new_task.id)).await?;
    if existing.contains(&new_task.id) {
        tx.rollback().await.map_err(anyhow::Error::new)?;
        return Err(KernelError::DuplicateId(new_task.id));
    }

    let dep_statuses = tasks::statuses_for(&mut tx, &new_task.depends_on).await?;
    for dep_id in &new_task.depends_on {
        if !dep_statuses.contains_key(dep_id) {
            tx.rollback().await.map_err(anyhow::Error::new)?;
            return Err(KernelError::UnknownDependency(new_task.id, dep_id.clone()));
        }
    }

    let remaining_deps = dep_statuses
        .values()
        .filter(|status| **status != TaskStatus::Completed)
        .count() as i64;

    let task = tasks::insert_task(
        &mut tx,
        &new_task.id,
        &new_task.task_type,
        new_task.duration_ms,
        remaining_deps,
        new_task.max_attempts,
        now,
    )
    .await?;

    for dep_id in &new_task.depends_on {
        tasks::insert_dependency(&mut tx, &new_task.id, dep_id).await?;
    }

    tx.commit().await.map_err(anyhow::Error::new)?;
    info!(task_id = %task.id, remaining_deps = task.remaining_deps, "task submitted");
    Ok(task)
}

/// Submit a batch of tasks atomically: either all are inserted, or (on
/// `DuplicateId`, `UnknownDependency`, or `CycleInBatch`) none are.
pub async fn submit_batch(
    pool: &SqlitePool,
    now: i64,
    new_tasks: Vec<NewTask>,
) -> Result<Vec<Task>, KernelError> {
    let mut tx = begin_immediate(pool).await?;

    let batch_ids: HashSet<String> = new_tasks.iter().map(|t| t.id.clone()).collect();
    if batch_ids.len() != new_tasks.len() {
        let mut seen = HashSet::new();
        let duplicate = new_tasks
            .iter()
            .find(|t| !seen.insert(t.id.clone()))
            .map(|t| t.id.clone())
            .expect("length mismatch implies a repeated id exists");
        tx.rollback().await.map_err(anyhow::Error::new)?;
        return Err(KernelError::DuplicateId(duplicate));
    }

    let ids: Vec<String> = new_tasks.iter().map(|t| t.id.clone()).collect();
    let already_in_store = tasks::existing_ids(&mut tx, &ids).await?;
    if let Some(duplicate) = already_in_store.into_iter().next() {
        tx.rollback().await.map_err(anyhow::Error::new)?;
        return Err(KernelError::DuplicateId(duplicate));
    }

    let external_dep_ids: Vec<String> = new_tasks
        .iter()
        .flat_map(|t| t.depends_on.iter())
        .filter(|dep| !batch_ids.contains(*dep))
        .cloned()
        .collect();
    let external_statuses = tasks::statuses_for(&mut tx, &external_dep_ids).await?;

    for task in &new_tasks {
        for dep_id in &task.depends_on {
            if !batch_ids.contains(dep_id) && !external_statuses.contains_key(dep_id) {
                tx.rollback().await.map_err(anyhow::Error::new)?;
                return Err(KernelError::UnknownDependency(task.id.clone(), dep_id.clone()));
            }
        }
    }

    if let Some(cycle) = find_batch_cycle(&new_tasks) {
        tx.rollback().await.map_err(anyhow::Error::new)?;
        return Err(KernelError::CycleInBatch(cycle));
    }

    let mut inserted = Vec::with_capacity(new_tasks.len());
    for task in &new_tasks {
        let remaining_deps = task
            .depends_on
            .iter()
            .filter(|dep| {
                batch_ids.contains(*dep)
                    || external_statuses.get(*dep).is_some_and(|s| *s != TaskStatus::Completed)
            })
            .count() as i64;

        let row = tasks::insert_task(
            &mut tx,
            &task.id,
            &task.task_type,
            task.duration_ms,
            remaining_deps,
            task.max_attempts,
            now,
        )
        .await?;
        inserted.push(row);
    }

    for task in &new_tasks {
        for dep_id in &task.depends_on {
            tasks::insert_dependency(&mut tx, &task.id, dep_id).await?;
        }
    }

    tx.commit().await.map_err(anyhow::Error::new)?;
    for task in &inserted {
        info!(task_id = %task.id, remaining_deps = task.remaining_deps, "task submitted");
    }
    Ok(inserted)
}

/// Detect a cycle among the batch-internal dependency edges using Kahn's
/// algorithm for topological sort. Edges to ids outside the batch are
/// ignored -- those reference already-settled, acyclic history.
fn find_batch_cycle(new_tasks: &[NewTask]) -> Option<Vec<String>> {
    let index_of: HashMap<&str, usize> =
        new_tasks.iter().enumerate().map(|(i, t)| (t.id.as_str(), i)).collect();

    let n = new_tasks.len();
    let mut in_degree = vec![0usize; n];
    let mut adjacency: Vec<Vec<usize>> = vec![vec![]; n];

    for task in new_tasks {
        let task_idx = index_of[task.id.as_str()];
        for dep_id in &task.depends_on {
            if let Some(&dep_idx) = index_of.get(dep_id.as_str()) {
                adjacency[dep_idx].push(task_idx);
                in_degree[task_idx] += 1;
            }
        }
    }

    let mut queue: VecDeque<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, deg)| **deg == 0)
        .map(|(i, _)| i)
        .collect();

    let mut visited = 0usize;
    while let Some(node) = queue.pop_front() {
        visited += 1;
        for &neighbor in &adjacency[node] {
            in_degree[neighbor] -= 1;
            if in_degree[neighbor] == 0 {
                queue.push_back(neighbor);
            }
        }
    }

    if visited == n {
        return None;
    }

    let cycle_ids = in_degree
        .iter()
        .enumerate()
        .filter(|(_, deg)| **deg > 0)
        .map(|(i, _)| new_tasks[i].id.clone())
        .collect();
    Some(cycle_ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str]) -> NewTask {
        NewTask {
            id: id.to_owned(),
            task_type: "noop".to_owned(),
            duration_ms: 10,
            max_attempts: 1,
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn find_batch_cycle_none_for_linear_chain() {
        let tasks = vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])];
        assert!(find_batch_cycle(&tasks).is_none());
    }

    #[test]
    fn find_batch_cycle_detects_two_node_cycle() {
        let tasks = vec![task("a", &["b"]), task("b", &["a"])];
        let cycle = find_batch_cycle(&tasks).expect("should detect cycle");
        let mut cycle = cycle;
        cycle.sort();
        assert_eq!(cycle, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn find_batch_cycle_ignores_external_deps() {
        let tasks = vec![task("a", &["already-stored"])];
        assert!(find_batch_cycle(&tasks).is_none());
    }
}
