use taskgraph_db::error::TaskRepoError;
use thiserror::Error;

/// Error kinds the kernel produces, at the boundary the HTTP and CLI layers
/// pattern-match on.
///
/// Mirrors [`TaskRepoError`] one-for-one except that `Store` wraps the
/// richer `anyhow::Error` the rest of the kernel uses for context-rich
/// propagation, rather than a bare `sqlx::Error`.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("task id {0:?} already exists")]
    DuplicateId(String),

    #[error("task {0:?} depends on unknown task {1:?}")]
    UnknownDependency(String, String),

    #[error("dependency cycle detected among tasks: {0:?}")]
    CycleInBatch(Vec<String>),

    #[error("task {task_id:?} is not {expected}")]
    StateConflict { task_id: String, expected: &'static str },

    #[error("task {0:?} not found")]
    NotFound(String),

    #[error("invalid task spec: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<TaskRepoError> for KernelError {
    fn from(err: TaskRepoError) -> Self {
        match err {
            TaskRepoError::DuplicateId(id) => Self::DuplicateId(id),
            TaskRepoError::UnknownDependency(task_id, dep_id) => {
                Self::UnknownDependency(task_id, dep_id)
            }
            TaskRepoError::CycleDetected(ids) => Self::CycleInBatch(ids),
            TaskRepoError::StateConflict { task_id, expected } => {
                Self::StateConflict { task_id, expected }
            }
            TaskRepoError::NotFound(id) => Self::NotFound(id),
            TaskRepoError::Store(e) => Self::Store(anyhow::Error::new(e)),
        }
    }
}
