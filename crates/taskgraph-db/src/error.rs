use thiserror::Error;

/// Errors raised by the store layer.
///
/// These are the conditions a caller (the submit service, the scheduler)
/// needs to branch on; anything else surfaces as [`TaskRepoError::Store`].
#[derive(Debug, Error)]
pub enum TaskRepoError {
    #[error("task id {0:?} already exists")]
    DuplicateId(String),

    #[error("task {0:?} depends on unknown task {1:?}")]
    UnknownDependency(String, String),

    #[error("dependency cycle detected among tasks: {0:?}")]
    CycleDetected(Vec<String>),

    #[error("task {0:?} not found")]
    NotFound(String),

    #[error("task {task_id:?} is not {expected}")]
    StateConflict { task_id: String, expected: &'static str },

    #[error(transparent)]
    Store(#[from] sqlx::Error),
}
