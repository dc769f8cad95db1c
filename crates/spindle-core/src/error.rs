use thiserror::Error;

use crate::domain::{TaskId, TaskStatus};

/// Errors returned by `TaskStore` operations.
///
/// These are ordinary values: an unknown id or an illegal transition is
/// something callers are expected to check for, not a crash.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("invalid task spec: {0}")]
    InvalidSpec(String),

    #[error("dependency on unknown task {0}")]
    UnknownDependency(TaskId),

    #[error("task {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("dependency cycle: {0:?}")]
    DependencyCycle(Vec<TaskId>),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Errors surfaced by `WorkerPool` control operations.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid pool config: {0}")]
    InvalidConfig(String),
}

/// Errors from snapshot persistence.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot io: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}
