//! State machines for tasks and workers.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::TaskId;

/// Task status.
///
/// State transitions:
/// - Pending -> Running -> Completed
/// - Pending -> Running -> Retrying -> Pending (loop until max_attempts)
/// - Pending -> Running -> Failed (when max_attempts is exhausted)
/// - any non-terminal -> Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the admission sequence.
    Pending,

    /// Assigned to a worker.
    Running,

    /// Finished successfully.
    Completed,

    /// Attempts exhausted.
    Failed,

    /// Cancelled before completion.
    Cancelled,

    /// Failed with attempts left; back in the admission sequence.
    Retrying,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
        TaskStatus::Retrying,
    ];

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Is this task eligible for dispatch (dependencies aside)?
    pub fn is_runnable(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Retrying)
    }

    /// The complete transition table. Everything not listed here is rejected
    /// by the store.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, Running) => true,
            (Running, Completed | Retrying | Failed) => true,
            (Retrying, Pending) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Retrying => "retrying",
        };
        f.write_str(s)
    }
}

/// Worker status, as tracked by the pool.
///
/// Starting -> Idle on `Ready`, then Idle <-> Busy while healthy. Stopping and
/// Errored are transient: the handle is removed right after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Starting,
    Idle,
    Busy,
    Stopping,
    Errored,
}

impl WorkerStatus {
    /// Counts toward the pool size during reconciliation.
    pub fn is_active(self) -> bool {
        !matches!(self, WorkerStatus::Stopping | WorkerStatus::Errored)
    }
}

/// Why a queued task is not runnable yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitingReason {
    /// These dependencies have not completed yet.
    DependenciesPending(Vec<TaskId>),

    /// A dependency reached Failed or Cancelled; this task will not run unless
    /// it is cancelled and resubmitted.
    DependencyFailed(TaskId),
}
