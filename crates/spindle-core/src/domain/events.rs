//! Pool events published to the observability hook.

use serde::{Deserialize, Serialize};

use super::ids::{TaskId, WorkerId};

/// One-way notifications about worker and task lifecycle changes.
///
/// Emission is fire-and-forget: a sink that drops events never affects
/// scheduling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PoolEvent {
    WorkerCreated {
        worker_id: WorkerId,
    },
    WorkerReady {
        worker_id: WorkerId,
    },
    WorkerErrored {
        worker_id: WorkerId,
        error: String,
    },
    WorkerTerminated {
        worker_id: WorkerId,
    },
    TaskAssigned {
        task_id: TaskId,
        worker_id: WorkerId,
    },
    TaskProgress {
        task_id: TaskId,
        worker_id: WorkerId,
        percent: u8,
    },
    TaskCompleted {
        task_id: TaskId,
        worker_id: WorkerId,
    },
    TaskFailed {
        task_id: TaskId,
        worker_id: WorkerId,
        error: String,
    },
    TaskTimedOut {
        task_id: TaskId,
        worker_id: WorkerId,
    },
    TaskCancelled {
        task_id: TaskId,
    },
}

impl PoolEvent {
    /// Short name, handy for log fields and metrics labels.
    pub fn name(&self) -> &'static str {
        match self {
            PoolEvent::WorkerCreated { .. } => "worker_created",
            PoolEvent::WorkerReady { .. } => "worker_ready",
            PoolEvent::WorkerErrored { .. } => "worker_errored",
            PoolEvent::WorkerTerminated { .. } => "worker_terminated",
            PoolEvent::TaskAssigned { .. } => "task_assigned",
            PoolEvent::TaskProgress { .. } => "task_progress",
            PoolEvent::TaskCompleted { .. } => "task_completed",
            PoolEvent::TaskFailed { .. } => "task_failed",
            PoolEvent::TaskTimedOut { .. } => "task_timed_out",
            PoolEvent::TaskCancelled { .. } => "task_cancelled",
        }
    }

    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            PoolEvent::TaskAssigned { task_id, .. }
            | PoolEvent::TaskProgress { task_id, .. }
            | PoolEvent::TaskCompleted { task_id, .. }
            | PoolEvent::TaskFailed { task_id, .. }
            | PoolEvent::TaskTimedOut { task_id, .. }
            | PoolEvent::TaskCancelled { task_id } => Some(*task_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_tag() {
        let worker_id = WorkerId::generate();
        let event = PoolEvent::WorkerCreated { worker_id };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "worker_created");
        assert_eq!(event.name(), "worker_created");
        assert!(event.task_id().is_none());
    }
}
