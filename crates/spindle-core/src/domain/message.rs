//! Messages exchanged between the pool driver and its workers.
//!
//! Workers share no memory with the pool; everything they learn or report
//! travels through these two enums. Both are serde-serializable so the same
//! protocol can be carried over a process boundary.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::ids::{TaskId, WorkerId};
use super::task::TaskKind;

/// Settings a worker receives with `Initialize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInit {
    /// The pool-side deadline for a single task. Handlers may use it to bound
    /// their own I/O.
    #[serde(with = "crate::serde_millis")]
    pub task_timeout: Duration,
}

/// pool -> worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PoolMessage {
    Initialize {
        worker_id: WorkerId,
        config: WorkerInit,
    },
    Execute {
        task_id: TaskId,
        kind: TaskKind,
        payload: serde_json::Value,
        attempt: u32,
    },
}

/// worker -> pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    Ready,
    Progress {
        task_id: TaskId,
        percent: u8,
    },
    Completed {
        task_id: TaskId,
        result: serde_json::Value,
    },
    Failed {
        task_id: TaskId,
        error: String,
    },
    WorkerError {
        error: String,
    },
}

impl WorkerMessage {
    /// The task this message reports on, if any.
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            WorkerMessage::Progress { task_id, .. }
            | WorkerMessage::Completed { task_id, .. }
            | WorkerMessage::Failed { task_id, .. } => Some(*task_id),
            WorkerMessage::Ready | WorkerMessage::WorkerError { .. } => None,
        }
    }
}

/// A worker message stamped with its sender. All workers share one outbound
/// channel to the driver.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub from: WorkerId,
    pub message: WorkerMessage,
}
