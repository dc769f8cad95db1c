//! The pool's record of one worker.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use super::status::WorkerSnapshot;
use crate::domain::{TaskId, WorkerId, WorkerStatus};
use crate::worker::WorkerLink;

/// Owned by the driver only.
///
/// `current_task` and `task_deadline` are set together when a task is
/// dispatched and cleared together when it finishes.
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    pub(crate) link: WorkerLink,
    pub(crate) status: WorkerStatus,
    pub(crate) current_task: Option<TaskId>,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) started: Instant,
    pub(crate) last_active: Instant,
    pub(crate) completed_count: u64,
    pub(crate) failed_count: u64,
    pub(crate) boot_deadline: Option<Instant>,
    pub(crate) task_deadline: Option<Instant>,
}

impl WorkerHandle {
    pub(crate) fn new(
        link: WorkerLink,
        started_at: DateTime<Utc>,
        now: Instant,
        boot_deadline: Instant,
    ) -> Self {
        Self {
            link,
            status: WorkerStatus::Starting,
            current_task: None,
            started_at,
            started: now,
            last_active: now,
            completed_count: 0,
            failed_count: 0,
            boot_deadline: Some(boot_deadline),
            task_deadline: None,
        }
    }

    pub(crate) fn id(&self) -> WorkerId {
        self.link.id()
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.status == WorkerStatus::Idle
    }

    pub(crate) fn assign(&mut self, task_id: TaskId, deadline: Instant) {
        self.status = WorkerStatus::Busy;
        self.current_task = Some(task_id);
        self.task_deadline = Some(deadline);
    }

    /// Back to Idle after a task finished. Returns the task it was running.
    pub(crate) fn release(&mut self, now: Instant) -> Option<TaskId> {
        self.status = WorkerStatus::Idle;
        self.task_deadline = None;
        self.last_active = now;
        self.current_task.take()
    }

    /// Earliest armed deadline.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        match (self.boot_deadline, self.task_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub(crate) fn snapshot(&self, now: Instant) -> WorkerSnapshot {
        WorkerSnapshot {
            id: self.id(),
            status: self.status,
            current_task: self.current_task,
            started_at: self.started_at,
            uptime: now.saturating_duration_since(self.started),
            idle_for: self
                .is_idle()
                .then(|| now.saturating_duration_since(self.last_active)),
            completed_count: self.completed_count,
            failed_count: self.failed_count,
        }
    }
}
