//! Per-execution context handed to handlers.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::domain::{Envelope, TaskId, TaskKind, WorkerId, WorkerMessage};

/// What a handler knows about the execution it is part of.
///
/// Cheap to clone. Progress reports travel to the pool as
/// `WorkerMessage::Progress`; a context built with `detached` drops them.
#[derive(Debug, Clone)]
pub struct TaskContext {
    task_id: TaskId,
    kind: TaskKind,
    attempt: u32,
    task_timeout: Option<Duration>,
    link: Option<(WorkerId, mpsc::UnboundedSender<Envelope>)>,
}

impl TaskContext {
    pub(crate) fn new(
        task_id: TaskId,
        kind: TaskKind,
        attempt: u32,
        task_timeout: Duration,
        worker_id: WorkerId,
        outbox: mpsc::UnboundedSender<Envelope>,
    ) -> Self {
        Self {
            task_id,
            kind,
            attempt,
            task_timeout: Some(task_timeout),
            link: Some((worker_id, outbox)),
        }
    }

    /// Context outside any pool, for calling handlers directly in tests.
    pub fn detached(task_id: TaskId, kind: impl Into<TaskKind>) -> Self {
        Self {
            task_id,
            kind: kind.into(),
            attempt: 1,
            task_timeout: None,
            link: None,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    /// 1 on the first execution, 2 on the first retry, and so on.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn worker_id(&self) -> Option<WorkerId> {
        self.link.as_ref().map(|(id, _)| *id)
    }

    /// How long the pool waits before timing this execution out.
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout
    }

    /// Report progress (clamped to 100). Returns `false` if nobody is
    /// listening any more.
    pub fn report_progress(&self, percent: u8) -> bool {
        let Some((worker_id, outbox)) = &self.link else {
            return false;
        };
        outbox
            .send(Envelope {
                from: *worker_id,
                message: WorkerMessage::Progress {
                    task_id: self.task_id,
                    percent: percent.min(100),
                },
            })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_context_swallows_progress() {
        let ctx = TaskContext::detached(TaskId::generate(), "echo");
        assert!(!ctx.report_progress(50));
        assert_eq!(ctx.attempt(), 1);
        assert!(ctx.worker_id().is_none());
    }

    #[test]
    fn progress_is_sent_as_worker_message() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task_id = TaskId::generate();
        let worker_id = WorkerId::generate();
        let ctx = TaskContext::new(
            task_id,
            TaskKind::new("echo"),
            2,
            Duration::from_secs(1),
            worker_id,
            tx,
        );

        assert!(ctx.report_progress(250));
        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.from, worker_id);
        assert_eq!(
            envelope.message,
            WorkerMessage::Progress {
                task_id,
                percent: 100
            }
        );
    }
}
