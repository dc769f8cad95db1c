use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{Priority, Task, TaskKind, TaskStatus};

/// Task counts for dashboards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub retrying: usize,
    pub by_priority: BTreeMap<Priority, usize>,
    pub by_kind: BTreeMap<TaskKind, usize>,
}

impl TaskStats {
    pub(crate) fn collect<'a>(tasks: impl Iterator<Item = &'a Task>) -> Self {
        let mut stats = TaskStats::default();
        for task in tasks {
            stats.total += 1;
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
                TaskStatus::Retrying => stats.retrying += 1,
            }
            *stats.by_priority.entry(task.priority).or_default() += 1;
            *stats.by_kind.entry(task.kind.clone()).or_default() += 1;
        }
        stats
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        match status {
            TaskStatus::Pending => self.pending,
            TaskStatus::Running => self.running,
            TaskStatus::Completed => self.completed,
            TaskStatus::Failed => self.failed,
            TaskStatus::Cancelled => self.cancelled,
            TaskStatus::Retrying => self.retrying,
        }
    }
}
