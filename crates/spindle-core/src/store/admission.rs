//! Priority-ordered admission sequence.

use std::collections::{BTreeSet, HashMap};

use crate::domain::{Priority, TaskId};

/// Ordering key for the admission sequence.
///
/// Ordered by priority first, then by admission counter, so among equal
/// priorities the task admitted earlier comes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AdmissionKey {
    priority: Priority,
    seq: u64,
    task_id: TaskId,
}

impl PartialOrd for AdmissionKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AdmissionKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then(self.seq.cmp(&other.seq))
            .then(self.task_id.cmp(&other.task_id))
    }
}

/// The ordered list of tasks eligible for future dispatch. Holds TaskIds only.
///
/// Re-admitting a task (retry) places it at the end of its priority band.
#[derive(Debug, Default)]
pub struct AdmissionQueue {
    ordered: BTreeSet<AdmissionKey>,
    index: HashMap<TaskId, AdmissionKey>,
    next_seq: u64,
}

impl AdmissionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or move) a task to the back of its priority band.
    pub fn admit(&mut self, task_id: TaskId, priority: Priority) {
        self.remove(task_id);
        let key = AdmissionKey {
            priority,
            seq: self.next_seq,
            task_id,
        };
        self.next_seq += 1;
        self.ordered.insert(key);
        self.index.insert(task_id, key);
    }

    /// Returns whether the task was present.
    pub fn remove(&mut self, task_id: TaskId) -> bool {
        match self.index.remove(&task_id) {
            Some(key) => {
                self.ordered.remove(&key);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.index.contains_key(&task_id)
    }

    /// Task ids in dispatch order.
    pub fn iter(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.ordered.iter().map(|key| key.task_id)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn clear(&mut self) {
        self.ordered.clear();
        self.index.clear();
    }
}
