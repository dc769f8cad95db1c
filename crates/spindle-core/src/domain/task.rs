//! Task record and submission spec.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{TaskId, WorkerId};
use super::state::TaskStatus;

/// Default retry budget when a spec does not set one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Opaque discriminator used by workers to pick a handler.
/// The scheduler never branches on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskKind(String);

impl TaskKind {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskKind {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Lower value = more urgent.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical = 0,
    High = 1,
    #[default]
    Medium = 2,
    Low = 3,
    Background = 4,
}

impl Priority {
    pub const ALL: [Priority; 5] = [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
        Priority::Background,
    ];
}

/// What a producer hands to `TaskStore::submit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub kind: TaskKind,

    #[serde(default)]
    pub payload: serde_json::Value,

    /// `None` means `Priority::Medium`.
    #[serde(default)]
    pub priority: Option<Priority>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// `None` means `DEFAULT_MAX_ATTEMPTS`.
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Tasks that must complete before this one becomes runnable.
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
}

impl TaskSpec {
    pub fn new(kind: impl Into<TaskKind>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            priority: None,
            tags: Vec::new(),
            max_attempts: None,
            dependencies: Vec::new(),
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn depends_on(mut self, task_id: TaskId) -> Self {
        if !self.dependencies.contains(&task_id) {
            self.dependencies.push(task_id);
        }
        self
    }
}

/// A schedulable unit of work.
///
/// This is the single source of truth for task state; the admission sequence
/// only holds `TaskId`s. State changes go through the methods below, which the
/// store calls after checking `TaskStatus::can_transition_to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub priority: Priority,
    pub status: TaskStatus,
    pub payload: serde_json::Value,

    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Number of execution starts, including the current one while Running.
    pub attempts: u32,
    pub max_attempts: u32,

    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    #[serde(default)]
    pub tags: Vec<String>,

    /// 0..=100, reported by the worker while Running.
    #[serde(default)]
    pub progress: u8,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Set only while Running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_worker: Option<WorkerId>,
}

impl Task {
    pub(crate) fn from_spec(id: TaskId, spec: TaskSpec, now: DateTime<Utc>) -> Self {
        Self {
            id,
            kind: spec.kind,
            priority: spec.priority.unwrap_or_default(),
            status: TaskStatus::Pending,
            payload: spec.payload,
            created_at: now,
            started_at: None,
            completed_at: None,
            attempts: 0,
            max_attempts: spec.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            dependencies: spec.dependencies,
            tags: spec.tags,
            progress: 0,
            result: None,
            error: None,
            assigned_worker: None,
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Retrying -> Pending.
    pub(crate) fn requeue(&mut self) {
        self.status = TaskStatus::Pending;
    }

    /// Pending -> Running (increments attempts).
    pub(crate) fn start_attempt(&mut self, worker: WorkerId, now: DateTime<Utc>) {
        self.status = TaskStatus::Running;
        self.attempts += 1;
        self.started_at = Some(now);
        self.assigned_worker = Some(worker);
        self.progress = 0;
    }

    pub(crate) fn mark_completed(&mut self, result: serde_json::Value, now: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(now);
        self.result = Some(result);
        self.error = None;
        self.progress = 100;
        self.assigned_worker = None;
    }

    pub(crate) fn schedule_retry(&mut self, error: String) {
        self.status = TaskStatus::Retrying;
        self.error = Some(error);
        self.result = None;
        self.assigned_worker = None;
    }

    pub(crate) fn mark_failed(&mut self, error: String, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.completed_at = Some(now);
        self.error = Some(error);
        self.result = None;
        self.assigned_worker = None;
    }

    pub(crate) fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(now);
        self.assigned_worker = None;
    }

    /// Running <=> assigned_worker is set.
    pub fn assignment_is_consistent(&self) -> bool {
        (self.status == TaskStatus::Running) == self.assigned_worker.is_some()
    }
}
