//! TaskStore: the authoritative task set and its admission sequence.
//!
//! The store knows nothing about execution. The pool asks it for the next
//! runnable task and reports lifecycle changes back; producers submit into it
//! from any task. All state sits behind one async mutex and no lock is held
//! across an await.

mod admission;
mod autosave;
mod dependency;
mod stats;

pub use admission::AdmissionQueue;
pub use autosave::spawn_autosave;
pub use dependency::DependencyGraph;
pub use stats::TaskStats;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::domain::{
    Task, TaskId, TaskKind, TaskSpec, TaskStatus, WaitingReason, WorkerId,
};
use crate::error::{SnapshotError, StoreError};
use crate::ports::{Clock, IdGenerator, SnapshotStore, SystemClock, UlidGenerator};

/// Everything guarded by the store mutex.
#[derive(Debug, Default)]
struct TaskStoreState {
    /// All task records (single source of truth).
    tasks: HashMap<TaskId, Task>,

    /// Priority-ordered TaskIds eligible for dispatch.
    admission: AdmissionQueue,

    /// Forward/reverse dependency edges.
    graph: DependencyGraph,
}

impl TaskStoreState {
    fn insert(&mut self, task: Task) {
        for &dep in &task.dependencies {
            self.graph.add_dependency(task.id, dep);
        }
        if task.status.is_runnable() {
            self.admission.admit(task.id, task.priority);
        }
        self.tasks.insert(task.id, task);
    }

    /// Ok(()) when every dependency is Completed.
    fn readiness(&self, task: &Task) -> Result<(), WaitingReason> {
        let mut pending = Vec::new();
        for dep in &task.dependencies {
            match self.tasks.get(dep).map(|t| t.status) {
                Some(TaskStatus::Completed) => {}
                Some(TaskStatus::Failed | TaskStatus::Cancelled) | None => {
                    return Err(WaitingReason::DependencyFailed(*dep));
                }
                Some(_) => pending.push(*dep),
            }
        }
        if pending.is_empty() {
            Ok(())
        } else {
            Err(WaitingReason::DependenciesPending(pending))
        }
    }

    fn runnable_ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.admission.iter().filter(|id| {
            self.tasks
                .get(id)
                .is_some_and(|t| t.status.is_runnable() && self.readiness(t).is_ok())
        })
    }

    /// Look up a task and check that `to` is reachable from its status.
    fn transition(&mut self, id: TaskId, to: TaskStatus) -> Result<&mut Task, StoreError> {
        let task = self.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if !task.status.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                id,
                from: task.status,
                to,
            });
        }
        Ok(task)
    }

    fn sorted_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tasks
    }
}

/// Owns every Task record and the priority-ordered admission sequence.
///
/// Constructed explicitly and shared as `Arc<TaskStore>`; there is no global
/// instance.
pub struct TaskStore {
    state: Mutex<TaskStoreState>,
    submitted: Notify,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStore {
    pub fn new() -> Self {
        Self::with_ports(
            Arc::new(SystemClock),
            Arc::new(UlidGenerator::new(SystemClock)),
        )
    }

    /// Store whose timestamps and ids both come from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Self::with_ports(clock, ids)
    }

    pub fn with_ports(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            state: Mutex::new(TaskStoreState::default()),
            submitted: Notify::new(),
            clock,
            ids,
        }
    }

    /// Create a Pending task and admit it.
    ///
    /// Rejects `max_attempts == 0`, an empty kind, and dependencies on tasks
    /// the store has never seen. The last rule keeps the dependency graph
    /// acyclic: a new task can only point at tasks that already exist.
    pub async fn submit(&self, spec: TaskSpec) -> Result<Task, StoreError> {
        if spec.max_attempts == Some(0) {
            return Err(StoreError::InvalidSpec("max_attempts must be at least 1".into()));
        }
        if spec.kind.as_str().is_empty() {
            return Err(StoreError::InvalidSpec("kind must not be empty".into()));
        }

        let task = {
            let mut state = self.state.lock().await;
            if let Some(&missing) = spec
                .dependencies
                .iter()
                .find(|dep| !state.tasks.contains_key(dep))
            {
                return Err(StoreError::UnknownDependency(missing));
            }

            let task = Task::from_spec(self.ids.generate_task_id(), spec, self.clock.now());
            state.insert(task.clone());
            task
        };

        debug!(task_id = %task.id, kind = %task.kind, priority = ?task.priority, "task submitted");
        self.submitted.notify_one();
        Ok(task)
    }

    pub async fn get(&self, id: TaskId) -> Option<Task> {
        self.state.lock().await.tasks.get(&id).cloned()
    }

    /// Every task, oldest first.
    pub async fn all(&self) -> Vec<Task> {
        self.state.lock().await.sorted_tasks()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.tasks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// First task in admission order that is Pending/Retrying with every
    /// dependency Completed. Tasks with unmet or failed dependencies are
    /// skipped and stay queued.
    pub async fn next_runnable(&self) -> Option<Task> {
        let state = self.state.lock().await;
        let id = state.runnable_ids().next()?;
        state.tasks.get(&id).cloned()
    }

    pub async fn runnable_count(&self) -> usize {
        self.state.lock().await.runnable_ids().count()
    }

    /// Length of the admission sequence, runnable or not.
    pub async fn backlog_len(&self) -> usize {
        self.state.lock().await.admission.len()
    }

    /// Pending/Retrying -> Running. A Retrying task passes through Pending.
    pub async fn mark_running(&self, id: TaskId, worker: WorkerId) -> Result<Task, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        {
            let task = state.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            if task.status == TaskStatus::Retrying {
                task.requeue();
            }
        }
        let task = state.transition(id, TaskStatus::Running)?;
        task.start_attempt(worker, now);
        let task = task.clone();
        state.admission.remove(id);

        debug!(task_id = %id, worker_id = %worker, attempt = task.attempts, "task running");
        Ok(task)
    }

    /// Running -> Completed.
    pub async fn mark_completed(
        &self,
        id: TaskId,
        result: serde_json::Value,
    ) -> Result<Task, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let task = state.transition(id, TaskStatus::Completed)?;
        task.mark_completed(result, now);
        let task = task.clone();
        state.admission.remove(id);
        let unblocked = !state.graph.dependents_of(id).is_empty();
        drop(state);

        debug!(task_id = %id, "task completed");
        if unblocked {
            self.submitted.notify_one();
        }
        Ok(task)
    }

    /// Running -> Retrying (attempts left, re-admitted at its priority) or
    /// Running -> Failed (attempts exhausted).
    pub async fn mark_failed(
        &self,
        id: TaskId,
        error: impl Into<String>,
    ) -> Result<Task, StoreError> {
        let error = error.into();
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let attempts_left = state
            .tasks
            .get(&id)
            .ok_or(StoreError::NotFound(id))?
            .attempts_left();
        let to = if attempts_left {
            TaskStatus::Retrying
        } else {
            TaskStatus::Failed
        };

        let task = state.transition(id, to)?;
        if attempts_left {
            task.schedule_retry(error);
        } else {
            task.mark_failed(error, now);
        }
        let task = task.clone();

        if attempts_left {
            state.admission.admit(id, task.priority);
        } else {
            state.admission.remove(id);
        }
        drop(state);

        if attempts_left {
            debug!(task_id = %id, attempts = task.attempts, max_attempts = task.max_attempts, "task will retry");
            self.submitted.notify_one();
        } else {
            info!(task_id = %id, attempts = task.attempts, error = ?task.error, "task failed");
        }
        Ok(task)
    }

    /// Any non-terminal -> Cancelled.
    ///
    /// Only bookkeeping: a worker already executing the task is not
    /// interrupted. `WorkerPool::cancel_task` does that.
    pub async fn cancel(&self, id: TaskId) -> Result<Task, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let task = state.transition(id, TaskStatus::Cancelled)?;
        task.mark_cancelled(now);
        let task = task.clone();
        state.admission.remove(id);

        debug!(task_id = %id, "task cancelled");
        Ok(task)
    }

    /// Clamped to 0..=100. Ignored unless the task is Running; returns
    /// whether the value was recorded.
    pub async fn update_progress(&self, id: TaskId, percent: i32) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let task = state.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if task.status != TaskStatus::Running {
            debug!(task_id = %id, status = %task.status, "progress for non-running task ignored");
            return Ok(false);
        }
        task.progress = percent.clamp(0, 100) as u8;
        Ok(true)
    }

    pub async fn by_status(&self, status: TaskStatus) -> Vec<Task> {
        self.filter(|t| t.status == status).await
    }

    pub async fn by_kind(&self, kind: &TaskKind) -> Vec<Task> {
        self.filter(|t| &t.kind == kind).await
    }

    pub async fn by_tag(&self, tag: &str) -> Vec<Task> {
        self.filter(|t| t.has_tag(tag)).await
    }

    async fn filter(&self, pred: impl Fn(&Task) -> bool) -> Vec<Task> {
        let state = self.state.lock().await;
        let mut tasks: Vec<Task> = state.tasks.values().filter(|t| pred(t)).cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tasks
    }

    /// Why a queued task is not runnable, or `None` if it is runnable, not
    /// queued, or unknown.
    pub async fn waiting_reason(&self, id: TaskId) -> Option<WaitingReason> {
        let state = self.state.lock().await;
        let task = state.tasks.get(&id)?;
        if !task.status.is_runnable() {
            return None;
        }
        state.readiness(task).err()
    }

    /// Tasks that declared `id` as a dependency.
    pub async fn dependents(&self, id: TaskId) -> Vec<TaskId> {
        let mut ids = self.state.lock().await.graph.dependents_of(id);
        ids.sort();
        ids
    }

    /// Remove terminal tasks whose `completed_at` is older than `max_age`.
    ///
    /// Dependents of a purged task are not touched; they see the missing
    /// dependency as `WaitingReason::DependencyFailed`.
    pub async fn purge_older_than(&self, max_age: Duration) -> usize {
        let Ok(age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        let Some(cutoff) = self.clock.now().checked_sub_signed(age) else {
            return 0;
        };

        let mut state = self.state.lock().await;
        let expired: Vec<TaskId> = state
            .tasks
            .values()
            .filter(|t| t.status.is_terminal())
            .filter(|t| t.completed_at.is_some_and(|at| at < cutoff))
            .map(|t| t.id)
            .collect();

        let removed = expired.len();
        for id in expired {
            state.tasks.remove(&id);
            state.admission.remove(id);
            state.graph.remove_task(id);
        }

        if removed > 0 {
            info!(removed, "purged old tasks");
        }
        removed
    }

    pub async fn stats(&self) -> TaskStats {
        TaskStats::collect(self.state.lock().await.tasks.values())
    }

    /// Drop every task.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.tasks.clear();
        state.admission.clear();
        state.graph.clear();
    }

    /// Every task, oldest first, for persistence.
    pub async fn snapshot(&self) -> Vec<Task> {
        self.all().await
    }

    /// Replace the store contents with `tasks`.
    ///
    /// The admission sequence is rebuilt from Pending/Retrying tasks ordered by
    /// priority, then creation time. A snapshot whose dependencies form a
    /// cycle is rejected and the current contents are left untouched.
    pub async fn restore(&self, tasks: Vec<Task>) -> Result<usize, StoreError> {
        let mut fresh = TaskStoreState::default();
        let mut ordered = tasks;
        ordered.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        for task in ordered {
            if !task.assignment_is_consistent() {
                warn!(task_id = %task.id, status = %task.status, "restored task has inconsistent worker assignment");
            }
            fresh.insert(task);
        }
        if let Some(cycle) = fresh.graph.detect_cycle() {
            return Err(StoreError::DependencyCycle(cycle));
        }

        let count = fresh.tasks.len();
        *self.state.lock().await = fresh;
        info!(count, "task store restored");
        self.submitted.notify_one();
        Ok(count)
    }

    pub async fn save_to(&self, snapshots: &dyn SnapshotStore) -> Result<usize, SnapshotError> {
        let tasks = self.snapshot().await;
        snapshots.save_snapshot(&tasks).await?;
        Ok(tasks.len())
    }

    pub async fn load_from(&self, snapshots: &dyn SnapshotStore) -> Result<usize, SnapshotError> {
        let tasks = snapshots.load_snapshot().await?;
        Ok(self.restore(tasks).await?)
    }

    /// Fail every Running task whose worker is not in `live`.
    ///
    /// After a restart the workers named in a snapshot no longer exist; their
    /// tasks go through the normal retry budget.
    pub async fn release_orphans(&self, live: &HashSet<WorkerId>, reason: &str) -> Vec<Task> {
        let orphans: Vec<TaskId> = {
            let state = self.state.lock().await;
            state
                .tasks
                .values()
                .filter(|t| t.status == TaskStatus::Running)
                .filter(|t| t.assigned_worker.is_none_or(|w| !live.contains(&w)))
                .map(|t| t.id)
                .collect()
        };

        let mut released = Vec::with_capacity(orphans.len());
        for id in orphans {
            match self.mark_failed(id, reason).await {
                Ok(task) => released.push(task),
                Err(e) => warn!(task_id = %id, error = %e, "could not release orphaned task"),
            }
        }
        released
    }

    /// Resolves after a submit, a retry re-admission, a completion with
    /// dependents, or a restore. Used by the pool driver to dispatch early.
    pub(crate) async fn submitted(&self) {
        self.submitted.notified().await;
    }
}
