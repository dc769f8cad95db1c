//! WorkerPool: owns the workers, feeds them from the TaskStore, enforces
//! timeouts and keeps the pool sized to the backlog.
//!
//! The pool itself is a thin handle. All worker state lives in a single
//! driver task started by `start`; the handle talks to it over a command
//! channel.

mod builder;
mod config;
mod driver;
mod emitter;
mod handle;
mod status;

pub use builder::{BuildError, PoolBuilder};
pub use config::{PoolConfig, PoolOptions};
pub use status::{PoolStatus, WorkerSnapshot};

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::domain::{PoolEvent, Task, TaskId, TaskStatus};
use crate::error::{PoolError, StoreError};
use crate::ports::EventSink;
use crate::store::TaskStore;
use crate::typed::HandlerRegistry;
use driver::{Command, Driver, PoolShared};

/// Error strings the pool records on tasks it fails itself.
pub mod failure {
    /// The worker was removed while the task was running on it.
    pub const WORKER_TERMINATED: &str = "worker terminated mid-task";
    pub const TIMED_OUT: &str = "timed out";
    /// Running in a restored snapshot, but its worker is gone.
    pub const WORKER_LOST: &str = "worker lost";
    pub const POOL_STOPPED: &str = "pool stopped";
}

const COMMAND_CAPACITY: usize = 64;

struct DriverHandle {
    commands: mpsc::Sender<Command>,
    join: JoinHandle<()>,
}

pub struct WorkerPool {
    shared: PoolShared,
    config: Mutex<PoolConfig>,
    driver: Mutex<Option<DriverHandle>>,
}

impl WorkerPool {
    pub fn builder(store: Arc<TaskStore>) -> PoolBuilder {
        PoolBuilder::new(store)
    }

    pub(crate) fn from_parts(shared: PoolShared, config: PoolConfig) -> Self {
        Self {
            shared,
            config: Mutex::new(config),
            driver: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.shared.store
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.shared.registry
    }

    /// Subscribe to pool events. Receivers that fall behind lose the oldest.
    pub fn events(&self) -> broadcast::Receiver<PoolEvent> {
        self.shared.emitter.subscribe()
    }

    pub async fn config(&self) -> PoolConfig {
        self.config.lock().await.clone()
    }

    /// Start the driver. No-op if already running.
    ///
    /// Tasks left Running by a previous process (restored from a snapshot)
    /// have no worker any more; they are failed as "worker lost" first and
    /// go through their normal retry budget.
    pub async fn start(&self) {
        let mut driver = self.driver.lock().await;
        if driver.as_ref().is_some_and(|d| !d.join.is_finished()) {
            return;
        }

        let released = self
            .shared
            .store
            .release_orphans(&HashSet::new(), failure::WORKER_LOST)
            .await;
        if !released.is_empty() {
            warn!(count = released.len(), "recovered tasks from lost workers");
        }

        let config = self.config.lock().await.clone();
        let (commands, rx) = mpsc::channel(COMMAND_CAPACITY);
        let join = tokio::spawn(Driver::new(self.shared.clone(), config, rx).run());
        *driver = Some(DriverHandle { commands, join });
    }

    /// Stop the driver and every worker, failing in-flight tasks with
    /// "pool stopped". Returns once the driver has exited. No-op if stopped.
    pub async fn stop(&self) {
        let Some(handle) = self.driver.lock().await.take() else {
            return;
        };
        // a closed channel means the driver is already gone
        let _ = handle.commands.send(Command::Stop).await;
        if let Err(e) = handle.join.await {
            error!(error = %e, "pool driver ended abnormally");
        }
        info!("worker pool shut down");
    }

    pub async fn is_running(&self) -> bool {
        self.driver
            .lock()
            .await
            .as_ref()
            .is_some_and(|d| !d.join.is_finished())
    }

    /// Apply a partial config update. While running this reconciles the pool
    /// immediately and restarts the poll timer if the interval changed.
    pub async fn configure(&self, options: PoolOptions) -> Result<PoolConfig, PoolError> {
        let merged = {
            let mut config = self.config.lock().await;
            let merged = config.merged(&options);
            merged.validate()?;
            *config = merged.clone();
            merged
        };
        let config = merged.clone();
        self.request(|ack| Command::Configure { config, ack }).await;
        Ok(merged)
    }

    /// Per-worker view. Empty when stopped.
    pub async fn workers(&self) -> Vec<WorkerSnapshot> {
        self.request(Command::Workers).await.unwrap_or_default()
    }

    pub async fn status(&self) -> PoolStatus {
        let workers = self.workers().await;
        let running = self.is_running().await;
        let config = self.config().await;
        PoolStatus::from_workers(running, &workers, &self.shared.counters, config)
    }

    /// Cancel a task and, if a worker is executing it, tear that worker down
    /// and replace it.
    pub async fn cancel_task(&self, id: TaskId) -> Result<Task, PoolError> {
        let before = self
            .shared
            .store
            .get(id)
            .await
            .ok_or(StoreError::NotFound(id))?;
        let task = self.shared.store.cancel(id).await?;
        self.shared.emitter.emit(PoolEvent::TaskCancelled { task_id: id });

        if before.status == TaskStatus::Running
            && let Some(worker_id) = before.assigned_worker
        {
            self.request(|ack| Command::Abort {
                task_id: id,
                worker_id,
                ack,
            })
            .await;
        }
        Ok(task)
    }

    /// Send a command and wait for its reply. `None` if not running.
    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let commands = self
            .driver
            .lock()
            .await
            .as_ref()
            .map(|d| d.commands.clone())?;
        let (tx, rx) = oneshot::channel();
        commands.send(command(tx)).await.ok()?;
        rx.await.ok()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("registry", &self.shared.registry)
            .finish_non_exhaustive()
    }
}
