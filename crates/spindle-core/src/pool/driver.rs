//! The pool's single control loop.
//!
//! One tokio task owns every `WorkerHandle`. It wakes on the poll ticker, on
//! worker messages, on control commands, on store submissions and on the
//! nearest boot/task deadline. Nothing in here blocks; store calls are short
//! critical sections.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::config::PoolConfig;
use super::emitter::Emitter;
use super::failure;
use super::handle::WorkerHandle;
use super::status::{PoolCounters, WorkerSnapshot};
use crate::domain::{
    Envelope, PoolEvent, PoolMessage, TaskId, WorkerId, WorkerInit, WorkerMessage, WorkerStatus,
};
use crate::ports::{Clock, EventSink, IdGenerator};
use crate::store::TaskStore;
use crate::typed::HandlerRegistry;
use crate::worker::{self, WorkerLink};

/// Upper bound on the pause between spawns after boot failures.
const MAX_SPAWN_BACKOFF: Duration = Duration::from_secs(30);

/// Requests from `WorkerPool` to its driver.
pub(crate) enum Command {
    Configure {
        config: PoolConfig,
        ack: oneshot::Sender<()>,
    },
    Workers(oneshot::Sender<Vec<WorkerSnapshot>>),
    /// Tear down the worker running `task_id`, if it still is.
    Abort {
        task_id: TaskId,
        worker_id: WorkerId,
        ack: oneshot::Sender<()>,
    },
    Stop,
}

/// Everything the driver borrows from the pool.
#[derive(Clone)]
pub(crate) struct PoolShared {
    pub(crate) store: Arc<TaskStore>,
    pub(crate) registry: Arc<HandlerRegistry>,
    pub(crate) emitter: Arc<Emitter>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) counters: Arc<PoolCounters>,
}

pub(crate) struct Driver {
    shared: PoolShared,
    config: PoolConfig,
    workers: BTreeMap<WorkerId, WorkerHandle>,
    outbox: mpsc::UnboundedSender<Envelope>,
    inbox: mpsc::UnboundedReceiver<Envelope>,
    commands: mpsc::Receiver<Command>,
    backoff: SpawnBackoff,
}

/// Holds off spawning after workers die before reporting Ready, doubling
/// from the poll interval each time. Reset by the next Ready.
#[derive(Debug, Default)]
struct SpawnBackoff {
    failures: u32,
    not_before: Option<Instant>,
}

impl SpawnBackoff {
    fn blocks(&self, now: Instant) -> bool {
        self.not_before.is_some_and(|t| now < t)
    }

    fn record_failure(&mut self, base: Duration, now: Instant) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let factor = 1u32 << self.failures.saturating_sub(1).min(10);
        let delay = base.saturating_mul(factor).min(MAX_SPAWN_BACKOFF);
        self.not_before = Some(now + delay);
        delay
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

fn poll_timer(period: std::time::Duration) -> Interval {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

impl Driver {
    pub(crate) fn new(
        shared: PoolShared,
        config: PoolConfig,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        let (outbox, inbox) = mpsc::unbounded_channel();
        Self {
            shared,
            config,
            workers: BTreeMap::new(),
            outbox,
            inbox,
            commands,
            backoff: SpawnBackoff::default(),
        }
    }

    pub(crate) async fn run(mut self) {
        info!(max_workers = self.config.max_workers, "worker pool started");
        let mut ticker = poll_timer(self.config.poll_interval);
        self.tick().await;

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Configure { config, ack }) => {
                        if config.poll_interval != self.config.poll_interval {
                            ticker = poll_timer(config.poll_interval);
                        }
                        info!(?config, "pool reconfigured");
                        self.config = config;
                        self.tick().await;
                        let _ = ack.send(());
                    }
                    Some(Command::Workers(reply)) => {
                        let _ = reply.send(self.snapshots());
                    }
                    Some(Command::Abort { task_id, worker_id, ack }) => {
                        self.abort(task_id, worker_id).await;
                        let _ = ack.send(());
                    }
                    // the pool handle was dropped
                    Some(Command::Stop) | None => break,
                },
                Some(envelope) = self.inbox.recv() => {
                    self.on_message(envelope).await;
                    self.dispatch().await;
                }
                _ = ticker.tick() => self.tick().await,
                _ = self.shared.store.submitted() => {
                    self.reconcile().await;
                    self.dispatch().await;
                }
                _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.expire(Instant::now()).await;
                }
            }
        }

        self.shutdown().await;
    }

    /// One poll cycle.
    async fn tick(&mut self) {
        self.reconcile().await;
        self.evict();
        self.dispatch().await;
    }

    fn emit(&self, event: PoolEvent) {
        self.shared.emitter.emit(event);
    }

    fn count(&self, status: WorkerStatus) -> usize {
        self.workers.values().filter(|w| w.status == status).count()
    }

    fn active_count(&self) -> usize {
        self.workers.values().filter(|w| w.status.is_active()).count()
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.workers.values().filter_map(WorkerHandle::deadline).min()
    }

    /// Idle workers, the one idle the longest first.
    fn idle_longest_first(&self) -> Vec<WorkerId> {
        let mut idle: Vec<&WorkerHandle> = self.workers.values().filter(|w| w.is_idle()).collect();
        idle.sort_by_key(|w| w.last_active);
        idle.into_iter().map(WorkerHandle::id).collect()
    }

    fn snapshots(&self) -> Vec<WorkerSnapshot> {
        let now = Instant::now();
        self.workers.values().map(|w| w.snapshot(now)).collect()
    }

    /// Match the worker count to the backlog: runnable tasks plus the ones
    /// already in flight, clamped to `1..=max_workers`.
    async fn reconcile(&mut self) {
        let runnable = self.shared.store.runnable_count().await;
        let busy = self.count(WorkerStatus::Busy);
        let desired = (runnable + busy).clamp(1, self.config.max_workers.max(1));
        let active = self.active_count();

        if active < desired {
            debug!(active, desired, runnable, "scaling up");
            for _ in active..desired {
                if !self.spawn_worker() {
                    break;
                }
            }
        } else if active > desired {
            let excess = active - desired;
            let victims: Vec<WorkerId> = self.idle_longest_first().into_iter().take(excess).collect();
            if !victims.is_empty() {
                debug!(active, desired, stopping = victims.len(), "scaling down");
            }
            for worker_id in victims {
                self.stop_idle(worker_id);
            }
        }
    }

    /// Stop workers idle for longer than `idle_timeout`, keeping at least one.
    fn evict(&mut self) {
        let now = Instant::now();
        for worker_id in self.idle_longest_first() {
            if self.active_count() <= 1 {
                break;
            }
            let expired = self
                .workers
                .get(&worker_id)
                .is_some_and(|w| now.saturating_duration_since(w.last_active) >= self.config.idle_timeout);
            if !expired {
                // sorted, so everyone after is fresher
                break;
            }
            debug!(worker_id = %worker_id, "idle timeout");
            self.stop_idle(worker_id);
        }
    }

    /// Hand runnable tasks to Idle workers until one side runs out.
    async fn dispatch(&mut self) {
        loop {
            let Some(worker_id) = self.pick_idle() else {
                self.spawn_for_backlog().await;
                return;
            };
            let Some(task) = self.shared.store.next_runnable().await else {
                return;
            };
            let task = match self.shared.store.mark_running(task.id, worker_id).await {
                Ok(task) => task,
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "could not mark task running");
                    return;
                }
            };

            let deadline = Instant::now() + self.config.task_timeout;
            let Some(worker) = self.workers.get_mut(&worker_id) else {
                return;
            };
            let sent = worker.link.send(PoolMessage::Execute {
                task_id: task.id,
                kind: task.kind.clone(),
                payload: task.payload.clone(),
                attempt: task.attempts,
            });
            worker.assign(task.id, deadline);
            debug!(task_id = %task.id, worker_id = %worker_id, kind = %task.kind, attempt = task.attempts, "task assigned");
            self.emit(PoolEvent::TaskAssigned {
                task_id: task.id,
                worker_id,
            });

            if !sent {
                warn!(worker_id = %worker_id, "worker inbox closed");
                self.terminate(worker_id, failure::WORKER_TERMINATED).await;
            }
        }
    }

    /// The most recently active Idle worker, so the others can age out.
    fn pick_idle(&self) -> Option<WorkerId> {
        self.workers
            .values()
            .filter(|w| w.is_idle())
            .max_by_key(|w| w.last_active)
            .map(WorkerHandle::id)
    }

    /// No Idle worker: add one if there is room and work for it. The task is
    /// dispatched once the new worker reports Ready.
    async fn spawn_for_backlog(&mut self) {
        if self.active_count() >= self.config.max_workers {
            return;
        }
        let runnable = self.shared.store.runnable_count().await;
        if runnable > self.count(WorkerStatus::Starting) {
            self.spawn_worker();
        }
    }

    fn spawn_worker(&mut self) -> bool {
        if self.backoff.blocks(Instant::now()) {
            debug!(failures = self.backoff.failures, "spawn deferred after boot failures");
            return false;
        }
        let worker_id = self.shared.ids.generate_worker_id();
        let link = match worker::spawn_worker(
            worker_id,
            Arc::clone(&self.shared.registry),
            self.outbox.clone(),
        ) {
            Ok(link) => link,
            Err(e) => {
                error!(worker_id = %worker_id, error = %e, "failed to spawn worker");
                return false;
            }
        };
        self.admit(link);
        true
    }

    /// Send `Initialize` and start tracking the worker as Starting.
    fn admit(&mut self, link: WorkerLink) {
        let worker_id = link.id();
        link.send(PoolMessage::Initialize {
            worker_id,
            config: WorkerInit {
                task_timeout: self.config.task_timeout,
            },
        });
        let now = Instant::now();
        let handle = WorkerHandle::new(
            link,
            self.shared.clock.now(),
            now,
            now + self.config.worker_boot_timeout,
        );
        self.workers.insert(worker_id, handle);

        info!(worker_id = %worker_id, "worker created");
        self.emit(PoolEvent::WorkerCreated { worker_id });
    }

    /// Scale-down/eviction path. Only ever called for Idle workers.
    fn stop_idle(&mut self, worker_id: WorkerId) {
        let Some(mut handle) = self.workers.remove(&worker_id) else {
            return;
        };
        handle.status = WorkerStatus::Stopping;
        handle.link.terminate();
        info!(worker_id = %worker_id, completed = handle.completed_count, "worker stopped");
        self.emit(PoolEvent::WorkerTerminated { worker_id });
    }

    /// Remove a worker, failing the task it was running with `reason`.
    async fn terminate(&mut self, worker_id: WorkerId, reason: &str) {
        let Some(mut handle) = self.workers.remove(&worker_id) else {
            return;
        };
        if handle.status.is_active() {
            handle.status = WorkerStatus::Stopping;
        }

        if let Some(task_id) = handle.current_task.take() {
            match self.shared.store.mark_failed(task_id, reason).await {
                Ok(_) => {
                    self.shared.counters.record_failed();
                    self.emit(PoolEvent::TaskFailed {
                        task_id,
                        worker_id,
                        error: reason.to_string(),
                    });
                }
                // cancelled in the meantime
                Err(e) => debug!(task_id = %task_id, error = %e, "task no longer running"),
            }
        }

        handle.link.terminate();
        info!(worker_id = %worker_id, status = ?handle.status, "worker terminated");
        self.emit(PoolEvent::WorkerTerminated { worker_id });
    }

    async fn on_message(&mut self, envelope: Envelope) {
        let Envelope { from, message } = envelope;
        let now = Instant::now();

        let Some(worker) = self.workers.get_mut(&from) else {
            debug!(worker_id = %from, ?message, "message from unknown worker ignored");
            return;
        };
        if let Some(task_id) = message.task_id()
            && worker.current_task != Some(task_id)
        {
            debug!(worker_id = %from, task_id = %task_id, "stale message ignored");
            return;
        }

        match message {
            WorkerMessage::Ready => {
                if worker.status != WorkerStatus::Starting {
                    debug!(worker_id = %from, status = ?worker.status, "unexpected ready");
                    return;
                }
                worker.status = WorkerStatus::Idle;
                worker.boot_deadline = None;
                worker.last_active = now;
                self.backoff.reset();
                debug!(worker_id = %from, "worker ready");
                self.emit(PoolEvent::WorkerReady { worker_id: from });
            }
            WorkerMessage::Progress { task_id, percent } => {
                match self
                    .shared
                    .store
                    .update_progress(task_id, i32::from(percent))
                    .await
                {
                    Ok(true) => self.emit(PoolEvent::TaskProgress {
                        task_id,
                        worker_id: from,
                        percent,
                    }),
                    Ok(false) => {}
                    Err(e) => debug!(task_id = %task_id, error = %e, "progress not recorded"),
                }
            }
            WorkerMessage::Completed { task_id, result } => {
                worker.release(now);
                match self.shared.store.mark_completed(task_id, result).await {
                    Ok(_) => {
                        worker.completed_count += 1;
                        self.shared.counters.record_processed();
                        debug!(task_id = %task_id, worker_id = %from, "task completed");
                        self.emit(PoolEvent::TaskCompleted {
                            task_id,
                            worker_id: from,
                        });
                    }
                    Err(e) => debug!(task_id = %task_id, error = %e, "completion dropped"),
                }
            }
            WorkerMessage::Failed { task_id, error } => {
                worker.release(now);
                match self.shared.store.mark_failed(task_id, error.clone()).await {
                    Ok(task) => {
                        worker.failed_count += 1;
                        self.shared.counters.record_failed();
                        debug!(task_id = %task_id, worker_id = %from, status = %task.status, error = %error, "task failed");
                        self.emit(PoolEvent::TaskFailed {
                            task_id,
                            worker_id: from,
                            error,
                        });
                    }
                    Err(e) => debug!(task_id = %task_id, error = %e, "failure dropped"),
                }
            }
            WorkerMessage::WorkerError { error } => {
                let booting = worker.status == WorkerStatus::Starting;
                worker.status = WorkerStatus::Errored;
                warn!(worker_id = %from, error = %error, "worker error");
                if booting {
                    let delay = self.backoff.record_failure(self.config.poll_interval, now);
                    warn!(worker_id = %from, ?delay, failures = self.backoff.failures, "worker failed to boot, delaying respawn");
                }
                self.emit(PoolEvent::WorkerErrored {
                    worker_id: from,
                    error,
                });
                self.terminate(from, failure::WORKER_TERMINATED).await;
                self.reconcile().await;
            }
        }
    }

    /// Handle expired boot and task deadlines.
    async fn expire(&mut self, now: Instant) {
        let boot_expired: Vec<WorkerId> = self
            .workers
            .values()
            .filter(|w| w.boot_deadline.is_some_and(|d| d <= now))
            .map(WorkerHandle::id)
            .collect();
        let task_expired: Vec<WorkerId> = self
            .workers
            .values()
            .filter(|w| w.task_deadline.is_some_and(|d| d <= now))
            .map(WorkerHandle::id)
            .collect();

        for worker_id in boot_expired {
            if let Some(worker) = self.workers.get_mut(&worker_id) {
                worker.status = WorkerStatus::Errored;
            }
            warn!(worker_id = %worker_id, "worker did not become ready in time");
            self.emit(PoolEvent::WorkerErrored {
                worker_id,
                error: "boot timed out".into(),
            });
            self.terminate(worker_id, failure::WORKER_TERMINATED).await;
        }

        for worker_id in task_expired {
            let Some(worker) = self.workers.get_mut(&worker_id) else {
                continue;
            };
            // cleared before terminate so the task is failed exactly once
            worker.task_deadline = None;
            let Some(task_id) = worker.current_task.take() else {
                continue;
            };
            worker.failed_count += 1;

            match self.shared.store.mark_failed(task_id, failure::TIMED_OUT).await {
                Ok(task) => {
                    self.shared.counters.record_failed();
                    warn!(task_id = %task_id, worker_id = %worker_id, status = %task.status, "task timed out");
                    self.emit(PoolEvent::TaskTimedOut { task_id, worker_id });
                }
                Err(e) => debug!(task_id = %task_id, error = %e, "timeout for task no longer running"),
            }
            self.terminate(worker_id, failure::WORKER_TERMINATED).await;
        }

        self.reconcile().await;
        self.dispatch().await;
    }

    async fn abort(&mut self, task_id: TaskId, worker_id: WorkerId) {
        let running_it = self
            .workers
            .get(&worker_id)
            .is_some_and(|w| w.current_task == Some(task_id));
        if !running_it {
            return;
        }
        info!(task_id = %task_id, worker_id = %worker_id, "aborting task");
        self.terminate(worker_id, failure::WORKER_TERMINATED).await;
        self.reconcile().await;
        self.dispatch().await;
    }

    async fn shutdown(&mut self) {
        let worker_ids: Vec<WorkerId> = self.workers.keys().copied().collect();
        for worker_id in worker_ids {
            self.terminate(worker_id, failure::POOL_STOPPED).await;
        }
        info!(
            processed = self.shared.counters.processed(),
            failed = self.shared.counters.failed(),
            "worker pool stopped"
        );
    }
}
