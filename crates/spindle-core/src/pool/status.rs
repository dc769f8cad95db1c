//! Point-in-time views of the pool.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::PoolConfig;
use crate::domain::{TaskId, WorkerId, WorkerStatus};

/// Totals that outlive individual workers.
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    processed: AtomicU64,
    failed: AtomicU64,
}

impl PoolCounters {
    pub(crate) fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub(crate) fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// One worker as seen by the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub status: WorkerStatus,
    pub current_task: Option<TaskId>,
    pub started_at: DateTime<Utc>,
    #[serde(with = "crate::serde_millis")]
    pub uptime: Duration,
    /// Time since the last Ready/Completed/Failed; `None` unless Idle.
    #[serde(with = "crate::serde_millis::option")]
    pub idle_for: Option<Duration>,
    pub completed_count: u64,
    pub failed_count: u64,
}

/// Counts by worker state plus cumulative totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub running: bool,
    pub total: usize,
    pub starting: usize,
    pub idle: usize,
    pub busy: usize,
    pub stopping: usize,
    pub errored: usize,
    /// Completed executions since the pool was created.
    pub processed_total: u64,
    /// Failed or timed-out executions since the pool was created.
    pub failed_total: u64,
    pub config: PoolConfig,
}

impl PoolStatus {
    pub(crate) fn from_workers(
        running: bool,
        workers: &[WorkerSnapshot],
        counters: &PoolCounters,
        config: PoolConfig,
    ) -> Self {
        let count = |status| workers.iter().filter(|w| w.status == status).count();
        Self {
            running,
            total: workers.len(),
            starting: count(WorkerStatus::Starting),
            idle: count(WorkerStatus::Idle),
            busy: count(WorkerStatus::Busy),
            stopping: count(WorkerStatus::Stopping),
            errored: count(WorkerStatus::Errored),
            processed_total: counters.processed(),
            failed_total: counters.failed(),
            config,
        }
    }

    /// Workers that count toward the pool size.
    pub fn active(&self) -> usize {
        self.starting + self.idle + self.busy
    }
}
