//! Pool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PoolError;

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_BOOT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Tuning knobs for a `WorkerPool`. Durations serialize as milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on live workers. Defaults to the number of CPUs, at least 2.
    pub max_workers: usize,

    /// An Idle worker older than this is stopped (one always survives).
    #[serde(with = "crate::serde_millis")]
    pub idle_timeout: Duration,

    /// Deadline for a single execution.
    #[serde(with = "crate::serde_millis")]
    pub task_timeout: Duration,

    /// Deadline for a new worker to answer `Initialize` with `Ready`.
    #[serde(with = "crate::serde_millis")]
    pub worker_boot_timeout: Duration,

    /// Reconcile/evict/dispatch cadence. Submits also wake the driver.
    #[serde(with = "crate::serde_millis")]
    pub poll_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self {
            max_workers: cpus.max(2),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            task_timeout: DEFAULT_TASK_TIMEOUT,
            worker_boot_timeout: DEFAULT_BOOT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl PoolConfig {
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_task_timeout(mut self, task_timeout: Duration) -> Self {
        self.task_timeout = task_timeout;
        self
    }

    pub fn with_worker_boot_timeout(mut self, worker_boot_timeout: Duration) -> Self {
        self.worker_boot_timeout = worker_boot_timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_workers == 0 {
            return Err(PoolError::InvalidConfig("max_workers must be at least 1".into()));
        }
        for (name, value) in [
            ("idle_timeout", self.idle_timeout),
            ("task_timeout", self.task_timeout),
            ("worker_boot_timeout", self.worker_boot_timeout),
            ("poll_interval", self.poll_interval),
        ] {
            if value.is_zero() {
                return Err(PoolError::InvalidConfig(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }

    /// Copy of `self` with every field set in `options` replaced.
    pub fn merged(&self, options: &PoolOptions) -> Self {
        Self {
            max_workers: options.max_workers.unwrap_or(self.max_workers),
            idle_timeout: options.idle_timeout.unwrap_or(self.idle_timeout),
            task_timeout: options.task_timeout.unwrap_or(self.task_timeout),
            worker_boot_timeout: options
                .worker_boot_timeout
                .unwrap_or(self.worker_boot_timeout),
            poll_interval: options.poll_interval.unwrap_or(self.poll_interval),
        }
    }
}

/// Partial update for `WorkerPool::configure`. Unset fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
    #[serde(with = "crate::serde_millis::option", skip_serializing_if = "Option::is_none")]
    pub idle_timeout: Option<Duration>,
    #[serde(with = "crate::serde_millis::option", skip_serializing_if = "Option::is_none")]
    pub task_timeout: Option<Duration>,
    #[serde(with = "crate::serde_millis::option", skip_serializing_if = "Option::is_none")]
    pub worker_boot_timeout: Option<Duration>,
    #[serde(with = "crate::serde_millis::option", skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<Duration>,
}

impl PoolOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }

    pub fn task_timeout(mut self, task_timeout: Duration) -> Self {
        self.task_timeout = Some(task_timeout);
        self
    }

    pub fn worker_boot_timeout(mut self, worker_boot_timeout: Duration) -> Self {
        self.worker_boot_timeout = Some(worker_boot_timeout);
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = Some(poll_interval);
        self
    }
}
