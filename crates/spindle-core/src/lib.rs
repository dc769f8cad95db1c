//! spindle-core
//!
//! Priority task scheduling with an isolated, self-sizing worker pool.
//!
//! # Modules
//! - **domain**: ids, tasks, status machines, events and the worker protocol
//! - **store**: `TaskStore`, the priority-ordered, dependency-aware task set
//! - **pool**: `WorkerPool`, its driver loop, config and builder
//! - **worker**: thread-isolated execution units
//! - **typed**: handler traits and the `HandlerRegistry`
//! - **ports**: clock, id generation, event sinks and snapshot storage
//!
//! ```ignore
//! let store = Arc::new(TaskStore::new());
//! let pool = WorkerPool::builder(Arc::clone(&store))
//!     .register_fn("echo", |payload, _ctx| async move { Ok(payload) })?
//!     .build()?;
//! pool.start().await;
//! store.submit(TaskSpec::new("echo", json!({ "hello": "world" }))).await?;
//! ```

pub mod domain;
pub mod error;
pub mod pool;
pub mod ports;
pub mod store;
pub mod typed;
pub mod worker;

pub(crate) mod serde_millis;

pub use domain::{Priority, Task, TaskId, TaskKind, TaskSpec, TaskStatus, WorkerId};
pub use error::{PoolError, SnapshotError, StoreError};
pub use pool::{PoolBuilder, PoolConfig, PoolOptions, PoolStatus, WorkerPool};
pub use store::TaskStore;
