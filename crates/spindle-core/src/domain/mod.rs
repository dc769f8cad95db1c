//! Domain model: ids, tasks, state machines, events and the worker protocol.

pub mod events;
pub mod ids;
pub mod message;
pub mod state;
pub mod task;

pub use events::PoolEvent;
pub use ids::{Id, IdMarker, TaskId, WorkerId};
pub use message::{Envelope, PoolMessage, WorkerInit, WorkerMessage};
pub use state::{TaskStatus, WaitingReason, WorkerStatus};
pub use task::{DEFAULT_MAX_ATTEMPTS, Priority, Task, TaskKind, TaskSpec};
