//! Ports - seams to the outside world.
//!
//! Each trait here is something the scheduler consumes but does not own:
//! time, id allocation, event delivery and snapshot storage.

pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod snapshot_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::{BroadcastEventSink, EventSink, NoopEventSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::snapshot_store::{JsonFileSnapshotStore, MemorySnapshotStore, SnapshotStore};
