//! Event fan-out for the pool.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::PoolEvent;
use crate::ports::{BroadcastEventSink, EventSink};

/// Sends every event to the pool's broadcast channel and to the configured
/// sink, and traces it.
pub(crate) struct Emitter {
    broadcast: BroadcastEventSink,
    sink: Arc<dyn EventSink>,
}

impl Emitter {
    pub(crate) fn new(sink: Arc<dyn EventSink>, capacity: usize) -> Self {
        Self {
            broadcast: BroadcastEventSink::new(capacity),
            sink,
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.broadcast.subscribe()
    }
}

impl EventSink for Emitter {
    fn emit(&self, event: PoolEvent) {
        debug!(event = event.name(), task_id = ?event.task_id(), "pool event");
        self.sink.emit(event.clone());
        self.broadcast.emit(event);
    }
}
