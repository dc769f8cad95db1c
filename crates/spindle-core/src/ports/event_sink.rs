//! EventSink port - observability hook for pool events.

use tokio::sync::broadcast;

use crate::domain::PoolEvent;

/// EventSink receives pool events for dashboards and audit logs.
///
/// `emit` is called from the pool driver and must not block; slow consumers
/// should buffer or drop.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PoolEvent);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: PoolEvent) {}
}

/// Fans events out over a `tokio::sync::broadcast` channel.
///
/// Lagging receivers lose the oldest events; nobody listening is fine too.
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<PoolEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: PoolEvent) {
        // no receivers is not an error here
        let _ = self.tx.send(event);
    }
}
