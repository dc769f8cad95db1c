//! Periodic snapshot loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::TaskStore;
use crate::ports::SnapshotStore;

/// Save `store` into `snapshots` every `interval` until `shutdown` flips to
/// `true` (or its sender is dropped). A final save runs on the way out.
///
/// Save failures are logged and the loop keeps going.
pub fn spawn_autosave(
    store: Arc<TaskStore>,
    snapshots: Arc<dyn SnapshotStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match store.save_to(snapshots.as_ref()).await {
                        Ok(count) => debug!(count, "autosave complete"),
                        Err(e) => warn!(error = %e, "autosave failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        match store.save_to(snapshots.as_ref()).await {
            Ok(count) => info!(count, "final snapshot saved"),
            Err(e) => warn!(error = %e, "final snapshot failed"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskSpec;
    use crate::ports::MemorySnapshotStore;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn saves_periodically_and_on_shutdown() {
        let store = Arc::new(TaskStore::new());
        let snapshots = Arc::new(MemorySnapshotStore::new());
        let (tx, rx) = watch::channel(false);

        let handle = spawn_autosave(
            Arc::clone(&store),
            snapshots.clone(),
            Duration::from_secs(30),
            rx,
        );

        store.submit(TaskSpec::new("echo", json!(1))).await.unwrap();
        time::sleep(Duration::from_secs(31)).await;
        assert_eq!(snapshots.load_snapshot().await.unwrap().len(), 1);

        store.submit(TaskSpec::new("echo", json!(2))).await.unwrap();
        tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(snapshots.load_snapshot().await.unwrap().len(), 2);
    }
}
