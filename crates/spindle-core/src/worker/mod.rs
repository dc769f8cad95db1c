//! Isolated execution units.
//!
//! A worker is a dedicated OS thread running its own current-thread tokio
//! runtime. It shares nothing mutable with the pool: it receives
//! `PoolMessage`s on its inbox, reports `WorkerMessage`s on the shared outbox
//! and watches a shutdown flag.

mod runner;

use std::io;
use std::sync::Arc;
use std::thread;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error};

use crate::domain::{Envelope, PoolMessage, WorkerId, WorkerMessage};
use crate::typed::HandlerRegistry;

/// The pool's end of a worker.
#[derive(Debug)]
pub struct WorkerLink {
    id: WorkerId,
    inbox: mpsc::UnboundedSender<PoolMessage>,
    shutdown: watch::Sender<bool>,
    thread: thread::JoinHandle<()>,
}

impl WorkerLink {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Returns `false` if the worker has already gone away.
    pub fn send(&self, message: PoolMessage) -> bool {
        self.inbox.send(message).is_ok()
    }

    pub fn is_alive(&self) -> bool {
        !self.thread.is_finished()
    }

    /// Signal shutdown and let the thread go.
    ///
    /// In-flight handler futures are dropped at their next await point. The
    /// thread is not joined: a handler stuck in blocking code would block the
    /// caller too.
    pub fn terminate(self) {
        let _ = self.shutdown.send(true);
        drop(self.inbox);
        debug!(worker_id = %self.id, "worker signalled to stop");
    }
}

#[cfg(test)]
impl WorkerLink {
    /// A link whose thread has already exited: it never answers.
    pub(crate) fn silent(id: WorkerId) -> Self {
        let (inbox, _) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Self {
            id,
            inbox,
            shutdown,
            thread: thread::spawn(|| {}),
        }
    }
}

/// Start a worker thread. It does nothing until it receives `Initialize`.
pub fn spawn_worker(
    id: WorkerId,
    registry: Arc<HandlerRegistry>,
    outbox: mpsc::UnboundedSender<Envelope>,
) -> io::Result<WorkerLink> {
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let thread = thread::Builder::new()
        .name(format!("spindle-{id}"))
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!(worker_id = %id, error = %e, "worker runtime failed to start");
                    let _ = outbox.send(Envelope {
                        from: id,
                        message: WorkerMessage::WorkerError {
                            error: format!("runtime: {e}"),
                        },
                    });
                    return;
                }
            };
            rt.block_on(runner::run(id, registry, inbox_rx, outbox, shutdown_rx));
        })?;

    Ok(WorkerLink {
        id,
        inbox: inbox_tx,
        shutdown: shutdown_tx,
        thread,
    })
}
