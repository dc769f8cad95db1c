//! The loop running inside a worker thread.

use std::any::Any;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn};

use crate::domain::{Envelope, PoolMessage, TaskId, TaskKind, WorkerId, WorkerInit, WorkerMessage};
use crate::typed::{HandlerError, HandlerRegistry, TaskContext};

type Outcome = Result<serde_json::Value, HandlerError>;

struct InFlight {
    task_id: TaskId,
    handle: JoinHandle<Outcome>,
}

struct Worker {
    id: WorkerId,
    registry: Arc<HandlerRegistry>,
    outbox: mpsc::UnboundedSender<Envelope>,
    init: Option<WorkerInit>,
    in_flight: Option<InFlight>,
}

impl Worker {
    /// `false` once the pool has dropped its receiver.
    fn reply(&self, message: WorkerMessage) -> bool {
        self.outbox
            .send(Envelope {
                from: self.id,
                message,
            })
            .is_ok()
    }

    fn fault(&self, error: impl Into<String>) -> bool {
        self.reply(WorkerMessage::WorkerError {
            error: error.into(),
        })
    }

    fn handle_message(&mut self, message: PoolMessage) -> bool {
        match message {
            PoolMessage::Initialize { worker_id, config } => {
                if worker_id != self.id {
                    warn!(worker_id = %self.id, addressed_to = %worker_id, "initialize addressed to another worker");
                }
                self.init = Some(config);
                self.reply(WorkerMessage::Ready)
            }
            PoolMessage::Execute {
                task_id,
                kind,
                payload,
                attempt,
            } => self.execute(task_id, kind, payload, attempt),
        }
    }

    fn execute(
        &mut self,
        task_id: TaskId,
        kind: TaskKind,
        payload: serde_json::Value,
        attempt: u32,
    ) -> bool {
        let Some(init) = &self.init else {
            return self.fault(format!("execute for {task_id} before initialize"));
        };
        if let Some(current) = &self.in_flight {
            return self.fault(format!(
                "execute for {task_id} while {} is in flight",
                current.task_id
            ));
        }
        let Some(handler) = self.registry.get(&kind) else {
            return self.reply(WorkerMessage::Failed {
                task_id,
                error: format!("no handler registered for kind '{kind}'"),
            });
        };

        debug!(worker_id = %self.id, task_id = %task_id, kind = %kind, attempt, "executing");
        let ctx = TaskContext::new(
            task_id,
            kind,
            attempt,
            init.task_timeout,
            self.id,
            self.outbox.clone(),
        );
        let handle = tokio::spawn(async move { handler.handle(payload, ctx).await });
        self.in_flight = Some(InFlight { task_id, handle });
        true
    }

    /// Returns `false` when the worker must exit.
    fn finish(&mut self, task_id: TaskId, joined: Result<Outcome, JoinError>) -> bool {
        self.in_flight = None;
        match joined {
            Ok(Ok(result)) => self.reply(WorkerMessage::Completed { task_id, result }),
            Ok(Err(e)) => self.reply(WorkerMessage::Failed {
                task_id,
                error: e.to_string(),
            }),
            Err(e) if e.is_panic() => {
                let reason = panic_message(e.into_panic());
                warn!(worker_id = %self.id, task_id = %task_id, reason = %reason, "handler panicked");
                self.fault(format!("handler panicked: {reason}"));
                false
            }
            // aborted from our side during shutdown
            Err(_) => true,
        }
    }
}

async fn join_in_flight(in_flight: &mut Option<InFlight>) -> (TaskId, Result<Outcome, JoinError>) {
    match in_flight {
        Some(f) => (f.task_id, (&mut f.handle).await),
        None => std::future::pending().await,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub(super) async fn run(
    id: WorkerId,
    registry: Arc<HandlerRegistry>,
    mut inbox: mpsc::UnboundedReceiver<PoolMessage>,
    outbox: mpsc::UnboundedSender<Envelope>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut worker = Worker {
        id,
        registry,
        outbox,
        init: None,
        in_flight: None,
    };

    loop {
        let keep_going = tokio::select! {
            changed = shutdown.changed() => {
                changed.is_ok() && !*shutdown.borrow()
            }
            message = inbox.recv() => match message {
                Some(message) => worker.handle_message(message),
                None => false,
            },
            (task_id, joined) = join_in_flight(&mut worker.in_flight) => {
                worker.finish(task_id, joined)
            }
        };
        if !keep_going {
            break;
        }
    }

    if let Some(in_flight) = worker.in_flight.take() {
        in_flight.handle.abort();
    }
    debug!(worker_id = %id, "worker exited");
}
