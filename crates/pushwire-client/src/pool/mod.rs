//! Connection pool
//!
//! A single coordinator task owns every connection. Submissions, connection
//! lifecycle updates and shutdown requests all reach it as [`PoolEvent`]s, so
//! no pool state is shared across tasks.

mod backoff;
mod coordinator;

use parking_lot::Mutex;
use pushwire_core::PushError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub use backoff::ConnectBackoff;

use crate::config::ClientConfig;
use crate::connection::{ConnectionHandle, PendingNotification};
use crate::transport::Connector;
use coordinator::PoolCoordinator;

pub(crate) enum PoolEvent {
    /// New notification from the client
    Submit(PendingNotification),
    /// Notification handed back by a connection that will not write it
    Resubmit(PendingNotification),
    Established {
        id: u64,
        handle: ConnectionHandle,
    },
    AttemptFailed {
        id: u64,
        error: String,
    },
    WritabilityChanged {
        id: u64,
        writable: bool,
    },
    /// Connection stopped taking new work
    Draining {
        id: u64,
    },
    Closed {
        id: u64,
    },
    Shutdown {
        done: Option<oneshot::Sender<()>>,
    },
}

/// Handle to the pool coordinator task
pub(crate) struct ConnectionPool {
    events: mpsc::UnboundedSender<PoolEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionPool {
    /// Spawn the coordinator. Connections are opened right away.
    pub(crate) fn start(config: &ClientConfig, connector: Connector) -> Self {
        let (events, receiver) = mpsc::unbounded_channel();
        let coordinator = PoolCoordinator::new(config, connector, events.clone(), receiver);
        let task = tokio::spawn(coordinator.run());

        Self {
            events,
            task: Mutex::new(Some(task)),
        }
    }

    pub(crate) fn submit(&self, pending: PendingNotification) {
        if let Err(mpsc::error::SendError(event)) = self.events.send(PoolEvent::Submit(pending)) {
            if let PoolEvent::Submit(pending) = event {
                pending.fail(PushError::ClientClosed);
            }
        }
    }

    /// Ask the coordinator to shut down and wait until every connection has
    /// closed
    pub(crate) async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .events
            .send(PoolEvent::Shutdown {
                done: Some(done_tx),
            })
            .is_ok()
        {
            let _ = done_rx.await;
        }

        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Start shutting down without waiting for it to finish
    pub(crate) fn shutdown_in_background(&self) {
        let _ = self.events.send(PoolEvent::Shutdown { done: None });
    }
}
