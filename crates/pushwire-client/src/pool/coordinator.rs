//! Pool coordinator task

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use pushwire_core::{IdSequence, MetricsListener, PushError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::backoff::ConnectBackoff;
use super::PoolEvent;
use crate::config::ClientConfig;
use crate::connection::{
    ConnectionHandle, ConnectionHandler, ConnectionState, HandlerSettings, PendingNotification,
};
use crate::time::sleep_until_opt;
use crate::transport::{ConnectError, Connector};

/// Extra time granted past the graceful shutdown deadline for connection
/// tasks to report that they have closed
const FORCE_CLOSE_GRACE: Duration = Duration::from_millis(250);

struct PooledConnection {
    handle: ConnectionHandle,
    state: ConnectionState,
    writable: bool,
}

impl PooledConnection {
    fn accepts_work(&self) -> bool {
        self.writable && self.state == ConnectionState::Connected
    }
}

struct Waiter {
    pending: PendingNotification,
    deadline: Instant,
}

struct ShutdownState {
    deadline: Instant,
    notify: Vec<oneshot::Sender<()>>,
}

pub(super) struct PoolCoordinator {
    target: usize,
    acquire_timeout: Duration,
    graceful_shutdown_timeout: Duration,
    connector: Arc<Connector>,
    settings: Arc<HandlerSettings>,
    metrics: Arc<dyn MetricsListener>,
    events_tx: mpsc::UnboundedSender<PoolEvent>,
    events: mpsc::UnboundedReceiver<PoolEvent>,
    shutdown_tx: watch::Sender<Option<Instant>>,
    connection_ids: IdSequence,

    connections: HashMap<u64, PooledConnection>,
    /// Connected ids in round-robin order
    rotation: Vec<u64>,
    cursor: usize,
    connecting: HashSet<u64>,
    tasks: HashMap<u64, JoinHandle<()>>,
    waiters: VecDeque<Waiter>,

    backoff: ConnectBackoff,
    reconnect_at: Option<Instant>,
    shutdown: Option<ShutdownState>,
}

impl PoolCoordinator {
    pub(super) fn new(
        config: &ClientConfig,
        connector: Connector,
        events_tx: mpsc::UnboundedSender<PoolEvent>,
        events: mpsc::UnboundedReceiver<PoolEvent>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(None);
        Self {
            target: config.concurrent_connections,
            acquire_timeout: config.acquire_timeout,
            graceful_shutdown_timeout: config.graceful_shutdown_timeout,
            connector: Arc::new(connector),
            settings: Arc::new(HandlerSettings::from_config(config)),
            metrics: config.metrics.clone(),
            events_tx,
            events,
            shutdown_tx,
            connection_ids: IdSequence::new(),
            connections: HashMap::new(),
            rotation: Vec::new(),
            cursor: 0,
            connecting: HashSet::new(),
            tasks: HashMap::new(),
            waiters: VecDeque::new(),
            backoff: ConnectBackoff::new(config.backoff),
            reconnect_at: None,
            shutdown: None,
        }
    }

    pub(super) async fn run(mut self) {
        info!(
            "[ConnectionPool] Starting {} connection(s) to {}",
            self.target,
            self.connector.description()
        );
        self.fill();

        loop {
            if self.finished() {
                break;
            }

            let waiter_deadline = self.waiters.front().map(|waiter| waiter.deadline);
            let force_deadline = self
                .shutdown
                .as_ref()
                .map(|state| state.deadline + FORCE_CLOSE_GRACE);

            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                _ = sleep_until_opt(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.fill();
                }
                _ = sleep_until_opt(waiter_deadline) => self.expire_waiters(),
                _ = sleep_until_opt(force_deadline) => {
                    self.force_close();
                    break;
                }
            }
        }

        self.complete_shutdown();
    }

    fn handle_event(&mut self, event: PoolEvent) {
        match event {
            PoolEvent::Submit(pending) | PoolEvent::Resubmit(pending) => self.route(pending),
            PoolEvent::Established { id, handle } => self.on_established(id, handle),
            PoolEvent::AttemptFailed { id, error } => self.on_attempt_failed(id, error),
            PoolEvent::WritabilityChanged { id, writable } => {
                if let Some(connection) = self.connections.get_mut(&id) {
                    connection.writable = writable;
                }
                if writable {
                    self.flush_waiters();
                }
            }
            PoolEvent::Draining { id } => {
                if let Some(connection) = self.connections.get_mut(&id) {
                    debug!(
                        connection = %connection.handle.name,
                        "[ConnectionPool] Connection draining"
                    );
                    connection.state = ConnectionState::Draining;
                    connection.writable = false;
                }
                self.rotation.retain(|other| *other != id);
                self.schedule_reconnect(self.backoff.current());
            }
            PoolEvent::Closed { id } => {
                self.tasks.remove(&id);
                self.rotation.retain(|other| *other != id);
                if let Some(connection) = self.connections.remove(&id) {
                    info!(
                        connection = %connection.handle.name,
                        "[ConnectionPool] Connection closed"
                    );
                    self.metrics.handle_connection_removed();
                }
                self.schedule_reconnect(self.backoff.current());
            }
            PoolEvent::Shutdown { done } => self.begin_shutdown(done),
        }
    }

    fn on_established(&mut self, id: u64, handle: ConnectionHandle) {
        self.connecting.remove(&id);
        if self.shutdown.is_some() {
            debug!(
                connection = %handle.name,
                "[ConnectionPool] Discarding connection opened during shutdown"
            );
            return;
        }

        info!(connection = %handle.name, "[ConnectionPool] Connection established");
        self.backoff.reset();
        self.metrics.handle_connection_added();
        self.connections.insert(
            id,
            PooledConnection {
                handle,
                state: ConnectionState::Connected,
                writable: true,
            },
        );
        self.rotation.push(id);
        self.flush_waiters();
    }

    fn on_attempt_failed(&mut self, id: u64, error: String) {
        self.connecting.remove(&id);
        self.tasks.remove(&id);
        self.metrics.handle_connection_creation_failed();
        if self.shutdown.is_some() {
            return;
        }

        let delay = self.backoff.next_delay();
        warn!(
            "[ConnectionPool] Failed to connect to {}: {} (retrying in {:?})",
            self.connector.description(),
            error,
            delay
        );

        let live = self
            .connections
            .values()
            .any(|connection| connection.state == ConnectionState::Connected);
        if !live && self.connecting.is_empty() {
            let failed = self.waiters.len();
            if failed > 0 {
                debug!("[ConnectionPool] Failing {} waiting notification(s)", failed);
            }
            for waiter in self.waiters.drain(..) {
                waiter
                    .pending
                    .fail(PushError::ConnectionFailed(error.clone()));
            }
        }

        self.schedule_reconnect(delay);
    }

    /// Hand a notification to the next writable connection, or queue it
    fn route(&mut self, pending: PendingNotification) {
        if self.shutdown.is_some() {
            pending.fail(PushError::ClientClosed);
            return;
        }

        let mut pending = pending;
        if self.waiters.is_empty() {
            while let Some(id) = self.next_writable() {
                let Some(connection) = self.connections.get_mut(&id) else {
                    continue;
                };
                match connection.handle.send(pending) {
                    Ok(()) => return,
                    Err(returned) => {
                        connection.writable = false;
                        pending = returned;
                    }
                }
            }
        }

        self.waiters.push_back(Waiter {
            pending,
            deadline: Instant::now() + self.acquire_timeout,
        });
        self.flush_waiters();
    }

    fn flush_waiters(&mut self) {
        while !self.waiters.is_empty() {
            let Some(id) = self.next_writable() else {
                break;
            };
            let Some(connection) = self.connections.get_mut(&id) else {
                break;
            };
            let Some(waiter) = self.waiters.pop_front() else {
                break;
            };
            if let Err(returned) = connection.handle.send(waiter.pending) {
                connection.writable = false;
                self.waiters.push_front(Waiter {
                    pending: returned,
                    deadline: waiter.deadline,
                });
            }
        }
    }

    fn next_writable(&mut self) -> Option<u64> {
        let len = self.rotation.len();
        for _ in 0..len {
            let id = self.rotation[self.cursor % len];
            self.cursor = (self.cursor + 1) % len;
            if self
                .connections
                .get(&id)
                .is_some_and(PooledConnection::accepts_work)
            {
                return Some(id);
            }
        }
        None
    }

    fn expire_waiters(&mut self) {
        let now = Instant::now();
        while self
            .waiters
            .front()
            .is_some_and(|waiter| waiter.deadline <= now)
        {
            if let Some(waiter) = self.waiters.pop_front() {
                debug!(
                    id = waiter.pending.id(),
                    "[ConnectionPool] No connection became available in time"
                );
                waiter.pending.fail(PushError::AcquireTimeout);
            }
        }
    }

    /// Connections that are open for work or on their way
    fn active_count(&self) -> usize {
        let connected = self
            .connections
            .values()
            .filter(|connection| connection.state == ConnectionState::Connected)
            .count();
        connected + self.connecting.len()
    }

    fn fill(&mut self) {
        if self.shutdown.is_some() {
            return;
        }
        while self.active_count() < self.target {
            self.spawn_attempt();
        }
    }

    fn schedule_reconnect(&mut self, delay: Duration) {
        if self.shutdown.is_some() || self.active_count() >= self.target {
            return;
        }
        let at = Instant::now() + delay;
        self.reconnect_at = Some(match self.reconnect_at {
            Some(existing) => existing.min(at),
            None => at,
        });
    }

    fn spawn_attempt(&mut self) {
        let id = self.connection_ids.next_id();
        let connector = self.connector.clone();
        let settings = self.settings.clone();
        let events = self.events_tx.clone();
        let shutdown = self.shutdown_tx.subscribe();
        debug!(connection_id = id, "[ConnectionPool] Opening connection");

        let task = tokio::spawn(async move {
            let limit = connector.connect_timeout();
            let attempt = async {
                let io = connector.connect().await?;
                ConnectionHandler::establish(id, io, settings, events.clone(), shutdown).await
            };

            match tokio::time::timeout(limit, attempt).await {
                Ok(Ok((handle, handler))) => {
                    if events.send(PoolEvent::Established { id, handle }).is_ok() {
                        handler.run().await;
                    }
                }
                Ok(Err(e)) => {
                    let _ = events.send(PoolEvent::AttemptFailed {
                        id,
                        error: e.to_string(),
                    });
                }
                Err(_) => {
                    let _ = events.send(PoolEvent::AttemptFailed {
                        id,
                        error: ConnectError::Timeout(limit).to_string(),
                    });
                }
            }
        });

        self.connecting.insert(id);
        self.tasks.insert(id, task);
    }

    fn begin_shutdown(&mut self, done: Option<oneshot::Sender<()>>) {
        if let Some(state) = self.shutdown.as_mut() {
            state.notify.extend(done);
            return;
        }

        let deadline = Instant::now() + self.graceful_shutdown_timeout;
        info!(
            "[ConnectionPool] Shutting down {} connection(s)",
            self.connections.len()
        );

        self.reconnect_at = None;
        for waiter in self.waiters.drain(..) {
            waiter.pending.fail(PushError::ClientClosed);
        }
        for id in self.connecting.drain() {
            if let Some(task) = self.tasks.remove(&id) {
                task.abort();
            }
        }
        let _ = self.shutdown_tx.send(Some(deadline));

        self.shutdown = Some(ShutdownState {
            deadline,
            notify: done.into_iter().collect(),
        });
    }

    fn finished(&self) -> bool {
        self.shutdown.is_some() && self.connections.is_empty() && self.connecting.is_empty()
    }

    /// Abort connections that did not close within the grace period. Their
    /// outstanding notifications fail when the tasks are dropped.
    fn force_close(&mut self) {
        warn!(
            "[ConnectionPool] Forcing {} connection(s) closed",
            self.connections.len()
        );
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
        for _ in self.connections.drain() {
            self.metrics.handle_connection_removed();
        }
        self.rotation.clear();
    }

    fn complete_shutdown(mut self) {
        self.events.close();
        while let Ok(event) = self.events.try_recv() {
            if let PoolEvent::Submit(pending) | PoolEvent::Resubmit(pending) = event {
                pending.fail(PushError::ClientClosed);
            }
        }
        for waiter in self.waiters.drain(..) {
            waiter.pending.fail(PushError::ClientClosed);
        }

        if let Some(state) = self.shutdown.take() {
            for done in state.notify {
                let _ = done.send(());
            }
        }
        info!("[ConnectionPool] Shut down");
    }
}
