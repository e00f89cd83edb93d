//! Idle keep-alive pings

use std::sync::Arc;
use std::time::Duration;

use h2::{Ping, PingPong};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::debug;

/// Last time a connection carried traffic
pub(crate) struct Activity {
    last: Mutex<Instant>,
}

impl Activity {
    pub(crate) fn new() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
        }
    }

    pub(crate) fn touch(&self) {
        *self.last.lock() = Instant::now();
    }

    pub(crate) fn last(&self) -> Instant {
        *self.last.lock()
    }
}

/// Ping the gateway whenever the connection has been idle for `interval`.
/// Reports on `failed` and returns if a ping errors or goes unanswered for
/// another full interval.
pub(crate) async fn keep_alive(
    name: String,
    mut ping_pong: PingPong,
    interval: Duration,
    activity: Arc<Activity>,
    failed: oneshot::Sender<String>,
) {
    loop {
        let idle_deadline = activity.last() + interval;
        if Instant::now() < idle_deadline {
            sleep_until(idle_deadline).await;
            continue;
        }

        match timeout(interval, ping_pong.ping(Ping::opaque())).await {
            Ok(Ok(_)) => {
                debug!(connection = %name, "[KeepAlive] Pong received");
                activity.touch();
            }
            Ok(Err(e)) => {
                let _ = failed.send(format!("ping failed: {}", e));
                return;
            }
            Err(_) => {
                let _ = failed.send(format!("no ping reply within {:?}", interval));
                return;
            }
        }
    }
}
