//! Reconnect backoff

use std::time::Duration;

use crate::config::BackoffConfig;

/// Delay before the next connection attempt. Doubles on each consecutive
/// failure up to a cap and drops back to the initial delay after a success.
#[derive(Debug, Clone)]
pub struct ConnectBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl ConnectBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            initial: config.initial,
            max: config.max,
            current: config.initial,
        }
    }

    /// Delay to use without recording a failure
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Delay after a failed attempt; the following one will be twice as long
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self
            .current
            .checked_mul(2)
            .unwrap_or(self.max)
            .min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
