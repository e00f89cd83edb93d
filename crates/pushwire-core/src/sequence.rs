//! Id sequences
//!
//! Each client owns its own sequences and hands them to the components that
//! need them, so ids are unique per client without any process-wide counter.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic id generator starting at 1
#[derive(Debug)]
pub struct IdSequence {
    next: AtomicU64,
}

impl IdSequence {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdSequence {
    fn default() -> Self {
        Self::new()
    }
}
