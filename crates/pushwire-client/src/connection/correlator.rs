//! Stream correlator
//!
//! Maps HTTP/2 stream ids on one connection to the notifications written on
//! them. A slot exists from the moment its notification is written until its
//! response is processed or the connection is discarded.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use pushwire_core::{PushError, PushNotificationResponse, RejectionReason};
use uuid::Uuid;

use super::pending::PendingNotification;

/// A stream id was registered that is not above every id seen before.
/// Carries the notification back so the caller can fail it.
pub(crate) struct StreamIdReused {
    pub(crate) stream_id: u32,
    pub(crate) pending: PendingNotification,
}

#[derive(Default)]
pub(crate) struct StreamCorrelator {
    slots: HashMap<u32, PendingNotification>,
    highest_stream_id: u32,
}

impl StreamCorrelator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Stream ids are assigned in increasing order and never reused within a
    /// connection, so anything at or below the highest id seen is an error.
    pub(crate) fn register(
        &mut self,
        stream_id: u32,
        pending: PendingNotification,
    ) -> Result<(), StreamIdReused> {
        if stream_id <= self.highest_stream_id || self.slots.contains_key(&stream_id) {
            return Err(StreamIdReused { stream_id, pending });
        }

        self.highest_stream_id = stream_id;
        self.slots.insert(stream_id, pending);
        Ok(())
    }

    /// Remove a slot without resolving it, e.g. to resend its notification
    pub(crate) fn take(&mut self, stream_id: u32) -> Option<PendingNotification> {
        self.slots.remove(&stream_id)
    }

    /// Returns `false` if the stream is unknown (its notification may
    /// already have been failed out from under the connection).
    pub(crate) fn resolve_accepted(
        &mut self,
        stream_id: u32,
        status: u16,
        apns_id: Option<Uuid>,
        apns_unique_id: Option<Uuid>,
    ) -> bool {
        let Some(pending) = self.slots.remove(&stream_id) else {
            return false;
        };

        let response = PushNotificationResponse::accepted(
            pending.notification().clone(),
            status,
            apns_id,
            apns_unique_id,
        );
        pending.complete(Ok(response));
        true
    }

    pub(crate) fn resolve_rejected(
        &mut self,
        stream_id: u32,
        status: u16,
        apns_id: Option<Uuid>,
        reason: Option<RejectionReason>,
        token_invalidation_timestamp: Option<DateTime<Utc>>,
    ) -> bool {
        let Some(pending) = self.slots.remove(&stream_id) else {
            return false;
        };

        let response = PushNotificationResponse::rejected(
            pending.notification().clone(),
            status,
            apns_id,
            reason,
            token_invalidation_timestamp,
        );
        pending.complete(Ok(response));
        true
    }

    pub(crate) fn fail(&mut self, stream_id: u32, error: PushError) -> bool {
        match self.slots.remove(&stream_id) {
            Some(pending) => {
                pending.fail(error);
                true
            }
            None => false,
        }
    }

    /// Fail every remaining slot with a retryable error. Whether the gateway
    /// processed these is unknown, so they are never assumed delivered.
    pub(crate) fn drain_on_connection_loss(&mut self) -> usize {
        let drained = self.slots.len();
        for (_, pending) in self.slots.drain() {
            pending.fail(PushError::StreamClosedBeforeReply);
        }
        drained
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[cfg(test)]
    fn notification_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.slots.values().map(PendingNotification::id).collect();
        ids.sort_unstable();
        ids
    }
}
