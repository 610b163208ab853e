//! Outbox: staged envelopes bridging the dual-write gap.
//!
//! A service cannot atomically write its own state *and* publish to the bus.
//! The accepted risk is a crash between the two; the mitigation is this
//! outbox. Staging an envelope happens inside the same critical section as
//! the state mutation, so a staged-but-unpublished envelope is durable
//! evidence that a publish is owed. The service publishes immediately after
//! releasing the lock and marks success; a periodic sweep re-publishes
//! anything whose marker still lags.
//!
//! The outbox also owns per-aggregate sequence assignment, since sequences
//! must be allocated under the same lock as the mutation that produces the
//! event.

use crate::contracts::EventPayload;
use crate::envelope::{Envelope, EventIdentity, ServiceName};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// A staged envelope with its publish marker.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    /// The staged envelope.
    pub envelope: Envelope,
    /// Whether a broker ack has been observed for this envelope.
    pub published: bool,
    /// When the envelope was staged.
    pub staged_at: DateTime<Utc>,
}

/// Per-service outbox of staged envelopes.
#[derive(Debug, Default, Clone)]
pub struct Outbox {
    producer_sequences: HashMap<Uuid, u64>,
    entries: Vec<OutboxEntry>,
}

impl Outbox {
    /// Creates an empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a payload for publication: assigns the next per-aggregate
    /// sequence, wraps the payload in an envelope, and records it as
    /// unpublished. Returns a clone of the envelope for the immediate
    /// publish attempt.
    ///
    /// Must be called inside the same critical section as the state
    /// mutation the event describes.
    pub fn stage(
        &mut self,
        producer: ServiceName,
        payload: EventPayload,
        now: DateTime<Utc>,
    ) -> Envelope {
        let aggregate_id = payload.aggregate_id();
        let sequence = self
            .producer_sequences
            .entry(aggregate_id)
            .and_modify(|s| *s += 1)
            .or_insert(1);
        let envelope = Envelope::new(producer, *sequence, now, payload);
        self.entries.push(OutboxEntry {
            envelope: envelope.clone(),
            published: false,
            staged_at: now,
        });
        envelope
    }

    /// Mark an envelope as acknowledged by the broker.
    pub fn mark_published(&mut self, identity: &EventIdentity) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.envelope.identity() == *identity)
        {
            entry.published = true;
        }
    }

    /// Envelopes staged before `cutoff` whose publish marker still lags.
    /// These are the sweep candidates: either the original publish failed or
    /// the process died between staging and the ack.
    #[must_use]
    pub fn unpublished_before(&self, cutoff: DateTime<Utc>) -> Vec<Envelope> {
        self.entries
            .iter()
            .filter(|e| !e.published && e.staged_at <= cutoff)
            .map(|e| e.envelope.clone())
            .collect()
    }

    /// All envelopes whose publish marker lags, regardless of age.
    #[must_use]
    pub fn unpublished(&self) -> Vec<Envelope> {
        self.entries
            .iter()
            .filter(|e| !e.published)
            .map(|e| e.envelope.clone())
            .collect()
    }

    /// Drop published entries older than `cutoff` to bound memory.
    pub fn compact(&mut self, cutoff: DateTime<Utc>) {
        self.entries
            .retain(|e| !e.published || e.staged_at > cutoff);
    }

    /// Number of staged entries (published or not).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the outbox holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
