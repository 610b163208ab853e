//! The envelope: the unit flowing through the event bus.
//!
//! An envelope wraps a [`EventPayload`](crate::contracts::EventPayload) with
//! the metadata consumers need to deduplicate and order it: the versioned
//! event type, the emitting service, the aggregate id, and a per-aggregate
//! sequence number assigned by the producer's outbox.
//!
//! Envelope identity for dedup is `(event_type, aggregate_id, sequence)` -
//! see [`EventIdentity`]. Transport encoding is bincode.

use crate::contracts::EventPayload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Errors for envelope encoding and decoding.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize an envelope to bytes.
    #[error("failed to serialize envelope: {0}")]
    SerializationError(String),

    /// Failed to deserialize an envelope from bytes.
    #[error("failed to deserialize envelope: {0}")]
    DeserializationError(String),
}

/// The service that emitted an envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceName {
    /// The booking service.
    Booking,
    /// The payment service.
    Payment,
    /// The notification service.
    Notification,
}

impl ServiceName {
    /// Stable string form, used as consumer group prefix and in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Booking => "booking",
            Self::Payment => "payment",
            Self::Notification => "notification",
        }
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity of an envelope for deduplication.
///
/// Two envelopes with the same identity are the same fact; a consumer that
/// has recorded one identity in its ledger must treat redeliveries as
/// no-ops.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventIdentity {
    /// Versioned event type (e.g. `PaymentSucceeded.v1`).
    pub event_type: String,
    /// Aggregate the event belongs to.
    pub aggregate_id: Uuid,
    /// Per-aggregate sequence number.
    pub sequence: u64,
}

impl fmt::Display for EventIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{}@{}",
            self.event_type, self.aggregate_id, self.sequence
        )
    }
}

/// The structured message unit carried on the event bus.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Versioned event type identifier.
    pub event_type: String,
    /// Service that emitted this envelope.
    pub producer: ServiceName,
    /// Aggregate (booking or payment) id; also the partition key.
    pub aggregate_id: Uuid,
    /// Monotonic per-aggregate sequence, assigned by the producer's outbox.
    pub sequence: u64,
    /// When the fact was recorded by the producer.
    pub occurred_at: DateTime<Utc>,
    /// The typed payload.
    pub payload: EventPayload,
}

impl Envelope {
    /// Build an envelope for a payload. Event type, aggregate id and topic
    /// are derived from the payload itself so they cannot disagree.
    #[must_use]
    pub fn new(
        producer: ServiceName,
        sequence: u64,
        occurred_at: DateTime<Utc>,
        payload: EventPayload,
    ) -> Self {
        Self {
            event_type: payload.event_type().to_string(),
            producer,
            aggregate_id: payload.aggregate_id(),
            sequence,
            occurred_at,
            payload,
        }
    }

    /// Dedup identity of this envelope.
    #[must_use]
    pub fn identity(&self) -> EventIdentity {
        EventIdentity {
            event_type: self.event_type.clone(),
            aggregate_id: self.aggregate_id,
            sequence: self.sequence,
        }
    }

    /// The topic this envelope belongs on.
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        self.payload.topic()
    }

    /// Partition key for the bus: the aggregate id, so one aggregate's
    /// events are delivered in order.
    #[must_use]
    pub fn partition_key(&self) -> String {
        self.aggregate_id.to_string()
    }

    /// Serialize to bincode bytes for transport.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EventError> {
        bincode::serialize(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Deserialize from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::DeserializationError`] if the bytes are not a
    /// valid envelope.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EventError> {
        bincode::deserialize(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Envelope {{ type: {}, producer: {}, aggregate: {}, seq: {} }}",
            self.event_type, self.producer, self.aggregate_id, self.sequence
        )
    }
}
