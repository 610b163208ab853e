//! Event bus abstraction for cross-service communication.
//!
//! This module provides the [`EventBus`] trait for publishing and subscribing
//! to envelopes across service boundaries. Every cross-service hop in the
//! saga is mediated by the bus; no service calls another synchronously for a
//! state change.
//!
//! # Key principles
//!
//! - **State first**: a service records its own state mutation (and ledger
//!   entry) before publishing; publish is a separate, possibly-failing step
//!   covered by the outbox sweep
//! - **At-least-once delivery**: the same envelope may arrive more than once
//! - **Ordered per partition key**: envelopes sharing a key (aggregate id)
//!   arrive in publish order; nothing is guaranteed across keys or topics
//! - **Idempotency**: consumers must dedup via the processed-event ledger
//!
//! # Implementations
//!
//! - `RedpandaEventBus` (`evently-bus`) - production, Kafka-compatible
//! - `InMemoryEventBus` (`evently-testing`) - tests, with duplicate and
//!   reorder injection
//!
//! # Dyn compatibility
//!
//! The trait uses explicit `Pin<Box<dyn Future>>` returns instead of
//! `async fn` so it can be used as a trait object (`Arc<dyn EventBus>`) and
//! passed into services as an explicitly constructed dependency - there is
//! no ambient global bus.

use crate::envelope::Envelope;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the event bus.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an envelope to a topic.
    #[error("publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed.
        topic: String,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to subscribe to topics.
    #[error("subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe.
        topics: Vec<String>,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to decode an envelope off the wire.
    #[error("deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Network or transport error.
    #[error("transport error: {0}")]
    TransportError(String),
}

/// Stream of envelopes from a subscription.
///
/// Each item is a `Result` because transport and decoding errors surface
/// in-stream; a consumer logs them and keeps reading.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Envelope, EventBusError>> + Send>>;

/// Trait for event bus implementations.
///
/// # Thread safety
///
/// Implementations must be `Send + Sync`; services hold the bus behind
/// `Arc<dyn EventBus>` and publish from multiple handler workers at once.
pub trait EventBus: Send + Sync {
    /// Publish an envelope to a topic.
    ///
    /// The future resolves once the broker has acknowledged durable receipt.
    /// Delivery downstream is at-least-once; consumers dedup by envelope
    /// identity.
    ///
    /// # Arguments
    ///
    /// - `topic`: the topic to publish to (e.g. `payment.success`)
    /// - `key`: the partition key; envelopes sharing a key stay ordered.
    ///   Always the aggregate id here.
    /// - `envelope`: the envelope to publish
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the broker does not
    /// acknowledge the write. The caller's outbox keeps the envelope staged
    /// for the sweep to retry.
    fn publish(
        &self,
        topic: &str,
        key: &str,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Subscribe to one or more topics and receive a stream of envelopes.
    ///
    /// The consumer group is part of the bus configuration (one group per
    /// service), so multiple instances of the same service share the
    /// workload while every distinct service sees every envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if the subscription
    /// cannot be established.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>>;
}
