//! Redpanda event bus implementation for Evently.
//!
//! This crate provides the production [`EventBus`] backed by a
//! Kafka-compatible broker (Redpanda, Apache Kafka, MSK, ...) via rdkafka.
//!
//! # Delivery semantics
//!
//! **At-least-once** with manual offset commits:
//! - Offsets are committed only AFTER an envelope has been handed to the
//!   subscriber's channel; a crash before commit means redelivery
//! - Subscribers dedup by envelope identity via their processed-event ledger
//! - Messages are keyed by **aggregate id**, so every envelope for one
//!   booking or payment lands on the same partition and is consumed in
//!   publish order. Nothing is guaranteed across aggregates or topics.
//!
//! # Example
//!
//! ```no_run
//! use evently_bus::RedpandaEventBus;
//! use evently_core::event_bus::EventBus;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaEventBus::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("payment-service")
//!     .producer_acks("all")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

pub mod config;

pub use config::RedpandaConfig;

use evently_core::envelope::Envelope;
use evently_core::event_bus::{EventBus, EventBusError, EventStream};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Kafka-compatible event bus.
///
/// Built once per service process and passed in explicitly (`Arc<dyn
/// EventBus>`); there is no ambient global bus. Each service configures its
/// own consumer group so that every service receives every envelope while
/// instances of the same service share partitions.
pub struct RedpandaEventBus {
    /// Producer for publishing envelopes.
    producer: FutureProducer,
    /// Broker addresses, kept for creating consumers per subscription.
    brokers: String,
    /// Producer send timeout.
    timeout: Duration,
    /// Consumer group for subscriptions (one per service).
    consumer_group: Option<String>,
    /// Channel capacity between the Kafka consumer task and the subscriber.
    buffer_size: usize,
    /// Where new consumer groups start reading.
    auto_offset_reset: String,
}

impl RedpandaEventBus {
    /// Create a bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot be
    /// created from the given broker list.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a bus from env-driven configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] on invalid configuration.
    pub fn from_config(config: &RedpandaConfig) -> Result<Self, EventBusError> {
        let mut builder = Self::builder()
            .brokers(config.brokers.clone())
            .producer_acks(config.producer_acks.clone())
            .buffer_size(config.buffer_size)
            .auto_offset_reset(config.auto_offset_reset.clone())
            .timeout(Duration::from_millis(config.message_timeout_ms));
        if let Some(group) = &config.consumer_group {
            builder = builder.consumer_group(group.clone());
        }
        builder.build()
    }

    /// Create a new builder for configuring the bus.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// The configured broker list.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for [`RedpandaEventBus`].
#[derive(Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaEventBusBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Producer acknowledgment mode: "0", "1", or "all". Default: "all" -
    /// a publish only counts as durable receipt once replicas have it.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Producer send timeout. Default: 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Consumer group for subscriptions. Each service sets its own group
    /// (e.g. "booking-service") so every service sees every envelope.
    /// If unset, a group is derived from the subscribed topics.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Channel capacity between the consumer task and the subscriber.
    /// Default: 1000.
    #[must_use]
    pub const fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Where new consumer groups start reading: "earliest" or "latest".
    /// Default: "earliest" so a freshly deployed service does not miss
    /// envelopes published before its first subscription.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaEventBus`].
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if brokers are not set or
    /// the producer cannot be created.
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| EventBusError::ConnectionFailed("brokers not configured".to_string()))?;

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", self.producer_acks.as_deref().unwrap_or("all"))
            .set(
                "compression.type",
                self.compression.as_deref().unwrap_or("none"),
            );

        let producer: FutureProducer = producer_config.create().map_err(|e| {
            EventBusError::ConnectionFailed(format!("failed to create producer: {e}"))
        })?;

        tracing::info!(
            brokers = %brokers,
            acks = self.producer_acks.as_deref().unwrap_or("all"),
            consumer_group = self.consumer_group.as_deref().unwrap_or("<derived>"),
            "Redpanda event bus created"
        );

        Ok(RedpandaEventBus {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            consumer_group: self.consumer_group,
            buffer_size: self.buffer_size.unwrap_or(1000),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "earliest".to_string()),
        })
    }
}

impl EventBus for RedpandaEventBus {
    fn publish(
        &self,
        topic: &str,
        key: &str,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let key = key.to_string();
        let envelope = envelope.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let payload = envelope
                .to_bytes()
                .map_err(|e| EventBusError::PublishFailed {
                    topic: topic.clone(),
                    reason: e.to_string(),
                })?;

            // Key by aggregate id: all envelopes for one booking/payment
            // land on the same partition and stay ordered.
            let record = FutureRecord::to(&topic).payload(&payload).key(&key);

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        key = %key,
                        partition,
                        offset,
                        event_type = %envelope.event_type,
                        "envelope published"
                    );
                    metrics::counter!("bus.published", "topic" => topic).increment(1);
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %topic,
                        key = %key,
                        error = %kafka_error,
                        "publish failed"
                    );
                    metrics::counter!("bus.publish_failures", "topic" => topic.clone())
                        .increment(1);
                    Err(EventBusError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let brokers = self.brokers.clone();
        let consumer_group = self.consumer_group.clone();
        let buffer_size = self.buffer_size;
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            let consumer_group_id = consumer_group.unwrap_or_else(|| {
                let mut sorted_topics = topics.clone();
                sorted_topics.sort();
                format!("evently-{}", sorted_topics.join("-"))
            });

            // Manual commit: offsets advance only after delivery to the
            // subscriber channel, which is what makes this at-least-once.
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("failed to subscribe: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %consumer_group_id,
                "subscribed to event bus"
            );

            let (tx, rx) = tokio::sync::mpsc::channel(buffer_size);

            tokio::spawn(async move {
                use futures::StreamExt;
                use rdkafka::consumer::CommitMode;

                let mut stream = consumer.stream();

                while let Some(msg_result) = stream.next().await {
                    match msg_result {
                        Ok(message) => {
                            let event_result = match message.payload() {
                                Some(payload) => Envelope::from_bytes(payload).map_err(|e| {
                                    EventBusError::DeserializationFailed(e.to_string())
                                }),
                                None => Err(EventBusError::DeserializationFailed(
                                    "message has no payload".to_string(),
                                )),
                            };

                            let is_decoded = event_result.is_ok();
                            if tx.send(event_result).await.is_err() {
                                // Receiver dropped; exit WITHOUT committing so
                                // the envelope is redelivered to a successor.
                                tracing::debug!("subscriber dropped, consumer task exiting");
                                break;
                            }

                            if is_decoded {
                                metrics::counter!(
                                    "bus.consumed",
                                    "topic" => message.topic().to_string()
                                )
                                .increment(1);
                            }

                            // Commit AFTER delivery to the channel.
                            if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                                tracing::warn!(
                                    topic = message.topic(),
                                    partition = message.partition(),
                                    offset = message.offset(),
                                    error = %e,
                                    "offset commit failed (envelope may be redelivered)"
                                );
                            }
                        }
                        Err(e) => {
                            let err =
                                EventBusError::TransportError(format!("receive failed: {e}"));
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                        }
                    }
                }

                tracing::debug!("consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as EventStream)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redpanda_event_bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaEventBus>();
        assert_sync::<RedpandaEventBus>();
    }

    #[test]
    fn builder_requires_brokers() {
        assert!(RedpandaEventBus::builder().build().is_err());
    }
}
