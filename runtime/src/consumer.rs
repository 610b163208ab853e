//! Generic event consumer with keyed workers, retries, and dead-lettering.
//!
//! Every Evently service consumes its topics through an [`EventConsumer`]:
//! a subscribe-process-reconnect loop that owns all the infrastructure
//! concerns so handlers contain only domain logic.
//!
//! # Processing model
//!
//! ```text
//! loop {
//!     subscribe to topics
//!     for each envelope:
//!         route to worker[hash(partition_key) % workers]
//!             handler.handle(envelope)        // retried with backoff
//!             on exhausted budget: dead-letter
//!     on stream end or subscribe failure: wait and reconnect
//!     on shutdown signal: drain in-flight workers, exit
//! }
//! ```
//!
//! # Ordering
//!
//! Envelopes are routed to workers by hashing the partition key (aggregate
//! id), so two envelopes for the same booking or payment are never handled
//! concurrently - the per-aggregate ordering the bus provides survives the
//! worker pool. Distinct aggregates fan out across the pool (3 workers by
//! default, matching a typical listener concurrency).
//!
//! # Failure policy
//!
//! A handler error does not acknowledge anything to the handler's own
//! state: retryable errors (transient infrastructure) are retried with
//! exponential backoff; non-retryable errors and exhausted budgets park the
//! envelope in the [`DeadLetterQueue`] so a poison message cannot wedge its
//! partition forever.

use crate::dead_letter::DeadLetterQueue;
use crate::retry::{RetryPolicy, retry_if};
use chrono::Utc;
use evently_core::DomainError;
use evently_core::envelope::Envelope;
use evently_core::event_bus::EventBus;
use futures::StreamExt;
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

/// A domain handler invoked once per delivered envelope.
///
/// Implementations must be idempotent: the bus delivers at-least-once and
/// the consumer redelivers on retryable failures. Returning `Ok(())` for an
/// envelope the service has already applied (ledger hit) is the expected
/// way to absorb duplicates.
pub trait EventHandler: Send + Sync {
    /// Handle one envelope.
    ///
    /// # Errors
    ///
    /// Return a retryable [`DomainError`] (`TransientInfra`) to trigger
    /// redelivery with backoff; any other error parks the envelope.
    fn handle(
        &self,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), DomainError>> + Send + '_>>;
}

/// Generic event bus consumer.
///
/// Construct via [`EventConsumer::builder`], then [`spawn`](Self::spawn) as
/// a background task. The consumer runs until a shutdown signal arrives,
/// draining in-flight handlers before it exits.
pub struct EventConsumer {
    name: String,
    topics: Vec<String>,
    event_bus: Arc<dyn EventBus>,
    handler: Arc<dyn EventHandler>,
    dead_letters: Arc<dyn DeadLetterQueue>,
    shutdown: broadcast::Receiver<()>,
    workers: usize,
    retry_policy: RetryPolicy,
    reconnect_delay: Duration,
}

impl EventConsumer {
    /// Create a builder for configuring a consumer.
    #[must_use]
    pub fn builder() -> EventConsumerBuilder {
        EventConsumerBuilder::default()
    }

    /// Spawn the consumer as a background task.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the subscribe-process-reconnect loop.
    pub async fn run(&mut self) {
        info!(consumer = %self.name, topics = ?self.topics, "event consumer started");

        loop {
            let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();

            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "shutdown signal received");
                    break;
                }
                subscribed = self.event_bus.subscribe(&topics) => {
                    match subscribed {
                        Ok(stream) => {
                            let finished = self.dispatch(stream).await;
                            if finished {
                                break;
                            }
                            warn!(
                                consumer = %self.name,
                                "event stream ended, reconnecting in {:?}",
                                self.reconnect_delay
                            );
                            tokio::time::sleep(self.reconnect_delay).await;
                        }
                        Err(e) => {
                            error!(
                                consumer = %self.name,
                                error = %e,
                                "subscription failed, retrying in {:?}",
                                self.reconnect_delay
                            );
                            tokio::time::sleep(self.reconnect_delay).await;
                        }
                    }
                }
            }
        }

        info!(consumer = %self.name, "event consumer stopped");
    }

    /// Route envelopes from the stream into the worker pool until the
    /// stream ends or shutdown is signalled. Returns `true` on shutdown.
    async fn dispatch(&mut self, mut stream: evently_core::event_bus::EventStream) -> bool {
        let (senders, handles) = self.spawn_workers();

        let finished = loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "shutdown during dispatch, draining workers");
                    break true;
                }
                next = stream.next() => {
                    match next {
                        Some(Ok(envelope)) => {
                            let slot = Self::worker_for(&envelope, senders.len());
                            if senders[slot].send(envelope).await.is_err() {
                                error!(consumer = %self.name, "worker channel closed unexpectedly");
                                break false;
                            }
                        }
                        Some(Err(e)) => {
                            // Transport/decoding errors surface in-stream;
                            // log and keep reading.
                            error!(consumer = %self.name, error = %e, "event stream error");
                        }
                        None => break false,
                    }
                }
            }
        };

        // Drop senders so workers see end-of-queue, then drain in-flight
        // handlers before releasing the subscription.
        drop(senders);
        for handle in handles {
            let _ = handle.await;
        }

        finished
    }

    fn spawn_workers(
        &self,
    ) -> (
        Vec<mpsc::Sender<Envelope>>,
        Vec<tokio::task::JoinHandle<()>>,
    ) {
        let mut senders = Vec::with_capacity(self.workers);
        let mut handles = Vec::with_capacity(self.workers);

        for slot in 0..self.workers {
            let (tx, mut rx) = mpsc::channel::<Envelope>(64);
            let handler = Arc::clone(&self.handler);
            let dead_letters = Arc::clone(&self.dead_letters);
            let policy = self.retry_policy.clone();
            let name = self.name.clone();

            handles.push(tokio::spawn(async move {
                while let Some(envelope) = rx.recv().await {
                    Self::process(&name, slot, &*handler, &*dead_letters, &policy, envelope)
                        .await;
                }
            }));
            senders.push(tx);
        }

        (senders, handles)
    }

    /// Handle one envelope: bounded retries for transient errors, then the
    /// dead-letter queue. Never panics, never blocks the partition forever.
    async fn process(
        consumer: &str,
        worker: usize,
        handler: &dyn EventHandler,
        dead_letters: &dyn DeadLetterQueue,
        policy: &RetryPolicy,
        envelope: Envelope,
    ) {
        let outcome = retry_if(
            policy,
            || handler.handle(&envelope),
            DomainError::is_retryable,
        )
        .await;

        match outcome {
            Ok(()) => {
                tracing::debug!(
                    consumer,
                    worker,
                    event_type = %envelope.event_type,
                    aggregate_id = %envelope.aggregate_id,
                    sequence = envelope.sequence,
                    "envelope handled"
                );
                metrics::counter!("consumer.handled", "consumer" => consumer.to_string())
                    .increment(1);
            }
            Err(e) => {
                error!(
                    consumer,
                    worker,
                    event_type = %envelope.event_type,
                    aggregate_id = %envelope.aggregate_id,
                    error = %e,
                    "handler failed, parking envelope"
                );
                metrics::counter!("consumer.parked", "consumer" => consumer.to_string())
                    .increment(1);
                dead_letters.park(envelope, e.to_string(), policy.max_retries + 1, Utc::now());
            }
        }
    }

    fn worker_for(envelope: &Envelope, workers: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        envelope.partition_key().hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation)]
        {
            (hasher.finish() % workers as u64) as usize
        }
    }
}

/// Builder for [`EventConsumer`].
#[derive(Default)]
pub struct EventConsumerBuilder {
    name: Option<String>,
    topics: Option<Vec<String>>,
    event_bus: Option<Arc<dyn EventBus>>,
    handler: Option<Arc<dyn EventHandler>>,
    dead_letters: Option<Arc<dyn DeadLetterQueue>>,
    shutdown: Option<broadcast::Receiver<()>>,
    workers: Option<usize>,
    retry_policy: Option<RetryPolicy>,
    reconnect_delay: Option<Duration>,
}

impl EventConsumerBuilder {
    /// Consumer name, used in logs and metrics.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Topics to subscribe to.
    #[must_use]
    pub fn topics(mut self, topics: Vec<String>) -> Self {
        self.topics = Some(topics);
        self
    }

    /// Event bus to consume from.
    #[must_use]
    pub fn event_bus(mut self, event_bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Handler invoked per envelope.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Dead-letter queue for poison envelopes.
    #[must_use]
    pub fn dead_letters(mut self, dead_letters: Arc<dyn DeadLetterQueue>) -> Self {
        self.dead_letters = Some(dead_letters);
        self
    }

    /// Shutdown signal receiver.
    #[must_use]
    pub fn shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Number of handler workers (default 3). Envelopes sharing a partition
    /// key always land on the same worker.
    #[must_use]
    pub const fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Per-envelope retry policy (default: 3 retries).
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Delay before re-subscribing after a stream failure (default 5s).
    #[must_use]
    pub const fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = Some(delay);
        self
    }

    /// Build the [`EventConsumer`].
    ///
    /// # Panics
    ///
    /// Panics if a required field (name, topics, `event_bus`, handler,
    /// `dead_letters`, shutdown) is missing.
    #[must_use]
    #[allow(clippy::expect_used)] // builder misuse, not a runtime condition
    pub fn build(self) -> EventConsumer {
        let workers = self.workers.unwrap_or(3).max(1);
        EventConsumer {
            name: self.name.expect("name is required"),
            topics: self.topics.expect("topics are required"),
            event_bus: self.event_bus.expect("event_bus is required"),
            handler: self.handler.expect("handler is required"),
            dead_letters: self.dead_letters.expect("dead_letters is required"),
            shutdown: self.shutdown.expect("shutdown is required"),
            workers,
            retry_policy: self.retry_policy.unwrap_or_default(),
            reconnect_delay: self.reconnect_delay.unwrap_or(Duration::from_secs(5)),
        }
    }
}
