//! In-memory event bus for tests.
//!
//! Mirrors the observable semantics of the Redpanda bus: every subscriber
//! whose topic set covers a topic receives each envelope in publish order,
//! and a fresh subscription first replays history (the production bus runs
//! with the earliest offset-reset policy). On top of that, the fault
//! injection the saga tests need:
//!
//! - **Duplicate delivery**: deliver every envelope twice, exercising the
//!   processed-event ledger
//! - **Out-of-order injection**: [`InMemoryEventBus::inject`] hand-delivers
//!   an envelope to subscribers without recording it, so tests can simulate
//!   reordered cross-topic arrival
//! - **Publish failures**: fail the next N publishes, exercising the outbox
//!   sweep

use evently_core::envelope::Envelope;
use evently_core::event_bus::{EventBus, EventBusError, EventStream};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;

struct Subscriber {
    topics: HashSet<String>,
    tx: mpsc::UnboundedSender<Result<Envelope, EventBusError>>,
}

/// In-memory [`EventBus`] with fault injection.
#[derive(Default)]
pub struct InMemoryEventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    published: Mutex<Vec<(String, Envelope)>>,
    duplicate_delivery: AtomicBool,
    failing_publishes: AtomicUsize,
}

impl InMemoryEventBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver every subsequent publish twice, simulating at-least-once
    /// redelivery.
    pub fn enable_duplicate_delivery(&self) {
        self.duplicate_delivery.store(true, Ordering::SeqCst);
    }

    /// Fail the next `n` publish calls with a transport error.
    pub fn fail_next_publishes(&self, n: usize) {
        self.failing_publishes.store(n, Ordering::SeqCst);
    }

    /// Hand-deliver an envelope to current subscribers without recording it
    /// in the publish log. Lets tests simulate duplicates and reordering
    /// that the production broker could produce.
    pub fn inject(&self, topic: &str, envelope: &Envelope) {
        self.deliver(topic, envelope);
    }

    /// Envelopes published on a topic, in publish order.
    #[must_use]
    pub fn published_on(&self, topic: &str) -> Vec<Envelope> {
        self.with_published(|log| {
            log.iter()
                .filter(|(t, _)| t == topic)
                .map(|(_, e)| e.clone())
                .collect()
        })
    }

    /// Total number of successfully published envelopes.
    #[must_use]
    pub fn published_count(&self) -> usize {
        self.with_published(Vec::len)
    }

    fn with_published<T>(&self, f: impl FnOnce(&Vec<(String, Envelope)>) -> T) -> T {
        let guard = self
            .published
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&guard)
    }

    fn deliver(&self, topic: &str, envelope: &Envelope) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        subscribers.retain(|s| {
            if s.topics.contains(topic) {
                s.tx.send(Ok(envelope.clone())).is_ok()
            } else {
                !s.tx.is_closed()
            }
        });
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        key: &str,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let envelope = envelope.clone();
        let _ = key; // ordering is global here, which is stronger than per-key

        Box::pin(async move {
            let failing = self.failing_publishes.load(Ordering::SeqCst);
            if failing > 0
                && self
                    .failing_publishes
                    .compare_exchange(failing, failing - 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                return Err(EventBusError::PublishFailed {
                    topic,
                    reason: "injected publish failure".to_string(),
                });
            }

            {
                let mut log = self
                    .published
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                log.push((topic.clone(), envelope.clone()));
            }

            self.deliver(&topic, &envelope);
            if self.duplicate_delivery.load(Ordering::SeqCst) {
                self.deliver(&topic, &envelope);
            }
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: HashSet<String> = topics.iter().map(|s| (*s).to_string()).collect();

        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();

            // Replay history first: a fresh consumer group starts from the
            // earliest offset, like the production bus is configured to.
            let backlog = self.with_published(|log| {
                log.iter()
                    .filter(|(t, _)| topics.contains(t))
                    .map(|(_, e)| e.clone())
                    .collect::<Vec<_>>()
            });
            for envelope in backlog {
                let _ = tx.send(Ok(envelope));
            }

            {
                let mut subscribers = self
                    .subscribers
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                subscribers.push(Subscriber { topics, tx });
            }

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(item) = rx.recv().await {
                    yield item;
                }
            };

            Ok(Box::pin(stream) as EventStream)
        })
    }
}
