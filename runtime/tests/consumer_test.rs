//! Integration tests for the event consumer: worker routing, retry,
//! dead-lettering, and shutdown draining against the in-memory bus.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::Utc;
use evently_core::DomainError;
use evently_core::contracts::{BookingCreated, EventPayload, topics};
use evently_core::envelope::{Envelope, ServiceName};
use evently_core::event_bus::EventBus;
use evently_core::ids::{BookingId, EventId, UserId};
use evently_runtime::consumer::{EventConsumer, EventHandler};
use evently_runtime::dead_letter::{DeadLetterQueue, InMemoryDeadLetterQueue};
use evently_runtime::retry::RetryPolicy;
use evently_testing::InMemoryEventBus;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Records handled envelopes; fails envelopes whose aggregate is poisoned.
struct RecordingHandler {
    seen: Mutex<Vec<(uuid::Uuid, u64)>>,
    poison: Option<BookingId>,
}

impl RecordingHandler {
    fn new() -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            poison: None,
        }
    }

    fn poisoned(booking_id: BookingId) -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            poison: Some(booking_id),
        }
    }

    fn seen(&self) -> Vec<(uuid::Uuid, u64)> {
        self.seen.lock().unwrap().clone()
    }
}

impl EventHandler for RecordingHandler {
    fn handle(
        &self,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), DomainError>> + Send + '_>> {
        let aggregate = envelope.aggregate_id;
        let sequence = envelope.sequence;
        Box::pin(async move {
            if let Some(poison) = &self.poison {
                if *poison.as_uuid() == aggregate {
                    return Err(DomainError::validation("poison envelope"));
                }
            }
            self.seen.lock().unwrap().push((aggregate, sequence));
            Ok(())
        })
    }
}

fn created(booking_id: BookingId, seq: u64) -> Envelope {
    Envelope::new(
        ServiceName::Booking,
        seq,
        Utc::now(),
        EventPayload::BookingCreated(BookingCreated {
            booking_id,
            user_id: UserId::new(),
            event_id: EventId::new(),
            seats: 1,
        }),
    )
}

async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn consumer_routes_same_aggregate_in_order() {
    let bus = Arc::new(InMemoryEventBus::new());
    let handler = Arc::new(RecordingHandler::new());
    let dlq = Arc::new(InMemoryDeadLetterQueue::new());
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let consumer = EventConsumer::builder()
        .name("test-consumer")
        .topics(vec![topics::BOOKING_CREATED.to_string()])
        .event_bus(Arc::clone(&bus) as Arc<dyn EventBus>)
        .handler(Arc::clone(&handler) as Arc<dyn EventHandler>)
        .dead_letters(Arc::clone(&dlq) as Arc<dyn DeadLetterQueue>)
        .shutdown(shutdown_rx)
        .workers(3)
        .build();
    let handle = consumer.spawn();

    // Give the consumer time to subscribe before publishing.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let booking = BookingId::new();
    for seq in 1..=5 {
        let envelope = created(booking, seq);
        bus.publish(topics::BOOKING_CREATED, &envelope.partition_key(), &envelope)
            .await
            .unwrap();
    }

    assert!(wait_until(Duration::from_secs(2), || handler.seen().len() == 5).await);

    // Same partition key means same worker means preserved order.
    let sequences: Vec<u64> = handler
        .seen()
        .iter()
        .filter(|(agg, _)| *agg == *booking.as_uuid())
        .map(|(_, seq)| *seq)
        .collect();
    assert_eq!(sequences, vec![1, 2, 3, 4, 5]);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn non_retryable_failure_is_dead_lettered() {
    let bus = Arc::new(InMemoryEventBus::new());
    let poison = BookingId::new();
    let handler = Arc::new(RecordingHandler::poisoned(poison));
    let dlq = Arc::new(InMemoryDeadLetterQueue::new());
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let consumer = EventConsumer::builder()
        .name("test-consumer")
        .topics(vec![topics::BOOKING_CREATED.to_string()])
        .event_bus(Arc::clone(&bus) as Arc<dyn EventBus>)
        .handler(Arc::clone(&handler) as Arc<dyn EventHandler>)
        .dead_letters(Arc::clone(&dlq) as Arc<dyn DeadLetterQueue>)
        .shutdown(shutdown_rx)
        .retry_policy(RetryPolicy::no_retries())
        .build();
    let handle = consumer.spawn();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let bad = created(poison, 1);
    let good = created(BookingId::new(), 1);
    bus.publish(topics::BOOKING_CREATED, &bad.partition_key(), &bad)
        .await
        .unwrap();
    bus.publish(topics::BOOKING_CREATED, &good.partition_key(), &good)
        .await
        .unwrap();

    // The poison envelope is parked; the healthy one is still handled.
    assert!(wait_until(Duration::from_secs(2), || dlq.count_pending() == 1).await);
    assert!(wait_until(Duration::from_secs(2), || handler.seen().len() == 1).await);

    let parked = dlq.pending();
    assert_eq!(parked[0].envelope.aggregate_id, *poison.as_uuid());
    assert!(parked[0].error_message.contains("poison"));

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn shutdown_stops_the_consumer() {
    let bus = Arc::new(InMemoryEventBus::new());
    let handler = Arc::new(RecordingHandler::new());
    let dlq = Arc::new(InMemoryDeadLetterQueue::new());
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let consumer = EventConsumer::builder()
        .name("test-consumer")
        .topics(vec![topics::BOOKING_CREATED.to_string()])
        .event_bus(Arc::clone(&bus) as Arc<dyn EventBus>)
        .handler(Arc::clone(&handler) as Arc<dyn EventHandler>)
        .dead_letters(Arc::clone(&dlq) as Arc<dyn DeadLetterQueue>)
        .shutdown(shutdown_rx)
        .build();
    let handle = consumer.spawn();
    tokio::time::sleep(Duration::from_millis(50)).await;

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("consumer should stop on shutdown")
        .unwrap();
}
