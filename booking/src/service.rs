//! The booking state machine service.
//!
//! State (bookings, the processed-event ledger, and the outbox) lives
//! behind one async lock; a transition, its ledger entry, and its staged
//! `booking.changed` event commit as a single atomic unit. Publishing
//! happens after the lock is released and is covered by the outbox sweep.

use crate::types::{Booking, BookingEvent};
use chrono::Duration;
use evently_core::DomainError;
use evently_core::clock::Clock;
use evently_core::contracts::{BookingChanged, BookingCreated, EventPayload, topics};
use evently_core::envelope::{Envelope, EventIdentity, ServiceName};
use evently_core::event_bus::EventBus;
use evently_core::ids::{BookingId, EventId, OrderId, UserId};
use evently_core::ledger::ProcessedEventLedger;
use evently_core::outbox::Outbox;
use evently_runtime::consumer::EventHandler;
use evently_runtime::publisher::publish_envelopes;
use evently_runtime::retry::RetryPolicy;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct BookingState {
    bookings: HashMap<BookingId, Booking>,
    by_user: HashMap<UserId, Vec<BookingId>>,
    ledger: ProcessedEventLedger,
    outbox: Outbox,
}

/// The booking service.
pub struct BookingService {
    state: RwLock<BookingState>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    publish_retry: RetryPolicy,
}

impl BookingService {
    /// Create the service.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(BookingState::default()),
            bus,
            clock,
            publish_retry: RetryPolicy {
                max_retries: 2,
                initial_delay: std::time::Duration::from_millis(50),
                max_delay: std::time::Duration::from_secs(2),
                multiplier: 2.0,
            },
        }
    }

    /// Topics this service consumes.
    #[must_use]
    pub fn subscribed_topics() -> Vec<String> {
        vec![
            topics::PAYMENT_SUCCESS.to_string(),
            topics::PAYMENT_FAILED.to_string(),
        ]
    }

    /// Create a booking: persist it `PENDING`, then publish
    /// `booking.created` - in that order, with the publish step retried
    /// independently of the record step.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] if `seats` is zero.
    pub async fn create(
        &self,
        user_id: UserId,
        event_id: EventId,
        seats: u32,
    ) -> Result<Booking, DomainError> {
        if seats < 1 {
            return Err(DomainError::validation("seats must be >= 1"));
        }

        let booking = {
            let mut state = self.state.write().await;
            let now = self.clock.now();
            let booking = Booking::new(BookingId::new(), user_id, event_id, seats, now);

            state.outbox.stage(
                ServiceName::Booking,
                EventPayload::BookingCreated(BookingCreated {
                    booking_id: booking.id,
                    user_id,
                    event_id,
                    seats,
                }),
                now,
            );
            state.by_user.entry(user_id).or_default().push(booking.id);
            state.bookings.insert(booking.id, booking.clone());
            booking
        };

        tracing::info!(
            booking_id = %booking.id,
            user_id = %user_id,
            event_id = %event_id,
            seats,
            "booking created"
        );
        self.publish_outbox().await;
        Ok(booking)
    }

    /// Confirm a booking against a payment reference. Direct mutator used
    /// by the API layer and the payment-outcome handler alike.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::NotFound`] for unknown bookings.
    pub async fn confirm(
        &self,
        booking_id: BookingId,
        payment_ref: OrderId,
    ) -> Result<Booking, DomainError> {
        self.transition(booking_id, BookingEvent::Confirm(payment_ref))
            .await
    }

    /// Cancel a pending booking. A terminal booking is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::NotFound`] for unknown bookings.
    pub async fn cancel(&self, booking_id: BookingId) -> Result<Booking, DomainError> {
        self.transition(booking_id, BookingEvent::Cancel).await
    }

    /// Mark a pending booking failed. A terminal booking is returned
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::NotFound`] for unknown bookings.
    pub async fn fail(&self, booking_id: BookingId) -> Result<Booking, DomainError> {
        self.transition(booking_id, BookingEvent::Fail).await
    }

    /// React to a payment outcome consumed from the bus. The ledger check
    /// and the transition share one critical section, so redelivery of the
    /// same envelope can never transition twice.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::NotFound`] if the referenced booking does not
    /// exist - a non-retryable error that parks the envelope for an
    /// operator.
    pub async fn on_payment_outcome(
        &self,
        booking_id: BookingId,
        event: BookingEvent,
        identity: EventIdentity,
    ) -> Result<(), DomainError> {
        let mut state = self.state.write().await;
        if state.ledger.already_processed(&identity) {
            return Ok(());
        }

        let now = self.clock.now();
        let booking = state
            .bookings
            .get_mut(&booking_id)
            .ok_or_else(|| DomainError::not_found("booking", booking_id))?;

        let changed = booking.apply(&event, now);
        let snapshot = booking.clone();
        if changed {
            state.outbox.stage(
                ServiceName::Booking,
                EventPayload::BookingChanged(BookingChanged {
                    booking_id: snapshot.id,
                    user_id: snapshot.user_id,
                    event_id: snapshot.event_id,
                    status: snapshot.status,
                    payment_ref: snapshot.payment_ref.clone(),
                }),
                now,
            );
        }
        state.ledger.record(identity, now);
        drop(state);

        if changed {
            tracing::info!(
                booking_id = %booking_id,
                status = %snapshot.status,
                "booking transitioned from payment outcome"
            );
            self.publish_outbox().await;
        }
        Ok(())
    }

    /// Get a booking by id.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::NotFound`] for unknown ids.
    pub async fn get(&self, booking_id: BookingId) -> Result<Booking, DomainError> {
        let state = self.state.read().await;
        state
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("booking", booking_id))
    }

    /// All bookings for a user, oldest first.
    pub async fn bookings_for_user(&self, user_id: UserId) -> Vec<Booking> {
        let state = self.state.read().await;
        state
            .by_user
            .get(&user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.bookings.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Publish every staged envelope whose marker lags. Failures are left
    /// staged for the sweep; the state change has already committed.
    pub async fn publish_outbox(&self) {
        let pending = {
            let state = self.state.read().await;
            state.outbox.unpublished()
        };
        let published =
            publish_envelopes(self.bus.as_ref(), &self.publish_retry, &pending).await;

        let mut state = self.state.write().await;
        for identity in &published {
            state.outbox.mark_published(identity);
        }
    }

    /// Periodic reconciliation pass over the outbox.
    pub async fn sweep_outbox(&self, lag: Duration) {
        let now = self.clock.now();
        let candidates = {
            let state = self.state.read().await;
            state.outbox.unpublished_before(now - lag)
        };

        if !candidates.is_empty() {
            tracing::info!(count = candidates.len(), "outbox sweep re-publishing");
        }
        self.publish_outbox().await;

        let mut state = self.state.write().await;
        state.outbox.compact(now - Duration::hours(1));
    }

    async fn transition(
        &self,
        booking_id: BookingId,
        event: BookingEvent,
    ) -> Result<Booking, DomainError> {
        let (snapshot, changed) = {
            let mut state = self.state.write().await;
            let now = self.clock.now();
            let booking = state
                .bookings
                .get_mut(&booking_id)
                .ok_or_else(|| DomainError::not_found("booking", booking_id))?;

            let changed = booking.apply(&event, now);
            let snapshot = booking.clone();
            if changed {
                state.outbox.stage(
                    ServiceName::Booking,
                    EventPayload::BookingChanged(BookingChanged {
                        booking_id: snapshot.id,
                        user_id: snapshot.user_id,
                        event_id: snapshot.event_id,
                        status: snapshot.status,
                        payment_ref: snapshot.payment_ref.clone(),
                    }),
                    now,
                );
            }
            (snapshot, changed)
        };

        if changed {
            tracing::info!(
                booking_id = %booking_id,
                status = %snapshot.status,
                "booking transitioned"
            );
            self.publish_outbox().await;
        }
        Ok(snapshot)
    }
}

impl EventHandler for BookingService {
    fn handle(
        &self,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), DomainError>> + Send + '_>> {
        let envelope = envelope.clone();
        Box::pin(async move {
            match &envelope.payload {
                EventPayload::PaymentSucceeded(payload) => {
                    self.on_payment_outcome(
                        payload.booking_id,
                        BookingEvent::Confirm(payload.order_id.clone()),
                        envelope.identity(),
                    )
                    .await
                }
                EventPayload::PaymentFailed(payload) => {
                    self.on_payment_outcome(
                        payload.booking_id,
                        BookingEvent::Fail,
                        envelope.identity(),
                    )
                    .await
                }
                _ => Ok(()),
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use evently_core::contracts::{BookingStatus, PaymentFailed, PaymentSucceeded};
    use evently_core::ids::PaymentId;
    use evently_core::money::{Currency, Money};
    use evently_testing::{InMemoryEventBus, test_clock};

    struct Fixture {
        service: BookingService,
        bus: Arc<InMemoryEventBus>,
    }

    fn fixture() -> Fixture {
        let bus = Arc::new(InMemoryEventBus::new());
        let service = BookingService::new(
            Arc::clone(&bus) as Arc<dyn EventBus>,
            Arc::new(test_clock()),
        );
        Fixture { service, bus }
    }

    fn success_envelope(booking: &Booking, sequence: u64) -> Envelope {
        Envelope::new(
            ServiceName::Payment,
            sequence,
            test_clock().now(),
            EventPayload::PaymentSucceeded(PaymentSucceeded {
                payment_id: PaymentId::new(),
                booking_id: booking.id,
                user_id: booking.user_id,
                event_id: booking.event_id,
                amount: Money::from_minor(50_000, Currency::Inr),
                order_id: OrderId::from("order_1"),
                gateway_payment_id: "pay_1".to_string(),
                settled_at: test_clock().now(),
            }),
        )
    }

    fn failure_envelope(booking: &Booking, sequence: u64) -> Envelope {
        Envelope::new(
            ServiceName::Payment,
            sequence,
            test_clock().now(),
            EventPayload::PaymentFailed(PaymentFailed {
                payment_id: PaymentId::new(),
                booking_id: booking.id,
                user_id: booking.user_id,
                event_id: booking.event_id,
                order_id: OrderId::from("order_1"),
                reason: "card declined".to_string(),
            }),
        )
    }

    #[tokio::test]
    async fn create_persists_pending_and_publishes() {
        let fixture = fixture();
        let booking = fixture
            .service
            .create(UserId::new(), EventId::new(), 2)
            .await
            .unwrap();

        assert_eq!(booking.status, BookingStatus::Pending);
        assert!(booking.payment_ref.is_none());

        let published = fixture.bus.published_on(topics::BOOKING_CREATED);
        assert_eq!(published.len(), 1);
        let EventPayload::BookingCreated(ref payload) = published[0].payload else {
            panic!("expected BookingCreated payload");
        };
        assert_eq!(payload.booking_id, booking.id);
        assert_eq!(payload.seats, 2);
    }

    #[tokio::test]
    async fn zero_seats_is_rejected() {
        let fixture = fixture();
        let result = fixture.service.create(UserId::new(), EventId::new(), 0).await;
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn payment_success_confirms_with_payment_ref() {
        let fixture = fixture();
        let booking = fixture
            .service
            .create(UserId::new(), EventId::new(), 2)
            .await
            .unwrap();

        fixture
            .service
            .handle(&success_envelope(&booking, 1))
            .await
            .unwrap();

        let confirmed = fixture.service.get(booking.id).await.unwrap();
        assert_eq!(confirmed.status, BookingStatus::Confirmed);
        assert_eq!(confirmed.payment_ref, Some(OrderId::from("order_1")));

        let changed = fixture.bus.published_on(topics::BOOKING_CHANGED);
        assert_eq!(changed.len(), 1);
    }

    #[tokio::test]
    async fn payment_failure_fails_the_booking() {
        let fixture = fixture();
        let booking = fixture
            .service
            .create(UserId::new(), EventId::new(), 1)
            .await
            .unwrap();

        fixture
            .service
            .handle(&failure_envelope(&booking, 1))
            .await
            .unwrap();

        let failed = fixture.service.get(booking.id).await.unwrap();
        assert_eq!(failed.status, BookingStatus::Failed);
        assert!(failed.payment_ref.is_none());
    }

    #[tokio::test]
    async fn replayed_success_envelope_transitions_exactly_once() {
        let fixture = fixture();
        let booking = fixture
            .service
            .create(UserId::new(), EventId::new(), 2)
            .await
            .unwrap();

        let envelope = success_envelope(&booking, 1);
        fixture.service.handle(&envelope).await.unwrap();
        let after_first = fixture.service.get(booking.id).await.unwrap();

        fixture.service.handle(&envelope).await.unwrap();
        let after_second = fixture.service.get(booking.id).await.unwrap();

        // Status and updated_at identical between applications; one
        // booking.changed on the bus.
        assert_eq!(after_first, after_second);
        assert_eq!(fixture.bus.published_on(topics::BOOKING_CHANGED).len(), 1);
    }

    #[tokio::test]
    async fn late_success_never_overrides_a_failed_booking() {
        let fixture = fixture();
        let booking = fixture
            .service
            .create(UserId::new(), EventId::new(), 2)
            .await
            .unwrap();

        // payment.failed arrives first, then a reordered payment.success
        // for the same aggregate with a distinct identity.
        fixture
            .service
            .handle(&failure_envelope(&booking, 1))
            .await
            .unwrap();
        fixture
            .service
            .handle(&success_envelope(&booking, 2))
            .await
            .unwrap();

        let final_state = fixture.service.get(booking.id).await.unwrap();
        assert_eq!(final_state.status, BookingStatus::Failed);
        assert!(final_state.payment_ref.is_none());
        assert_eq!(fixture.bus.published_on(topics::BOOKING_CHANGED).len(), 1);
    }

    #[tokio::test]
    async fn cancel_only_moves_pending_bookings() {
        let fixture = fixture();
        let booking = fixture
            .service
            .create(UserId::new(), EventId::new(), 1)
            .await
            .unwrap();

        let cancelled = fixture.service.cancel(booking.id).await.unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);

        // Cancelling again is an idempotent no-op, not an error.
        let again = fixture.service.cancel(booking.id).await.unwrap();
        assert_eq!(again, cancelled);
        assert_eq!(fixture.bus.published_on(topics::BOOKING_CHANGED).len(), 1);
    }

    #[tokio::test]
    async fn confirmed_bookings_always_carry_a_payment_ref() {
        let fixture = fixture();
        let user_id = UserId::new();

        let confirmed = fixture
            .service
            .create(user_id, EventId::new(), 1)
            .await
            .unwrap();
        let failed = fixture
            .service
            .create(user_id, EventId::new(), 1)
            .await
            .unwrap();
        fixture
            .service
            .handle(&success_envelope(&confirmed, 1))
            .await
            .unwrap();
        fixture
            .service
            .handle(&failure_envelope(&failed, 1))
            .await
            .unwrap();

        for booking in fixture.service.bookings_for_user(user_id).await {
            if booking.status == BookingStatus::Confirmed {
                assert!(booking.payment_ref.is_some());
            }
        }
    }

    #[tokio::test]
    async fn outcome_for_unknown_booking_is_not_found() {
        let fixture = fixture();
        let phantom = Booking::new(
            BookingId::new(),
            UserId::new(),
            EventId::new(),
            1,
            test_clock().now(),
        );

        let result = fixture.service.handle(&success_envelope(&phantom, 1)).await;
        assert!(matches!(result, Err(DomainError::NotFound { .. })));
    }

    #[tokio::test]
    async fn lost_booking_created_publish_is_recovered_by_sweep() {
        let fixture = fixture();
        fixture.bus.fail_next_publishes(3);

        let booking = fixture
            .service
            .create(UserId::new(), EventId::new(), 1)
            .await
            .unwrap();
        assert!(fixture.bus.published_on(topics::BOOKING_CREATED).is_empty());

        fixture.service.sweep_outbox(Duration::zero()).await;
        let published = fixture.bus.published_on(topics::BOOKING_CREATED);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].aggregate_id, *booking.id.as_uuid());
    }
}
