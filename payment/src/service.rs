//! The payment state machine service.
//!
//! Owns all Payment aggregates. State (payments, correlation indexes, the
//! processed-event ledger, and the outbox) lives behind one async lock, so
//! a mutation, its ledger entry, and its staged outcome event commit as a
//! single atomic unit. Publishing happens after the lock is released and is
//! retried independently; envelopes whose publish is lost are re-published
//! by the periodic outbox sweep.
//!
//! Gateway calls are synchronous I/O performed inline, bounded by a
//! per-call timeout. A timeout surfaces as a retryable error with no ledger
//! write, so the triggering envelope is redelivered.

use crate::config::PaymentConfig;
use crate::gateway::{GatewayError, PaymentGateway};
use crate::signature::WebhookSigner;
use crate::types::{Payment, PaymentMethod, PaymentStatus};
use chrono::Duration;
use evently_core::DomainError;
use evently_core::clock::Clock;
use evently_core::contracts::{
    BookingCreated, EventPayload, PaymentFailed, PaymentRefunded, PaymentSucceeded, topics,
};
use evently_core::envelope::{Envelope, EventIdentity, ServiceName};
use evently_core::event_bus::EventBus;
use evently_core::ids::{BookingId, EventId, OrderId, PaymentId, UserId};
use evently_core::ledger::ProcessedEventLedger;
use evently_core::money::Money;
use evently_core::outbox::Outbox;
use evently_runtime::consumer::EventHandler;
use evently_runtime::publisher::publish_envelopes;
use evently_runtime::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Gateway callback payload, as delivered by the excluded HTTP layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum WebhookEvent {
    /// The gateway captured a payment against an order.
    PaymentCaptured {
        /// Order the capture settles.
        order_id: OrderId,
        /// Gateway-side payment id.
        gateway_payment_id: String,
        /// Hex HMAC over `order_id|gateway_payment_id`.
        signature: String,
    },
    /// The gateway reports the payment attempt failed.
    PaymentFailed {
        /// Order the failure refers to.
        order_id: OrderId,
        /// Failure reason.
        reason: String,
    },
}

#[derive(Default)]
struct PaymentState {
    payments: HashMap<PaymentId, Payment>,
    by_order: HashMap<OrderId, PaymentId>,
    by_booking: HashMap<BookingId, PaymentId>,
    ledger: ProcessedEventLedger,
    outbox: Outbox,
}

/// The payment service.
///
/// Constructed once per process with its collaborators passed in
/// explicitly; consumed by the API layer for direct calls and registered as
/// the handler for `booking.created`.
pub struct PaymentService {
    state: RwLock<PaymentState>,
    bus: Arc<dyn EventBus>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    signer: WebhookSigner,
    config: PaymentConfig,
    publish_retry: RetryPolicy,
}

impl PaymentService {
    /// Create the service.
    #[must_use]
    pub fn new(
        bus: Arc<dyn EventBus>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        config: PaymentConfig,
    ) -> Self {
        let signer = WebhookSigner::new(config.webhook_secret.as_bytes());
        Self {
            state: RwLock::new(PaymentState::default()),
            bus,
            gateway,
            clock,
            signer,
            config,
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
        vec![topics::BOOKING_CREATED.to_string()]
    }

    /// Initiate a payment for a booking: create the record, request a
    /// gateway order, and hand the order id back for the client-side
    /// payment flow.
    ///
    /// # Errors
    ///
    /// - [`DomainError::Validation`] - zero amount
    /// - [`DomainError::Conflict`] - a payment already exists for the
    ///   booking, whatever its status
    /// - [`DomainError::TransientInfra`] - gateway timeout or outage
    pub async fn initiate(
        &self,
        user_id: UserId,
        booking_id: BookingId,
        event_id: EventId,
        amount: Money,
        method: Option<PaymentMethod>,
    ) -> Result<Payment, DomainError> {
        if amount.is_zero() {
            return Err(DomainError::validation("amount must be positive"));
        }

        {
            let state = self.state.read().await;
            if state.by_booking.contains_key(&booking_id) {
                return Err(duplicate_payment(booking_id));
            }
        }

        let payment_id = PaymentId::new();
        let receipt = format!("receipt_{payment_id}");
        let order_id = self.create_order(amount, &receipt).await?;

        let payment = {
            let mut state = self.state.write().await;
            // Re-check under the write lock: a concurrent initiate for the
            // same booking may have won the race during the gateway call.
            if state.by_booking.contains_key(&booking_id) {
                return Err(duplicate_payment(booking_id));
            }

            let payment = Payment::new(
                payment_id,
                booking_id,
                user_id,
                event_id,
                amount,
                method,
                order_id.clone(),
                self.clock.now(),
            );
            state.by_order.insert(order_id, payment_id);
            state.by_booking.insert(booking_id, payment_id);
            state.payments.insert(payment_id, payment.clone());
            payment
        };

        tracing::info!(
            payment_id = %payment.id,
            booking_id = %booking_id,
            order_id = %payment.order_id,
            amount = %amount,
            "payment initiated"
        );
        Ok(payment)
    }

    /// React to `booking.created`: price the booking and run the same
    /// initiate path. Idempotent under redelivery via the ledger, and
    /// harmless if an explicit initiate already created the payment.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::TransientInfra`] on gateway trouble, which
    /// leaves the ledger untouched so the envelope is redelivered.
    pub async fn on_booking_created(
        &self,
        payload: &BookingCreated,
        identity: EventIdentity,
    ) -> Result<(), DomainError> {
        {
            let state = self.state.read().await;
            if state.ledger.already_processed(&identity) {
                return Ok(());
            }
            if state.by_booking.contains_key(&payload.booking_id) {
                // Payment already exists (explicit initiate won); just
                // absorb the event.
                drop(state);
                let mut state = self.state.write().await;
                state.ledger.record(identity, self.clock.now());
                return Ok(());
            }
        }

        let per_seat = Money::from_minor(self.config.seat_price_minor, self.config.currency);
        let amount = per_seat
            .checked_multiply(payload.seats)
            .ok_or_else(|| DomainError::validation("seat pricing overflow"))?;

        let payment_id = PaymentId::new();
        let receipt = format!("receipt_{payment_id}");
        let order_id = self.create_order(amount, &receipt).await?;

        let mut state = self.state.write().await;
        if !state.ledger.check_and_record(identity, self.clock.now()) {
            return Ok(());
        }
        if state.by_booking.contains_key(&payload.booking_id) {
            return Ok(());
        }

        let payment = Payment::new(
            payment_id,
            payload.booking_id,
            payload.user_id,
            payload.event_id,
            amount,
            None,
            order_id.clone(),
            self.clock.now(),
        );
        state.by_order.insert(order_id, payment_id);
        state.by_booking.insert(payload.booking_id, payment_id);
        state.payments.insert(payment_id, payment.clone());
        drop(state);

        tracing::info!(
            payment_id = %payment.id,
            booking_id = %payload.booking_id,
            seats = payload.seats,
            amount = %amount,
            "payment initiated from booking.created"
        );
        Ok(())
    }

    /// Verify a gateway settlement callback and settle the payment.
    ///
    /// Fails closed on signature mismatch: nothing changes and the attempt
    /// is logged as a security event. Callbacks for already-settled
    /// payments return the existing record unchanged. Callbacks for
    /// payments pending longer than the replay window are rejected.
    ///
    /// # Errors
    ///
    /// - [`DomainError::SignatureMismatch`] - forged or corrupted signature
    /// - [`DomainError::NotFound`] - no payment for the order id
    /// - [`DomainError::Validation`] - callback outside the replay window
    pub async fn verify_and_settle(
        &self,
        order_id: &OrderId,
        gateway_payment_id: &str,
        signature: &str,
    ) -> Result<Payment, DomainError> {
        if !self
            .signer
            .verify(order_id.as_str(), gateway_payment_id, signature)
        {
            tracing::warn!(
                order_id = %order_id,
                gateway_payment_id,
                "webhook signature mismatch"
            );
            metrics::counter!("payment.signature_mismatch").increment(1);
            return Err(DomainError::SignatureMismatch);
        }

        let settled = {
            let mut state = self.state.write().await;
            let payment_id = *state
                .by_order
                .get(order_id)
                .ok_or_else(|| DomainError::not_found("payment", order_id))?;
            let now = self.clock.now();
            let window = Duration::minutes(self.config.callback_window_minutes);

            let payment = state
                .payments
                .get_mut(&payment_id)
                .ok_or_else(|| DomainError::not_found("payment", payment_id))?;

            if payment.status.is_terminal() {
                // Duplicate callback; accepted, nothing changes.
                return Ok(payment.clone());
            }

            if now - payment.created_at > window {
                return Err(DomainError::validation(
                    "settlement callback outside replay window",
                ));
            }

            payment.status = PaymentStatus::Success;
            payment.gateway_payment_id = Some(gateway_payment_id.to_string());
            payment.settled_at = Some(now);
            let settled = payment.clone();

            state.outbox.stage(
                ServiceName::Payment,
                EventPayload::PaymentSucceeded(PaymentSucceeded {
                    payment_id: settled.id,
                    booking_id: settled.booking_id,
                    user_id: settled.user_id,
                    event_id: settled.event_id,
                    amount: settled.amount,
                    order_id: settled.order_id.clone(),
                    gateway_payment_id: gateway_payment_id.to_string(),
                    settled_at: now,
                }),
                now,
            );
            settled
        };

        tracing::info!(
            payment_id = %settled.id,
            order_id = %order_id,
            "payment settled"
        );
        self.publish_outbox().await;
        Ok(settled)
    }

    /// Mark a pending payment failed after a gateway failure callback and
    /// publish `payment.failed`. Terminal payments are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::NotFound`] if no payment matches the order.
    pub async fn fail(&self, order_id: &OrderId, reason: &str) -> Result<Payment, DomainError> {
        let failed = {
            let mut state = self.state.write().await;
            let payment_id = *state
                .by_order
                .get(order_id)
                .ok_or_else(|| DomainError::not_found("payment", order_id))?;
            let now = self.clock.now();

            let payment = state
                .payments
                .get_mut(&payment_id)
                .ok_or_else(|| DomainError::not_found("payment", payment_id))?;

            if payment.status.is_terminal() {
                return Ok(payment.clone());
            }

            payment.status = PaymentStatus::Failed;
            payment.failure_reason = Some(reason.to_string());
            payment.settled_at = Some(now);
            let failed = payment.clone();

            state.outbox.stage(
                ServiceName::Payment,
                EventPayload::PaymentFailed(PaymentFailed {
                    payment_id: failed.id,
                    booking_id: failed.booking_id,
                    user_id: failed.user_id,
                    event_id: failed.event_id,
                    order_id: failed.order_id.clone(),
                    reason: reason.to_string(),
                }),
                now,
            );
            failed
        };

        tracing::warn!(
            payment_id = %failed.id,
            order_id = %order_id,
            reason,
            "payment failed"
        );
        self.publish_outbox().await;
        Ok(failed)
    }

    /// Refund a settled payment and publish `payment.refund`.
    ///
    /// # Errors
    ///
    /// - [`DomainError::NotFound`] - unknown payment id
    /// - [`DomainError::Conflict`] - the payment is not in `Success`
    pub async fn refund(&self, payment_id: PaymentId) -> Result<Payment, DomainError> {
        let refunded = {
            let mut state = self.state.write().await;
            let now = self.clock.now();
            let payment = state
                .payments
                .get_mut(&payment_id)
                .ok_or_else(|| DomainError::not_found("payment", payment_id))?;

            if payment.status != PaymentStatus::Success {
                return Err(DomainError::conflict("can only refund successful payments"));
            }

            payment.status = PaymentStatus::Refunded;
            let refunded = payment.clone();

            state.outbox.stage(
                ServiceName::Payment,
                EventPayload::PaymentRefunded(PaymentRefunded {
                    payment_id: refunded.id,
                    booking_id: refunded.booking_id,
                    user_id: refunded.user_id,
                    amount: refunded.amount,
                }),
                now,
            );
            refunded
        };

        tracing::info!(payment_id = %payment_id, "payment refunded");
        self.publish_outbox().await;
        Ok(refunded)
    }

    /// Dispatch a gateway webhook to the matching transition.
    ///
    /// # Errors
    ///
    /// Propagates the errors of [`Self::verify_and_settle`] and
    /// [`Self::fail`].
    pub async fn process_webhook(&self, event: WebhookEvent) -> Result<Payment, DomainError> {
        match event {
            WebhookEvent::PaymentCaptured {
                order_id,
                gateway_payment_id,
                signature,
            } => {
                self.verify_and_settle(&order_id, &gateway_payment_id, &signature)
                    .await
            }
            WebhookEvent::PaymentFailed { order_id, reason } => {
                self.fail(&order_id, &reason).await
            }
        }
    }

    /// Get a payment by id.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::NotFound`] for unknown ids.
    pub async fn get(&self, payment_id: PaymentId) -> Result<Payment, DomainError> {
        let state = self.state.read().await;
        state
            .payments
            .get(&payment_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("payment", payment_id))
    }

    /// Get the payment for a booking.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::NotFound`] if the booking has no payment.
    pub async fn payment_for_booking(&self, booking_id: BookingId) -> Result<Payment, DomainError> {
        let state = self.state.read().await;
        let payment_id = state
            .by_booking
            .get(&booking_id)
            .ok_or_else(|| DomainError::not_found("payment", booking_id))?;
        state
            .payments
            .get(payment_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("payment", booking_id))
    }

    /// Publish every staged envelope whose marker lags, with bounded
    /// retries. Failures are left staged for the sweep; the state change
    /// they describe has already committed.
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

    /// Periodic reconciliation pass: re-publish staged envelopes older
    /// than `lag` whose publish marker still lags, and compact old
    /// published history.
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

    async fn create_order(&self, amount: Money, receipt: &str) -> Result<OrderId, DomainError> {
        let timeout = std::time::Duration::from_secs(self.config.gateway_timeout_secs);
        let call = self.gateway.create_order(amount, receipt);

        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(order_id)) => Ok(order_id),
            Ok(Err(e)) => Err(map_gateway_error(e)),
            Err(_) => Err(DomainError::transient("gateway timeout")),
        }
    }
}

fn duplicate_payment(booking_id: BookingId) -> DomainError {
    DomainError::conflict(format!("payment already exists for booking {booking_id}"))
}

fn map_gateway_error(error: GatewayError) -> DomainError {
    match error {
        GatewayError::Rejected { reason } => DomainError::validation(reason),
        GatewayError::Timeout => DomainError::transient("gateway timeout"),
        GatewayError::Unavailable(message) => DomainError::transient(message),
        GatewayError::OrderNotFound(order) => DomainError::not_found("order", order),
    }
}

impl EventHandler for PaymentService {
    fn handle(
        &self,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), DomainError>> + Send + '_>> {
        let envelope = envelope.clone();
        Box::pin(async move {
            match &envelope.payload {
                EventPayload::BookingCreated(payload) => {
                    self.on_booking_created(payload, envelope.identity()).await
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
    use crate::gateway::MockGateway;
    use evently_core::money::Currency;
    use evently_testing::{InMemoryEventBus, ManualClock, test_clock};

    const WEBHOOK_SECRET: &str = "test-webhook-secret";

    struct Fixture {
        service: PaymentService,
        bus: Arc<InMemoryEventBus>,
        gateway: Arc<MockGateway>,
        clock: Arc<ManualClock>,
        signer: WebhookSigner,
    }

    fn fixture() -> Fixture {
        let bus = Arc::new(InMemoryEventBus::new());
        let gateway = Arc::new(MockGateway::new());
        let clock = Arc::new(ManualClock::new(test_clock().now()));
        let config = PaymentConfig {
            webhook_secret: WEBHOOK_SECRET.to_string(),
            seat_price_minor: 25_000,
            currency: Currency::Inr,
            callback_window_minutes: 15,
            gateway_timeout_secs: 10,
        };
        let service = PaymentService::new(
            Arc::clone(&bus) as Arc<dyn EventBus>,
            Arc::clone(&gateway) as Arc<dyn PaymentGateway>,
            Arc::clone(&clock) as Arc<dyn Clock>,
            config,
        );
        Fixture {
            service,
            bus,
            gateway,
            clock,
            signer: WebhookSigner::new(WEBHOOK_SECRET.as_bytes()),
        }
    }

    fn inr(major: u64) -> Money {
        Money::checked_from_major(major, Currency::Inr).unwrap()
    }

    async fn initiated(fixture: &Fixture) -> Payment {
        fixture
            .service
            .initiate(
                UserId::new(),
                BookingId::new(),
                EventId::new(),
                inr(500),
                Some(PaymentMethod::Upi {
                    handle: "alice@okbank".to_string(),
                }),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn initiate_creates_pending_payment_with_gateway_order() {
        let fixture = fixture();
        let payment = initiated(&fixture).await;

        assert_eq!(payment.status, PaymentStatus::Pending);
        assert!(payment.order_id.as_str().starts_with("order_MOCK"));

        let loaded = fixture.service.get(payment.id).await.unwrap();
        assert_eq!(loaded, payment);
        let by_booking = fixture
            .service
            .payment_for_booking(payment.booking_id)
            .await
            .unwrap();
        assert_eq!(by_booking.id, payment.id);
    }

    #[tokio::test]
    async fn zero_amount_is_rejected() {
        let fixture = fixture();
        let result = fixture
            .service
            .initiate(
                UserId::new(),
                BookingId::new(),
                EventId::new(),
                Money::from_minor(0, Currency::Inr),
                None,
            )
            .await;
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn second_payment_for_booking_conflicts_regardless_of_status() {
        let fixture = fixture();
        let payment = initiated(&fixture).await;

        let again = fixture
            .service
            .initiate(payment.user_id, payment.booking_id, payment.event_id, inr(500), None)
            .await;
        assert!(matches!(again, Err(DomainError::Conflict(_))));

        // Settle the first payment, then try once more: still a conflict.
        let signature = fixture.signer.sign(payment.order_id.as_str(), "pay_1");
        fixture
            .service
            .verify_and_settle(&payment.order_id, "pay_1", &signature)
            .await
            .unwrap();
        let after_success = fixture
            .service
            .initiate(payment.user_id, payment.booking_id, payment.event_id, inr(500), None)
            .await;
        assert!(matches!(after_success, Err(DomainError::Conflict(_))));
    }

    #[tokio::test]
    async fn forged_signature_fails_closed() {
        let fixture = fixture();
        let payment = initiated(&fixture).await;

        let forged = WebhookSigner::new(b"wrong-secret").sign(payment.order_id.as_str(), "pay_1");
        let result = fixture
            .service
            .verify_and_settle(&payment.order_id, "pay_1", &forged)
            .await;
        assert_eq!(result, Err(DomainError::SignatureMismatch));

        // No state change, nothing published.
        let untouched = fixture.service.get(payment.id).await.unwrap();
        assert_eq!(untouched.status, PaymentStatus::Pending);
        assert!(fixture.bus.published_on(topics::PAYMENT_SUCCESS).is_empty());
    }

    #[tokio::test]
    async fn verified_settlement_publishes_payment_success() {
        let fixture = fixture();
        let payment = initiated(&fixture).await;

        let signature = fixture.signer.sign(payment.order_id.as_str(), "pay_77");
        let settled = fixture
            .service
            .verify_and_settle(&payment.order_id, "pay_77", &signature)
            .await
            .unwrap();

        assert_eq!(settled.status, PaymentStatus::Success);
        assert_eq!(settled.gateway_payment_id.as_deref(), Some("pay_77"));
        assert!(settled.settled_at.is_some());

        let published = fixture.bus.published_on(topics::PAYMENT_SUCCESS);
        assert_eq!(published.len(), 1);
        let EventPayload::PaymentSucceeded(ref outcome) = published[0].payload else {
            panic!("expected PaymentSucceeded payload");
        };
        assert_eq!(outcome.booking_id, payment.booking_id);
        assert_eq!(outcome.gateway_payment_id, "pay_77");
    }

    #[tokio::test]
    async fn repeated_settlement_callback_is_idempotent() {
        let fixture = fixture();
        let payment = initiated(&fixture).await;
        let signature = fixture.signer.sign(payment.order_id.as_str(), "pay_1");

        let first = fixture
            .service
            .verify_and_settle(&payment.order_id, "pay_1", &signature)
            .await
            .unwrap();
        let second = fixture
            .service
            .verify_and_settle(&payment.order_id, "pay_1", &signature)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(fixture.bus.published_on(topics::PAYMENT_SUCCESS).len(), 1);
    }

    #[tokio::test]
    async fn failure_callback_marks_failed_and_publishes() {
        let fixture = fixture();
        let payment = initiated(&fixture).await;

        let failed = fixture
            .service
            .fail(&payment.order_id, "card declined")
            .await
            .unwrap();
        assert_eq!(failed.status, PaymentStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("card declined"));

        let published = fixture.bus.published_on(topics::PAYMENT_FAILED);
        assert_eq!(published.len(), 1);
        let EventPayload::PaymentFailed(ref outcome) = published[0].payload else {
            panic!("expected PaymentFailed payload");
        };
        assert_eq!(outcome.reason, "card declined");
    }

    #[tokio::test]
    async fn refund_is_only_legal_from_success() {
        let fixture = fixture();
        let payment = initiated(&fixture).await;

        let premature = fixture.service.refund(payment.id).await;
        assert!(matches!(premature, Err(DomainError::Conflict(_))));

        let signature = fixture.signer.sign(payment.order_id.as_str(), "pay_1");
        fixture
            .service
            .verify_and_settle(&payment.order_id, "pay_1", &signature)
            .await
            .unwrap();

        let refunded = fixture.service.refund(payment.id).await.unwrap();
        assert_eq!(refunded.status, PaymentStatus::Refunded);
        assert_eq!(fixture.bus.published_on(topics::PAYMENT_REFUND).len(), 1);

        let twice = fixture.service.refund(payment.id).await;
        assert!(matches!(twice, Err(DomainError::Conflict(_))));
    }

    #[tokio::test]
    async fn booking_created_event_initiates_priced_payment_once() {
        let fixture = fixture();
        let booking_id = BookingId::new();
        let envelope = Envelope::new(
            ServiceName::Booking,
            1,
            fixture.clock.now(),
            EventPayload::BookingCreated(BookingCreated {
                booking_id,
                user_id: UserId::new(),
                event_id: EventId::new(),
                seats: 2,
            }),
        );

        fixture.service.handle(&envelope).await.unwrap();
        // Redelivery of the same envelope must be a no-op.
        fixture.service.handle(&envelope).await.unwrap();

        let payment = fixture
            .service
            .payment_for_booking(booking_id)
            .await
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.amount, Money::from_minor(50_000, Currency::Inr));
    }

    #[tokio::test]
    async fn stale_settlement_callback_is_rejected() {
        let fixture = fixture();
        let payment = initiated(&fixture).await;

        fixture.clock.advance(Duration::minutes(16));
        let signature = fixture.signer.sign(payment.order_id.as_str(), "pay_1");
        let result = fixture
            .service
            .verify_and_settle(&payment.order_id, "pay_1", &signature)
            .await;

        assert!(matches!(result, Err(DomainError::Validation(_))));
        let untouched = fixture.service.get(payment.id).await.unwrap();
        assert_eq!(untouched.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn gateway_timeout_is_retryable() {
        let fixture = fixture();
        fixture.gateway.fail_next_order(GatewayError::Timeout);

        let result = fixture
            .service
            .initiate(UserId::new(), BookingId::new(), EventId::new(), inr(500), None)
            .await;

        let err = result.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn lost_publish_is_recovered_by_the_sweep() {
        let fixture = fixture();
        let payment = initiated(&fixture).await;

        // The immediate publish (and its retries) all fail.
        fixture.bus.fail_next_publishes(3);
        let signature = fixture.signer.sign(payment.order_id.as_str(), "pay_1");
        let settled = fixture
            .service
            .verify_and_settle(&payment.order_id, "pay_1", &signature)
            .await
            .unwrap();
        assert_eq!(settled.status, PaymentStatus::Success);
        assert!(fixture.bus.published_on(topics::PAYMENT_SUCCESS).is_empty());

        // The periodic sweep re-publishes the staged envelope.
        fixture.service.sweep_outbox(Duration::zero()).await;
        assert_eq!(fixture.bus.published_on(topics::PAYMENT_SUCCESS).len(), 1);
    }

    #[tokio::test]
    async fn webhook_dispatch_maps_events_to_transitions() {
        let fixture = fixture();
        let payment = initiated(&fixture).await;
        let signature = fixture.signer.sign(payment.order_id.as_str(), "pay_9");

        let settled = fixture
            .service
            .process_webhook(WebhookEvent::PaymentCaptured {
                order_id: payment.order_id.clone(),
                gateway_payment_id: "pay_9".to_string(),
                signature,
            })
            .await
            .unwrap();
        assert_eq!(settled.status, PaymentStatus::Success);

        let other = initiated(&fixture).await;
        let failed = fixture
            .service
            .process_webhook(WebhookEvent::PaymentFailed {
                order_id: other.order_id.clone(),
                reason: "insufficient funds".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(failed.status, PaymentStatus::Failed);
    }
}
