//! The notification projector.
//!
//! Consumes `booking.created`, `booking.changed`, `payment.success`, and
//! `payment.failed`; derives a templated message for each; and attempts
//! delivery with a bounded retry budget (3 attempts). The result - sent or
//! failed - is recorded in the delivery log either way, and the handler
//! always acknowledges the envelope: notification failure must never cause
//! booking or payment event redelivery.

use crate::sender::NotificationSender;
use crate::types::{Channel, DeliveryStatus, Notification};
use evently_core::DomainError;
use evently_core::clock::Clock;
use evently_core::contracts::{BookingStatus, EventPayload, topics};
use evently_core::envelope::Envelope;
use evently_core::ids::{BookingId, NotificationId, UserId};
use evently_core::ledger::ProcessedEventLedger;
use evently_runtime::consumer::EventHandler;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Delivery attempts per message, including the first.
const MAX_DELIVERY_ATTEMPTS: u32 = 3;

#[derive(Default)]
struct ProjectorState {
    log: Vec<Notification>,
    ledger: ProcessedEventLedger,
}

/// Derives and delivers user-facing messages from saga events.
pub struct NotificationProjector {
    state: RwLock<ProjectorState>,
    sender: Arc<dyn NotificationSender>,
    clock: Arc<dyn Clock>,
}

impl NotificationProjector {
    /// Create the projector.
    #[must_use]
    pub fn new(sender: Arc<dyn NotificationSender>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(ProjectorState::default()),
            sender,
            clock,
        }
    }

    /// Topics this projector consumes.
    #[must_use]
    pub fn subscribed_topics() -> Vec<String> {
        vec![
            topics::BOOKING_CREATED.to_string(),
            topics::BOOKING_CHANGED.to_string(),
            topics::PAYMENT_SUCCESS.to_string(),
            topics::PAYMENT_FAILED.to_string(),
        ]
    }

    /// All notifications derived for a user, oldest first.
    pub async fn notifications_for_user(&self, user_id: UserId) -> Vec<Notification> {
        let state = self.state.read().await;
        state
            .log
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Notifications that never made it out (terminal failures).
    pub async fn failed_deliveries(&self) -> Vec<Notification> {
        let state = self.state.read().await;
        state
            .log
            .iter()
            .filter(|n| n.status == DeliveryStatus::Failed)
            .cloned()
            .collect()
    }

    /// Total number of log entries.
    pub async fn log_len(&self) -> usize {
        let state = self.state.read().await;
        state.log.len()
    }

    async fn project(&self, envelope: &Envelope) -> Result<(), DomainError> {
        let identity = envelope.identity();
        {
            let mut state = self.state.write().await;
            if !state.ledger.check_and_record(identity, self.clock.now()) {
                return Ok(());
            }
        }

        let Some((user_id, booking_id, subject, body)) = derive_message(&envelope.payload) else {
            return Ok(());
        };

        let mut notification = Notification {
            id: NotificationId::new(),
            user_id,
            booking_id,
            channel: Channel::Email,
            subject,
            body,
            recipient: user_id.to_string(),
            status: DeliveryStatus::Pending,
            attempts: 0,
            created_at: self.clock.now(),
            sent_at: None,
        };

        while notification.attempts < MAX_DELIVERY_ATTEMPTS {
            notification.attempts += 1;
            match self.sender.send(&notification).await {
                Ok(()) => {
                    notification.status = DeliveryStatus::Sent;
                    notification.sent_at = Some(self.clock.now());
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        notification_id = %notification.id,
                        attempt = notification.attempts,
                        error = %e,
                        "notification delivery attempt failed"
                    );
                }
            }
        }
        if notification.status != DeliveryStatus::Sent {
            notification.status = DeliveryStatus::Failed;
            tracing::error!(
                notification_id = %notification.id,
                user_id = %notification.user_id,
                "notification delivery gave up"
            );
        }

        let mut state = self.state.write().await;
        state.log.push(notification);
        Ok(())
    }
}

/// Template table: payload to (user, booking, subject, body).
fn derive_message(
    payload: &EventPayload,
) -> Option<(UserId, Option<BookingId>, String, String)> {
    match payload {
        EventPayload::BookingCreated(p) => Some((
            p.user_id,
            Some(p.booking_id),
            "Booking received".to_string(),
            format!(
                "Your booking for event {} ({} seats) was received and is awaiting payment.",
                p.event_id, p.seats
            ),
        )),
        EventPayload::BookingChanged(p) => {
            let (subject, body) = match p.status {
                BookingStatus::Confirmed => (
                    "Booking confirmed".to_string(),
                    format!(
                        "Your booking {} is confirmed. Payment reference: {}.",
                        p.booking_id,
                        p.payment_ref
                            .as_ref()
                            .map_or_else(|| "-".to_string(), ToString::to_string)
                    ),
                ),
                BookingStatus::Cancelled => (
                    "Booking cancelled".to_string(),
                    format!("Your booking {} has been cancelled.", p.booking_id),
                ),
                BookingStatus::Failed => (
                    "Booking failed".to_string(),
                    format!("Event booking failed. Booking {} could not be completed.", p.booking_id),
                ),
                BookingStatus::Pending => return None,
            };
            Some((p.user_id, Some(p.booking_id), subject, body))
        }
        EventPayload::PaymentSucceeded(p) => Some((
            p.user_id,
            Some(p.booking_id),
            "Payment successful".to_string(),
            format!(
                "Payment of {} for booking {} succeeded (reference {}).",
                p.amount, p.booking_id, p.order_id
            ),
        )),
        EventPayload::PaymentFailed(p) => Some((
            p.user_id,
            Some(p.booking_id),
            "Payment failed".to_string(),
            format!("Event booking failed. Reason: {}.", p.reason),
        )),
        EventPayload::PaymentRefunded(_) => None,
    }
}

impl EventHandler for NotificationProjector {
    fn handle(
        &self,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), DomainError>> + Send + '_>> {
        let envelope = envelope.clone();
        Box::pin(async move { self.project(&envelope).await })
    }
}
