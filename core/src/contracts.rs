//! Cross-service event contracts.
//!
//! These are the payloads the services agree on; changing one is a wire
//! format change for every consumer, which is why they live here and nowhere
//! else. Event type strings carry a version suffix (`.v1`) so schemas can
//! evolve without breaking old consumers.
//!
//! # Topics
//!
//! | Topic             | Producer | Consumers                |
//! |-------------------|----------|--------------------------|
//! | `booking.created` | booking  | payment, notification    |
//! | `booking.changed` | booking  | notification             |
//! | `payment.success` | payment  | booking, notification    |
//! | `payment.failed`  | payment  | booking, notification    |
//! | `payment.refund`  | payment  | notification             |
//!
//! Partition key is always the aggregate id (booking id for booking topics,
//! payment id for payment topics), which gives per-aggregate ordering.
//! Ordering across topics is not guaranteed and consumers must not rely
//! on it.

use crate::ids::{BookingId, EventId, OrderId, PaymentId, UserId};
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bus topic names.
pub mod topics {
    /// A booking was created and is awaiting payment.
    pub const BOOKING_CREATED: &str = "booking.created";
    /// A booking changed status (confirmed, cancelled, failed).
    pub const BOOKING_CHANGED: &str = "booking.changed";
    /// A payment settled successfully.
    pub const PAYMENT_SUCCESS: &str = "payment.success";
    /// A payment failed.
    pub const PAYMENT_FAILED: &str = "payment.failed";
    /// A settled payment was refunded.
    pub const PAYMENT_REFUND: &str = "payment.refund";
}

/// Booking lifecycle status, part of the `booking.changed` wire contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    /// Created, payment not yet resolved.
    Pending,
    /// Payment settled; holds a payment reference.
    Confirmed,
    /// Cancelled by the user before payment resolved. Terminal.
    Cancelled,
    /// Payment failed. Terminal.
    Failed,
}

impl BookingStatus {
    /// Terminal states absorb all further events.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

/// Payload of `booking.created`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingCreated {
    /// The new booking.
    pub booking_id: BookingId,
    /// User who made the booking.
    pub user_id: UserId,
    /// Event being booked.
    pub event_id: EventId,
    /// Number of seats requested (>= 1).
    pub seats: u32,
}

/// Payload of `booking.changed`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingChanged {
    /// The booking that changed.
    pub booking_id: BookingId,
    /// Owning user.
    pub user_id: UserId,
    /// Event being booked.
    pub event_id: EventId,
    /// New status.
    pub status: BookingStatus,
    /// Gateway order reference, present once payment resolved.
    pub payment_ref: Option<OrderId>,
}

/// Payload of `payment.success`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSucceeded {
    /// The settled payment.
    pub payment_id: PaymentId,
    /// Booking this payment pays for.
    pub booking_id: BookingId,
    /// Paying user.
    pub user_id: UserId,
    /// Event being booked.
    pub event_id: EventId,
    /// Settled amount.
    pub amount: Money,
    /// Gateway order reference.
    pub order_id: OrderId,
    /// Gateway-side payment id from the callback.
    pub gateway_payment_id: String,
    /// Settlement time.
    pub settled_at: DateTime<Utc>,
}

/// Payload of `payment.failed`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFailed {
    /// The failed payment.
    pub payment_id: PaymentId,
    /// Booking this payment was for.
    pub booking_id: BookingId,
    /// Paying user.
    pub user_id: UserId,
    /// Event being booked.
    pub event_id: EventId,
    /// Gateway order reference.
    pub order_id: OrderId,
    /// Failure reason reported by the gateway.
    pub reason: String,
}

/// Payload of `payment.refund`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRefunded {
    /// The refunded payment.
    pub payment_id: PaymentId,
    /// Booking the payment was for.
    pub booking_id: BookingId,
    /// Owning user.
    pub user_id: UserId,
    /// Refunded amount.
    pub amount: Money,
}

/// All payloads that can flow through the bus.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    /// `booking.created`
    BookingCreated(BookingCreated),
    /// `booking.changed`
    BookingChanged(BookingChanged),
    /// `payment.success`
    PaymentSucceeded(PaymentSucceeded),
    /// `payment.failed`
    PaymentFailed(PaymentFailed),
    /// `payment.refund`
    PaymentRefunded(PaymentRefunded),
}

impl EventPayload {
    /// Versioned event type identifier, stored in the envelope and used for
    /// dedup identity.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::BookingCreated(_) => "BookingCreated.v1",
            Self::BookingChanged(_) => "BookingChanged.v1",
            Self::PaymentSucceeded(_) => "PaymentSucceeded.v1",
            Self::PaymentFailed(_) => "PaymentFailed.v1",
            Self::PaymentRefunded(_) => "PaymentRefunded.v1",
        }
    }

    /// The topic this payload is published on.
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        match self {
            Self::BookingCreated(_) => topics::BOOKING_CREATED,
            Self::BookingChanged(_) => topics::BOOKING_CHANGED,
            Self::PaymentSucceeded(_) => topics::PAYMENT_SUCCESS,
            Self::PaymentFailed(_) => topics::PAYMENT_FAILED,
            Self::PaymentRefunded(_) => topics::PAYMENT_REFUND,
        }
    }

    /// The aggregate the payload belongs to, used as the partition key.
    ///
    /// Booking events partition by booking id, payment events by payment id,
    /// so each aggregate's events stay ordered relative to each other.
    #[must_use]
    pub const fn aggregate_id(&self) -> uuid::Uuid {
        match self {
            Self::BookingCreated(p) => *p.booking_id.as_uuid(),
            Self::BookingChanged(p) => *p.booking_id.as_uuid(),
            Self::PaymentSucceeded(p) => *p.payment_id.as_uuid(),
            Self::PaymentFailed(p) => *p.payment_id.as_uuid(),
            Self::PaymentRefunded(p) => *p.payment_id.as_uuid(),
        }
    }
}
