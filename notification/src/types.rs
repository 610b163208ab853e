//! Delivery-log record types.

use chrono::{DateTime, Utc};
use evently_core::ids::{BookingId, NotificationId, UserId};
use serde::{Deserialize, Serialize};

/// Delivery channel for a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    /// Email delivery.
    Email,
    /// SMS delivery.
    Sms,
    /// In-app notification.
    InApp,
}

/// Delivery status of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    /// Queued, not yet handed to the sender.
    Pending,
    /// Accepted by the delivery collaborator.
    Sent,
    /// Gave up after exhausting the retry budget. Terminal.
    Failed,
}

/// One entry in the projector's delivery log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Unique notification identifier.
    pub id: NotificationId,
    /// User the message is for.
    pub user_id: UserId,
    /// Booking the message refers to, when applicable.
    pub booking_id: Option<BookingId>,
    /// Delivery channel.
    pub channel: Channel,
    /// Message subject.
    pub subject: String,
    /// Message body.
    pub body: String,
    /// Recipient handle (resolved to an address by the delivery layer).
    pub recipient: String,
    /// Current delivery status.
    pub status: DeliveryStatus,
    /// Number of delivery attempts made.
    pub attempts: u32,
    /// When the message was derived.
    pub created_at: DateTime<Utc>,
    /// When delivery succeeded, if it did.
    pub sent_at: Option<DateTime<Utc>>,
}
