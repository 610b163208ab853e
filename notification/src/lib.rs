//! # Evently Notification
//!
//! A pure event consumer: subscribes to the booking and payment topics,
//! derives templated user-facing messages, and hands them to a delivery
//! collaborator (email/SMS transmission itself is out of scope). The
//! projector is stateless beyond its own delivery log.
//!
//! Delivery failure is this service's problem alone: a message that cannot
//! be sent is retried up to a bounded number of times and then marked
//! failed in the log - it never fails the upstream envelope's
//! acknowledgment, so notification trouble can never cause booking or
//! payment event redelivery.

pub mod projector;
pub mod sender;
pub mod types;

pub use projector::NotificationProjector;
pub use sender::{ConsoleSender, NotificationSender, SendError};
pub use types::{Channel, DeliveryStatus, Notification};
