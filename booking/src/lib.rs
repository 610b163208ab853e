//! # Evently Booking
//!
//! The booking service owns the Booking aggregate and its lifecycle:
//!
//! ```text
//! PENDING --(payment.success consumed)--> CONFIRMED
//! PENDING --(payment.failed consumed)--> FAILED
//! PENDING --(user cancel)--> CANCELLED
//! CONFIRMED, CANCELLED, FAILED --(any event)--> unchanged (idempotent no-op)
//! ```
//!
//! A booking is created `PENDING` on user request and thereafter mutated
//! only by this service - either by direct API calls (cancel/confirm before
//! payment) or by consuming payment-outcome events from the bus. Both paths
//! apply the same transition table; terminal states absorb everything, so
//! redelivered and reordered envelopes are no-ops. Every accepted
//! transition publishes `booking.changed` through the service's outbox.

pub mod service;
pub mod types;

pub use service::BookingService;
pub use types::{Booking, BookingEvent};
