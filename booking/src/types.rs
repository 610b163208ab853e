//! Booking aggregate types and the pure transition table.

use chrono::{DateTime, Utc};
use evently_core::contracts::BookingStatus;
use evently_core::ids::{BookingId, EventId, OrderId, UserId};
use serde::{Deserialize, Serialize};

/// Events the transition table reacts to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BookingEvent {
    /// Payment settled; carries the gateway order reference.
    Confirm(OrderId),
    /// Payment failed.
    Fail,
    /// User cancelled before payment resolved.
    Cancel,
}

/// The transition table as a pure function.
///
/// `None` means the event does not change the current status - terminal
/// states absorb every event, which is what makes redelivery and
/// reordering safe.
#[must_use]
pub const fn next_status(current: BookingStatus, event: &BookingEvent) -> Option<BookingStatus> {
    match (current, event) {
        (BookingStatus::Pending, BookingEvent::Confirm(_)) => Some(BookingStatus::Confirmed),
        (BookingStatus::Pending, BookingEvent::Fail) => Some(BookingStatus::Failed),
        (BookingStatus::Pending, BookingEvent::Cancel) => Some(BookingStatus::Cancelled),
        _ => None,
    }
}

/// The Booking aggregate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    /// Unique booking identifier, immutable once assigned.
    pub id: BookingId,
    /// User who made the booking.
    pub user_id: UserId,
    /// Event being booked.
    pub event_id: EventId,
    /// Number of seats (>= 1).
    pub seats: u32,
    /// Current status.
    pub status: BookingStatus,
    /// Gateway order reference; non-null exactly when confirmed.
    pub payment_ref: Option<OrderId>,
    /// When the booking was created.
    pub created_at: DateTime<Utc>,
    /// When the booking last changed.
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Creates a new pending booking.
    #[must_use]
    pub const fn new(
        id: BookingId,
        user_id: UserId,
        event_id: EventId,
        seats: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            event_id,
            seats,
            status: BookingStatus::Pending,
            payment_ref: None,
            created_at,
            updated_at: created_at,
        }
    }

    /// Apply an event through the transition table. Returns `true` if the
    /// booking changed. A `Confirm` stamps the payment reference, keeping
    /// the "confirmed implies payment_ref" invariant local to this one
    /// place.
    pub fn apply(&mut self, event: &BookingEvent, now: DateTime<Utc>) -> bool {
        let Some(next) = next_status(self.status, event) else {
            return false;
        };
        if let BookingEvent::Confirm(payment_ref) = event {
            self.payment_ref = Some(payment_ref.clone());
        }
        self.status = next;
        self.updated_at = now;
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn booking() -> Booking {
        Booking::new(
            BookingId::new(),
            UserId::new(),
            EventId::new(),
            2,
            Utc::now(),
        )
    }

    #[test]
    fn pending_confirms_with_payment_ref() {
        let mut booking = booking();
        let changed = booking.apply(&BookingEvent::Confirm(OrderId::from("order_1")), Utc::now());
        assert!(changed);
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(booking.payment_ref, Some(OrderId::from("order_1")));
    }

    #[test]
    fn terminal_states_absorb_everything() {
        let mut booking = booking();
        booking.apply(&BookingEvent::Fail, Utc::now());
        let before = booking.clone();

        for event in [
            BookingEvent::Confirm(OrderId::from("order_1")),
            BookingEvent::Fail,
            BookingEvent::Cancel,
        ] {
            assert!(!booking.apply(&event, Utc::now()));
        }
        assert_eq!(booking, before);
    }

    fn arbitrary_event() -> impl Strategy<Value = BookingEvent> {
        prop_oneof![
            Just(BookingEvent::Confirm(OrderId::from("order_prop"))),
            Just(BookingEvent::Fail),
            Just(BookingEvent::Cancel),
        ]
    }

    proptest! {
        // Any sequence of events preserves the invariants: at most one
        // transition out of Pending ever happens, and a confirmed booking
        // always carries a payment reference.
        #[test]
        fn event_sequences_preserve_invariants(events in prop::collection::vec(arbitrary_event(), 0..12)) {
            let mut booking = booking();
            let mut transitions = 0;

            for event in &events {
                if booking.apply(event, Utc::now()) {
                    transitions += 1;
                }
            }

            prop_assert!(transitions <= 1);
            if booking.status == BookingStatus::Confirmed {
                prop_assert!(booking.payment_ref.is_some());
            }
            if booking.status.is_terminal() {
                let frozen = booking.clone();
                let mut replay = booking.clone();
                replay.apply(&BookingEvent::Confirm(OrderId::from("order_late")), Utc::now());
                prop_assert_eq!(replay, frozen);
            }
        }
    }
}
