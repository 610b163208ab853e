//! Payment aggregate types.

use chrono::{DateTime, Utc};
use evently_core::ids::{BookingId, EventId, OrderId, PaymentId, UserId};
use evently_core::money::Money;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Payment lifecycle status.
///
/// Only `Pending` may move to `Success` or `Failed`; only `Success` may
/// move to `Refunded`; everything else is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    /// Created, awaiting gateway outcome.
    Pending,
    /// Settled successfully.
    Success,
    /// Gateway reported failure. Terminal.
    Failed,
    /// Refunded after settlement. Terminal.
    Refunded,
}

impl PaymentStatus {
    /// Whether callbacks can still change this payment.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Refunded => "REFUNDED",
        };
        write!(f, "{s}")
    }
}

/// How the customer pays.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    /// Card payment.
    Card {
        /// Last four digits.
        last_four: String,
    },
    /// UPI transfer.
    Upi {
        /// UPI handle (e.g. `alice@okbank`).
        handle: String,
    },
    /// Net banking.
    NetBanking {
        /// Bank code.
        bank: String,
    },
    /// Wallet payment.
    Wallet,
}

/// The Payment aggregate.
///
/// Never deleted; terminal statuses only supersede earlier ones.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    /// Unique payment identifier.
    pub id: PaymentId,
    /// Booking this payment pays for (1:1).
    pub booking_id: BookingId,
    /// Paying user.
    pub user_id: UserId,
    /// Event being booked.
    pub event_id: EventId,
    /// Amount to charge.
    pub amount: Money,
    /// Current status.
    pub status: PaymentStatus,
    /// Payment method, if the caller supplied one.
    pub method: Option<PaymentMethod>,
    /// Gateway order reference; the correlation key for callbacks.
    pub order_id: OrderId,
    /// Gateway-side payment id, set on settlement.
    pub gateway_payment_id: Option<String>,
    /// Failure reason, set when the gateway reports failure.
    pub failure_reason: Option<String>,
    /// When the payment was created.
    pub created_at: DateTime<Utc>,
    /// When the payment settled (success or failure).
    pub settled_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// Creates a new pending payment.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub const fn new(
        id: PaymentId,
        booking_id: BookingId,
        user_id: UserId,
        event_id: EventId,
        amount: Money,
        method: Option<PaymentMethod>,
        order_id: OrderId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            booking_id,
            user_id,
            event_id,
            amount,
            status: PaymentStatus::Pending,
            method,
            order_id,
            gateway_payment_id: None,
            failure_reason: None,
            created_at,
            settled_at: None,
        }
    }
}
