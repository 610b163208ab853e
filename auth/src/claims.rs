//! Verified identity claims and role-based capabilities.
//!
//! Roles are a closed enumeration with an explicit capability set per
//! operation. A role string the enum does not know is a malformed token,
//! not a new role - authorization decisions never fall back to string
//! comparison.

use chrono::{DateTime, Utc};
use chrono::serde::ts_seconds;
use evently_core::ids::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of roles a token can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Platform operator: every capability.
    Admin,
    /// Event organizer: event management plus everything a customer can do.
    Organizer,
    /// Regular customer: booking and paying for their own seats.
    Customer,
}

/// Operations gated by role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Create a booking.
    CreateBooking,
    /// Cancel one's own pending booking.
    CancelBooking,
    /// Initiate a payment for a booking.
    InitiatePayment,
    /// Refund a settled payment.
    RefundPayment,
    /// Manage events, venues, and tiers.
    ManageEvents,
    /// Read bookings belonging to other users.
    ViewAnyBooking,
}

impl Role {
    /// Whether this role may perform the given operation.
    #[must_use]
    pub const fn allows(&self, capability: Capability) -> bool {
        match self {
            Self::Admin => true,
            Self::Organizer => matches!(
                capability,
                Capability::CreateBooking
                    | Capability::CancelBooking
                    | Capability::InitiatePayment
                    | Capability::ManageEvents
            ),
            Self::Customer => matches!(
                capability,
                Capability::CreateBooking
                    | Capability::CancelBooking
                    | Capability::InitiatePayment
            ),
        }
    }

    /// Stable string form, as embedded in tokens and trusted headers.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Organizer => "organizer",
            Self::Customer => "customer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Claims carried by a verified token.
///
/// Derived per request from the token signature; never stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (username).
    pub sub: String,
    /// Caller's role.
    pub role: Role,
    /// Caller's user id.
    pub user_id: UserId,
    /// Issued-at time.
    #[serde(with = "ts_seconds")]
    pub iat: DateTime<Utc>,
    /// Expiry time; the token is invalid once `now >= exp`.
    #[serde(with = "ts_seconds")]
    pub exp: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn admin_allows_everything() {
        for capability in [
            Capability::CreateBooking,
            Capability::CancelBooking,
            Capability::InitiatePayment,
            Capability::RefundPayment,
            Capability::ManageEvents,
            Capability::ViewAnyBooking,
        ] {
            assert!(Role::Admin.allows(capability));
        }
    }

    #[test]
    fn customer_cannot_refund_or_manage() {
        assert!(Role::Customer.allows(Capability::CreateBooking));
        assert!(Role::Customer.allows(Capability::InitiatePayment));
        assert!(!Role::Customer.allows(Capability::RefundPayment));
        assert!(!Role::Customer.allows(Capability::ManageEvents));
        assert!(!Role::Customer.allows(Capability::ViewAnyBooking));
    }

    #[test]
    fn organizer_manages_events_but_cannot_refund() {
        assert!(Role::Organizer.allows(Capability::ManageEvents));
        assert!(!Role::Organizer.allows(Capability::RefundPayment));
    }

    #[test]
    fn unknown_role_string_fails_deserialization() {
        let result: Result<Role, _> = serde_json::from_str("\"superuser\"");
        assert!(result.is_err());
    }

    #[test]
    fn claims_roundtrip_with_unix_timestamps() {
        let claims = Claims {
            sub: "alice".to_string(),
            role: Role::Customer,
            user_id: UserId::new(),
            iat: DateTime::from_timestamp(1_735_689_600, 0).unwrap(),
            exp: DateTime::from_timestamp(1_735_776_000, 0).unwrap(),
        };
        let json = serde_json::to_string(&claims).unwrap();
        assert!(json.contains("1735689600"));
        let decoded: Claims = serde_json::from_str(&json).unwrap();
        assert_eq!(claims, decoded);
    }
}
