//! Shared error taxonomy for the Evently services.
//!
//! Every service speaks the same error language so the API layer and the
//! event consumers can make uniform retry and surfacing decisions:
//!
//! - `Validation`, `NotFound`, `Conflict` - caller mistakes, returned to the
//!   direct caller, never retried, never put on the bus
//! - `Auth` - any authentication/authorization failure, deliberately carrying
//!   no detail (callers must not learn whether a token was expired, forged,
//!   or malformed)
//! - `TransientInfra` - bus unavailable, gateway timeout; the only retryable
//!   class
//! - `SignatureMismatch` - a failed webhook signature check; fails closed,
//!   logged as a security event, never retried

use thiserror::Error;

/// The error taxonomy shared by every Evently service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Input failed validation (bad seat count, zero amount, unknown currency).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The referenced aggregate does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of aggregate looked up ("booking", "payment", ...).
        kind: &'static str,
        /// Identifier that missed.
        id: String,
    },

    /// The operation conflicts with existing state (duplicate payment,
    /// illegal transition).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Authentication or authorization failed. Intentionally detail-free.
    #[error("unauthorized")]
    Auth,

    /// Infrastructure failure that is expected to heal (bus down, gateway
    /// timeout). The only variant worth retrying.
    #[error("transient infrastructure failure: {0}")]
    TransientInfra(String),

    /// A webhook signature did not match the expected keyed hash.
    #[error("signature mismatch")]
    SignatureMismatch,
}

impl DomainError {
    /// Build a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a not-found error for an aggregate kind and id.
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Build a conflict error.
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Build a transient infrastructure error.
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientInfra(msg.into())
    }

    /// Whether a consumer should retry the operation that produced this
    /// error. Only transient infrastructure failures qualify; everything
    /// else would fail identically on redelivery.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientInfra(_))
    }
}
