//! # Evently Auth
//!
//! Trust propagation for the Evently services: a signed, tamper-evident
//! token embeds the caller's identity and role, and every service verifies
//! it locally against a secret shared out-of-band. No service ever contacts
//! a central session store to authorize a request.
//!
//! - [`token::TokenCodec`] - issue and verify compact HMAC-SHA256 tokens
//! - [`claims::Claims`] / [`claims::Role`] - verified identity with a closed
//!   role enumeration and explicit per-operation capabilities
//! - [`bearer`] - the boundary contract: extract the bearer token, verify,
//!   and forward identity downstream as trusted headers
//!
//! # Security posture
//!
//! Verification failures are deliberately indistinguishable to callers:
//! expired, malformed, forged, and unsupported tokens all surface as the
//! generic [`DomainError::Auth`](evently_core::DomainError::Auth) at the
//! boundary. The precise [`token::VerificationError`] is logged, never
//! returned. There is no revocation list; tokens are valid until natural
//! expiry. Verification is pure and safe to call concurrently.

pub mod bearer;
pub mod claims;
pub mod config;
pub mod token;

pub use bearer::{TrustedHeaders, authorize};
pub use claims::{Capability, Claims, Role};
pub use config::TokenConfig;
pub use token::{TokenCodec, VerificationError};
