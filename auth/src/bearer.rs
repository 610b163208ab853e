//! Boundary contract for the gateway/filter layer.
//!
//! The HTTP gateway itself is an external collaborator; what it consumes
//! from this crate is the shape of the handshake: pull the bearer token out
//! of the `Authorization` header, verify it, and forward the resolved
//! identity to downstream services as trusted headers. Downstream services
//! trust `X-User-Id`/`X-User-Role` only because the boundary already
//! verified the signature - they never re-derive trust from the header text
//! itself.

use crate::claims::Claims;
use crate::token::TokenCodec;
use evently_core::DomainError;

/// Header carrying the verified user id downstream.
pub const X_USER_ID: &str = "X-User-Id";
/// Header carrying the verified role downstream.
pub const X_USER_ROLE: &str = "X-User-Role";

/// Extract the raw token from an `Authorization: Bearer <token>` header.
///
/// # Errors
///
/// Returns [`DomainError::Auth`] if the header is missing, not a bearer
/// scheme, or carries an empty token.
pub fn parse_bearer(header: Option<&str>) -> Result<&str, DomainError> {
    let header = header.ok_or(DomainError::Auth)?;
    let token = header.strip_prefix("Bearer ").ok_or(DomainError::Auth)?;
    if token.is_empty() {
        return Err(DomainError::Auth);
    }
    Ok(token)
}

/// Resolve claims from an inbound `Authorization` header, or deny.
///
/// All verification failures collapse to the generic
/// [`DomainError::Auth`]; the precise reason is logged at debug level and
/// never surfaced to the caller.
///
/// # Errors
///
/// Returns [`DomainError::Auth`] for a missing/malformed header or any
/// token verification failure.
pub fn authorize(codec: &TokenCodec, header: Option<&str>) -> Result<Claims, DomainError> {
    let token = parse_bearer(header)?;
    codec.verify(token).map_err(|e| {
        tracing::debug!(reason = %e, "token verification failed");
        DomainError::Auth
    })
}

/// The identity a verified request carries into downstream services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedHeaders {
    /// Value for [`X_USER_ID`].
    pub user_id: String,
    /// Value for [`X_USER_ROLE`].
    pub role: String,
}

impl TrustedHeaders {
    /// Build the downstream headers from verified claims.
    #[must_use]
    pub fn from_claims(claims: &Claims) -> Self {
        Self {
            user_id: claims.user_id.to_string(),
            role: claims.role.as_str().to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::claims::Role;
    use chrono::Duration;
    use evently_core::ids::UserId;
    use evently_testing::test_clock;
    use std::sync::Arc;

    fn codec() -> TokenCodec {
        TokenCodec::new(b"shared-out-of-band", Arc::new(test_clock()))
    }

    #[test]
    fn bearer_parsing_accepts_only_bearer_scheme() {
        assert_eq!(parse_bearer(Some("Bearer abc")).unwrap(), "abc");
        assert!(parse_bearer(None).is_err());
        assert!(parse_bearer(Some("Basic dXNlcjpwYXNz")).is_err());
        assert!(parse_bearer(Some("Bearer ")).is_err());
        assert!(parse_bearer(Some("bearer abc")).is_err());
    }

    #[test]
    fn authorize_resolves_claims_for_valid_tokens() {
        let codec = codec();
        let user_id = UserId::new();
        let token = codec
            .issue("alice", Role::Customer, user_id, Duration::hours(1))
            .unwrap();
        let header = format!("Bearer {token}");

        let claims = authorize(&codec, Some(&header)).unwrap();
        assert_eq!(claims.user_id, user_id);

        let trusted = TrustedHeaders::from_claims(&claims);
        assert_eq!(trusted.user_id, user_id.to_string());
        assert_eq!(trusted.role, "customer");
    }

    #[test]
    fn every_failure_collapses_to_generic_unauthorized() {
        let codec = codec();

        // Missing header, garbage token, forged token: identical error.
        assert_eq!(authorize(&codec, None), Err(DomainError::Auth));
        assert_eq!(
            authorize(&codec, Some("Bearer not-a-token")),
            Err(DomainError::Auth)
        );

        let other = TokenCodec::new(b"other-secret", Arc::new(test_clock()));
        let forged = other
            .issue("mallory", Role::Admin, UserId::new(), Duration::hours(1))
            .unwrap();
        assert_eq!(
            authorize(&codec, Some(&format!("Bearer {forged}"))),
            Err(DomainError::Auth)
        );
    }
}
