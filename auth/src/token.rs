//! Compact signed token codec.
//!
//! Tokens are three url-safe base64 segments joined by dots - header,
//! claims, signature - with an HMAC-SHA256 signature over the first two
//! segments. The signing secret is shared out-of-band by all services, so
//! any service can verify locally without a network call.
//!
//! Verification order is deliberate: structure, then signature, then
//! expiry. Nothing inside the claims segment is trusted (or even
//! deserialized into domain types) until the signature has matched, and the
//! signature comparison is constant-time.

use crate::claims::Claims;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Duration;
use evently_core::clock::Clock;
use evently_core::ids::UserId;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use thiserror::Error;

use crate::claims::Role;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "HS256";

/// Why a token failed verification.
///
/// Callers at the service boundary must collapse all four variants into a
/// generic "unauthorized" - distinguishing them to an end user leaks
/// cryptographic detail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    /// The token's expiry has passed.
    #[error("token expired")]
    Expired,
    /// The token is structurally invalid (segments, encoding, claims).
    #[error("token malformed")]
    Malformed,
    /// The signature does not match the shared secret.
    #[error("token signature invalid")]
    BadSignature,
    /// The token names an algorithm this codec does not support.
    #[error("token algorithm unsupported")]
    Unsupported,
}

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// Issues and verifies signed tokens with a symmetric shared secret.
///
/// Stateless and side-effect-free: safe to call from any number of threads
/// simultaneously.
#[derive(Clone)]
pub struct TokenCodec {
    mac: HmacSha256,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    /// Create a codec over the shared secret.
    ///
    /// # Panics
    ///
    /// HMAC-SHA256 accepts keys of any length, so key setup cannot actually
    /// fail.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new(secret: impl AsRef<[u8]>, clock: Arc<dyn Clock>) -> Self {
        let mac = HmacSha256::new_from_slice(secret.as_ref())
            .expect("HMAC-SHA256 accepts keys of any length");
        Self { mac, clock }
    }

    /// Issue a signed token embedding the four claims plus expiry.
    ///
    /// # Errors
    ///
    /// Returns [`VerificationError::Malformed`] if the claims cannot be
    /// encoded, which does not happen for well-formed inputs.
    pub fn issue(
        &self,
        subject: &str,
        role: Role,
        user_id: UserId,
        ttl: Duration,
    ) -> Result<String, VerificationError> {
        let now = self.clock.now();
        let claims = Claims {
            sub: subject.to_string(),
            role,
            user_id,
            iat: now,
            exp: now + ttl,
        };

        let header = Header {
            alg: ALGORITHM.to_string(),
            typ: "JWT".to_string(),
        };
        let header_segment = encode_json(&header)?;
        let claims_segment = encode_json(&claims)?;

        let message = format!("{header_segment}.{claims_segment}");
        let signature = URL_SAFE_NO_PAD.encode(self.sign(message.as_bytes()));

        Ok(format!("{message}.{signature}"))
    }

    /// Verify a token: signature, then expiry. Malformed encodings are
    /// rejected without being interpreted.
    ///
    /// # Errors
    ///
    /// - [`VerificationError::Malformed`] - wrong segment count, bad base64,
    ///   undecodable header or claims (including unknown role strings)
    /// - [`VerificationError::Unsupported`] - header names another algorithm
    /// - [`VerificationError::BadSignature`] - signature mismatch
    /// - [`VerificationError::Expired`] - `now >= exp`
    pub fn verify(&self, token: &str) -> Result<Claims, VerificationError> {
        let mut segments = token.split('.');
        let (Some(header_segment), Some(claims_segment), Some(signature_segment), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(VerificationError::Malformed);
        };

        let header_bytes = URL_SAFE_NO_PAD
            .decode(header_segment)
            .map_err(|_| VerificationError::Malformed)?;
        let header: Header =
            serde_json::from_slice(&header_bytes).map_err(|_| VerificationError::Malformed)?;
        if header.alg != ALGORITHM {
            return Err(VerificationError::Unsupported);
        }

        let provided_signature = URL_SAFE_NO_PAD
            .decode(signature_segment)
            .map_err(|_| VerificationError::Malformed)?;
        let message = format!("{header_segment}.{claims_segment}");
        let expected_signature = self.sign(message.as_bytes());
        if !constant_time_eq::constant_time_eq(&provided_signature, &expected_signature) {
            return Err(VerificationError::BadSignature);
        }

        // Only now is the claims segment trusted enough to deserialize.
        let claims_bytes = URL_SAFE_NO_PAD
            .decode(claims_segment)
            .map_err(|_| VerificationError::Malformed)?;
        let claims: Claims =
            serde_json::from_slice(&claims_bytes).map_err(|_| VerificationError::Malformed)?;

        if self.clock.now() >= claims.exp {
            return Err(VerificationError::Expired);
        }

        Ok(claims)
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(message);
        mac.finalize().into_bytes().to_vec()
    }
}

fn encode_json<T: Serialize>(value: &T) -> Result<String, VerificationError> {
    let bytes = serde_json::to_vec(value).map_err(|_| VerificationError::Malformed)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}
