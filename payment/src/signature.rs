//! Webhook signature verification.
//!
//! The gateway signs each callback with HMAC-SHA256 over
//! `order_id|gateway_payment_id` using a secret shared with this service,
//! hex-encoded. Verification recomputes the expected value locally and
//! compares in constant time; a mismatch fails closed with no state change.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Computes and checks gateway callback signatures.
#[derive(Clone)]
pub struct WebhookSigner {
    mac: HmacSha256,
}

impl WebhookSigner {
    /// Create a signer over the gateway webhook secret.
    ///
    /// # Panics
    ///
    /// HMAC-SHA256 accepts keys of any length, so key setup cannot actually
    /// fail.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let mac = HmacSha256::new_from_slice(secret.as_ref())
            .expect("HMAC-SHA256 accepts keys of any length");
        Self { mac }
    }

    /// Hex-encoded signature for a callback, as the gateway would compute
    /// it. Used by tests and the mock gateway.
    #[must_use]
    pub fn sign(&self, order_id: &str, gateway_payment_id: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(order_id.as_bytes());
        mac.update(b"|");
        mac.update(gateway_payment_id.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Whether a provided signature matches the expected one.
    ///
    /// The comparison runs over the decoded bytes in constant time; a
    /// signature that is not valid hex can never match.
    #[must_use]
    pub fn verify(&self, order_id: &str, gateway_payment_id: &str, signature: &str) -> bool {
        let Ok(provided) = hex::decode(signature) else {
            return false;
        };

        let mut mac = self.mac.clone();
        mac.update(order_id.as_bytes());
        mac.update(b"|");
        mac.update(gateway_payment_id.as_bytes());
        let expected = mac.finalize().into_bytes();

        constant_time_eq::constant_time_eq(&provided, &expected)
    }
}
