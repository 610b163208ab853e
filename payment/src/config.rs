//! Env-driven payment service configuration.

use evently_core::money::Currency;
use std::env;

/// Payment service settings.
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    /// Secret shared with the gateway for webhook signature verification.
    pub webhook_secret: String,
    /// Per-seat price in minor units, used when a payment is initiated from
    /// a `booking.created` event rather than an explicit API amount.
    pub seat_price_minor: u64,
    /// Currency for event-driven pricing.
    pub currency: Currency,
    /// Settlement callbacks are rejected once a payment has been pending
    /// longer than this window (minutes).
    pub callback_window_minutes: i64,
    /// Timeout for inline gateway calls (seconds).
    pub gateway_timeout_secs: u64,
}

impl PaymentConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            webhook_secret: env::var("PAYMENT_WEBHOOK_SECRET")
                .unwrap_or_else(|_| "dev-webhook-secret".to_string()),
            seat_price_minor: env::var("PAYMENT_SEAT_PRICE_MINOR")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(25_000),
            currency: env::var("PAYMENT_CURRENCY")
                .ok()
                .and_then(|s| Currency::parse(&s))
                .unwrap_or(Currency::Inr),
            callback_window_minutes: env::var("PAYMENT_CALLBACK_WINDOW_MINUTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(15),
            gateway_timeout_secs: env::var("PAYMENT_GATEWAY_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
        }
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
