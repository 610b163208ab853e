//! # Evently Payment
//!
//! The payment service owns the Payment aggregate and its lifecycle:
//!
//! ```text
//! PENDING --(gateway callback: success, signature verified)--> SUCCESS
//! PENDING --(gateway callback: failure)--> FAILED
//! SUCCESS --(refund request)--> REFUNDED
//! FAILED, REFUNDED, SUCCESS --(duplicate callback)--> unchanged
//! ```
//!
//! Payments are created either by an explicit `initiate` call or by
//! consuming `booking.created` from the bus; exactly one payment may exist
//! per booking. Settlement happens through gateway callbacks whose
//! signature is recomputed locally with a keyed hash and compared in
//! constant time - a mismatch changes nothing and is logged as a security
//! event. Outcome events (`payment.success`, `payment.failed`,
//! `payment.refund`) go out through the service's outbox.

pub mod config;
pub mod gateway;
pub mod service;
pub mod signature;
pub mod types;

pub use config::PaymentConfig;
pub use gateway::{GatewayError, MockGateway, PaymentGateway};
pub use service::PaymentService;
pub use signature::WebhookSigner;
pub use types::{Payment, PaymentMethod, PaymentStatus};
