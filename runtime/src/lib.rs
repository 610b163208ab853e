//! # Evently Runtime
//!
//! The consumer-side runtime shared by every Evently service:
//!
//! - [`consumer::EventConsumer`] - subscribe-process-reconnect loop with a
//!   keyed worker pool, bounded per-envelope retries, dead-lettering, and
//!   graceful shutdown
//! - [`retry`] - exponential backoff for transient failures
//! - [`dead_letter`] - parking lot for poison envelopes that exhausted their
//!   retry budget
//! - [`publisher`] - publish-with-retry for staged outbox envelopes

pub mod consumer;
pub mod dead_letter;
pub mod publisher;
pub mod retry;

pub use consumer::{EventConsumer, EventHandler};
pub use dead_letter::{DeadLetterQueue, DlqStatus, FailedEnvelope, InMemoryDeadLetterQueue};
pub use publisher::publish_envelopes;
pub use retry::RetryPolicy;
