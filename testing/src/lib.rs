//! # Evently Testing
//!
//! Testing utilities shared across the Evently workspace:
//!
//! - [`mocks::FixedClock`] - deterministic time for state-machine tests
//! - [`event_bus::InMemoryEventBus`] - an [`EventBus`] implementation with
//!   the same observable semantics as the Redpanda bus (per-key ordering,
//!   at-least-once) plus test-only fault injection: duplicated deliveries,
//!   manual out-of-order injection, and scripted publish failures
//!
//! [`EventBus`]: evently_core::event_bus::EventBus

pub mod event_bus;
pub mod mocks;

pub use event_bus::InMemoryEventBus;
pub use mocks::{FixedClock, ManualClock, test_clock};
