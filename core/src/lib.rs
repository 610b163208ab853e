//! # Evently Core
//!
//! Shared kernel for the Evently event-booking platform.
//!
//! Evently is a set of independent services (booking, payment, notification)
//! that own disjoint data and agree on the lifecycle of a purchase through a
//! choreographed saga: state transitions propagate across service boundaries
//! as events on a durable bus, never as synchronous calls.
//!
//! This crate holds everything the services must agree on:
//!
//! - **Ids and money** - strongly typed identifiers and currency-tagged
//!   amounts shared by every payload
//! - **Envelope and contracts** - the wire unit flowing through the bus and
//!   the typed payloads for each topic
//! - **`EventBus`** - the publish/subscribe abstraction implemented by
//!   `evently-bus` (Redpanda) and `evently-testing` (in-memory)
//! - **Ledger and outbox** - the idempotency and dual-write primitives every
//!   service embeds in its state
//! - **`DomainError`** - the shared error taxonomy
//!
//! ## Delivery model
//!
//! The bus provides at-least-once delivery, ordered per partition key
//! (aggregate id). Handlers must be idempotent: every service records the
//! identity of each processed envelope in a [`ledger::ProcessedEventLedger`]
//! inside the same critical section as its state mutation, so redelivery is
//! a no-op.

pub mod clock;
pub mod contracts;
pub mod envelope;
pub mod error;
pub mod event_bus;
pub mod ids;
pub mod ledger;
pub mod money;
pub mod outbox;

pub use chrono::{DateTime, Utc};
pub use clock::{Clock, SystemClock};
pub use error::DomainError;
