//! Processed-event ledger: per-service deduplication of delivered envelopes.
//!
//! The bus delivers at-least-once, so every consuming service records the
//! identity of each envelope it has applied. The ledger must live inside the
//! same critical section as the state it guards: a handler that mutates
//! state checks-then-records in one lock acquisition, making the mutation
//! idempotent under redelivery. A ledger entry without the mutation (or the
//! reverse) would defeat the whole point, which is why the ledger is plain
//! owned state rather than a service of its own.

use crate::envelope::EventIdentity;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Record of envelope identities a service has already applied.
#[derive(Debug, Default, Clone)]
pub struct ProcessedEventLedger {
    entries: HashMap<EventIdentity, DateTime<Utc>>,
}

impl ProcessedEventLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this identity has been applied before.
    #[must_use]
    pub fn already_processed(&self, identity: &EventIdentity) -> bool {
        self.entries.contains_key(identity)
    }

    /// Record an identity as processed.
    pub fn record(&mut self, identity: EventIdentity, processed_at: DateTime<Utc>) {
        self.entries.insert(identity, processed_at);
    }

    /// Check-then-record in one step. Returns `true` if the identity was
    /// fresh (the caller should apply the mutation), `false` if it was a
    /// duplicate (the caller must not mutate).
    pub fn check_and_record(
        &mut self,
        identity: EventIdentity,
        processed_at: DateTime<Utc>,
    ) -> bool {
        if self.entries.contains_key(&identity) {
            return false;
        }
        self.entries.insert(identity, processed_at);
        true
    }

    /// Number of recorded identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ledger is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn identity(seq: u64) -> EventIdentity {
        EventIdentity {
            event_type: "PaymentSucceeded.v1".to_string(),
            aggregate_id: Uuid::nil(),
            sequence: seq,
        }
    }

    #[test]
    fn first_check_is_fresh_second_is_duplicate() {
        let mut ledger = ProcessedEventLedger::new();
        let now = Utc::now();

        assert!(ledger.check_and_record(identity(1), now));
        assert!(!ledger.check_and_record(identity(1), now));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn different_sequences_are_distinct_facts() {
        let mut ledger = ProcessedEventLedger::new();
        let now = Utc::now();

        assert!(ledger.check_and_record(identity(1), now));
        assert!(ledger.check_and_record(identity(2), now));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn already_processed_does_not_record() {
        let mut ledger = ProcessedEventLedger::new();
        assert!(!ledger.already_processed(&identity(1)));
        assert!(ledger.is_empty());
    }
}
