//! Dead-letter queue for poison envelopes.
//!
//! An envelope whose handler keeps failing is parked here after its retry
//! budget is exhausted, instead of being retried forever and blocking its
//! partition. Parked envelopes are operator-visible state: the remaining
//! recourse is manual inspection and either resolution (reprocessed out of
//! band) or discard. There is no automatic compensating transaction.

use chrono::{DateTime, Utc};
use evently_core::envelope::Envelope;
use std::sync::Mutex;
use thiserror::Error;

/// Errors for dead-letter queue operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DlqError {
    /// No entry with the given id.
    #[error("dead-letter entry not found: {0}")]
    EntryNotFound(u64),
}

/// Status of a parked envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DlqStatus {
    /// Awaiting investigation.
    Pending,
    /// Reprocessed or otherwise handled.
    Resolved,
    /// Permanently discarded (cannot be fixed).
    Discarded,
}

impl DlqStatus {
    /// Stable string form for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }
}

/// A parked envelope with its failure metadata.
#[derive(Debug, Clone)]
pub struct FailedEnvelope {
    /// Unique entry id.
    pub id: u64,
    /// The envelope that failed.
    pub envelope: Envelope,
    /// Human-readable error from the last attempt.
    pub error_message: String,
    /// Number of handler attempts before parking.
    pub attempts: usize,
    /// When the envelope was parked.
    pub parked_at: DateTime<Utc>,
    /// Current status.
    pub status: DlqStatus,
    /// Notes recorded on resolution or discard.
    pub resolution_notes: Option<String>,
}

/// Parking lot for envelopes that exhausted their retry budget.
pub trait DeadLetterQueue: Send + Sync {
    /// Park a failed envelope. Returns the entry id.
    fn park(
        &self,
        envelope: Envelope,
        error_message: String,
        attempts: usize,
        parked_at: DateTime<Utc>,
    ) -> u64;

    /// All entries still pending investigation, oldest first.
    fn pending(&self) -> Vec<FailedEnvelope>;

    /// Mark an entry resolved.
    ///
    /// # Errors
    ///
    /// Returns [`DlqError::EntryNotFound`] for an unknown id.
    fn resolve(&self, id: u64, notes: &str) -> Result<(), DlqError>;

    /// Mark an entry permanently discarded.
    ///
    /// # Errors
    ///
    /// Returns [`DlqError::EntryNotFound`] for an unknown id.
    fn discard(&self, id: u64, reason: &str) -> Result<(), DlqError>;

    /// Number of pending entries; a health signal for operators.
    fn count_pending(&self) -> usize;
}

/// In-process dead-letter queue.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterQueue {
    entries: Mutex<Vec<FailedEnvelope>>,
}

impl InMemoryDeadLetterQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut Vec<FailedEnvelope>) -> T) -> T {
        let mut guard = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut guard)
    }
}

impl DeadLetterQueue for InMemoryDeadLetterQueue {
    fn park(
        &self,
        envelope: Envelope,
        error_message: String,
        attempts: usize,
        parked_at: DateTime<Utc>,
    ) -> u64 {
        let entry = self.with_entries(|entries| {
            let id = entries.len() as u64 + 1;
            entries.push(FailedEnvelope {
                id,
                envelope: envelope.clone(),
                error_message: error_message.clone(),
                attempts,
                parked_at,
                status: DlqStatus::Pending,
                resolution_notes: None,
            });
            id
        });

        tracing::warn!(
            dlq_id = entry,
            event_type = %envelope.event_type,
            aggregate_id = %envelope.aggregate_id,
            error = %error_message,
            attempts,
            "envelope parked in dead-letter queue"
        );
        metrics::counter!("dlq.parked", "event_type" => envelope.event_type).increment(1);

        entry
    }

    fn pending(&self) -> Vec<FailedEnvelope> {
        self.with_entries(|entries| {
            entries
                .iter()
                .filter(|e| e.status == DlqStatus::Pending)
                .cloned()
                .collect()
        })
    }

    fn resolve(&self, id: u64, notes: &str) -> Result<(), DlqError> {
        self.with_entries(|entries| {
            let entry = entries
                .iter_mut()
                .find(|e| e.id == id)
                .ok_or(DlqError::EntryNotFound(id))?;
            entry.status = DlqStatus::Resolved;
            entry.resolution_notes = Some(notes.to_string());
            Ok(())
        })?;

        tracing::info!(dlq_id = id, "dead-letter entry resolved");
        metrics::counter!("dlq.resolved").increment(1);
        Ok(())
    }

    fn discard(&self, id: u64, reason: &str) -> Result<(), DlqError> {
        self.with_entries(|entries| {
            let entry = entries
                .iter_mut()
                .find(|e| e.id == id)
                .ok_or(DlqError::EntryNotFound(id))?;
            entry.status = DlqStatus::Discarded;
            entry.resolution_notes = Some(reason.to_string());
            Ok(())
        })?;

        tracing::warn!(dlq_id = id, reason, "dead-letter entry discarded");
        metrics::counter!("dlq.discarded").increment(1);
        Ok(())
    }

    fn count_pending(&self) -> usize {
        self.with_entries(|entries| {
            entries
                .iter()
                .filter(|e| e.status == DlqStatus::Pending)
                .count()
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use evently_core::contracts::{BookingCreated, EventPayload};
    use evently_core::envelope::ServiceName;
    use evently_core::ids::{BookingId, EventId, UserId};

    fn envelope() -> Envelope {
        Envelope::new(
            ServiceName::Booking,
            1,
            Utc::now(),
            EventPayload::BookingCreated(BookingCreated {
                booking_id: BookingId::new(),
                user_id: UserId::new(),
                event_id: EventId::new(),
                seats: 1,
            }),
        )
    }

    #[test]
    fn parked_entries_are_pending() {
        let dlq = InMemoryDeadLetterQueue::new();
        let id = dlq.park(envelope(), "handler kept failing".to_string(), 4, Utc::now());

        assert_eq!(dlq.count_pending(), 1);
        assert_eq!(dlq.pending()[0].id, id);
        assert_eq!(dlq.pending()[0].attempts, 4);
    }

    #[test]
    fn resolving_removes_from_pending() {
        let dlq = InMemoryDeadLetterQueue::new();
        let id = dlq.park(envelope(), "boom".to_string(), 4, Utc::now());

        dlq.resolve(id, "replayed manually").unwrap();
        assert_eq!(dlq.count_pending(), 0);
    }

    #[test]
    fn discard_records_reason() {
        let dlq = InMemoryDeadLetterQueue::new();
        let id = dlq.park(envelope(), "boom".to_string(), 4, Utc::now());

        dlq.discard(id, "schema mismatch, unfixable").unwrap();
        assert_eq!(dlq.count_pending(), 0);
    }

    #[test]
    fn unknown_entry_is_an_error() {
        let dlq = InMemoryDeadLetterQueue::new();
        assert_eq!(dlq.resolve(99, "x"), Err(DlqError::EntryNotFound(99)));
    }
}
