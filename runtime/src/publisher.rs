//! Shared publish-with-retry for staged outbox envelopes.

use crate::retry::{RetryPolicy, retry_with_backoff};
use evently_core::envelope::{Envelope, EventIdentity};
use evently_core::event_bus::EventBus;

/// Publish staged envelopes with bounded retries, returning the identities
/// the broker acknowledged so the caller can mark them published.
///
/// Failures are logged and skipped: the state change each envelope
/// describes has already committed, and the outbox sweep will re-offer
/// anything that stays unacknowledged.
pub async fn publish_envelopes(
    bus: &dyn EventBus,
    policy: &RetryPolicy,
    envelopes: &[Envelope],
) -> Vec<EventIdentity> {
    let mut published = Vec::with_capacity(envelopes.len());

    for envelope in envelopes {
        let topic = envelope.topic();
        let key = envelope.partition_key();
        let result =
            retry_with_backoff(policy, || bus.publish(topic, &key, envelope)).await;

        match result {
            Ok(()) => published.push(envelope.identity()),
            Err(e) => {
                tracing::warn!(
                    topic,
                    identity = %envelope.identity(),
                    error = %e,
                    "publish failed, envelope left staged for sweep"
                );
            }
        }
    }

    published
}
