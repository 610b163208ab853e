//! Delivery collaborator contract and development senders.
//!
//! Actual email/SMS transmission is an external concern; the projector only
//! needs something that accepts a message or says it could not.

use crate::types::Notification;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// Delivery failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("delivery failed: {0}")]
pub struct SendError(pub String);

/// Hands a derived message to the delivery infrastructure.
pub trait NotificationSender: Send + Sync {
    /// Attempt to deliver one message.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] if the delivery infrastructure rejects the
    /// message; the projector retries up to its bounded budget.
    fn send(
        &self,
        notification: &Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), SendError>> + Send + '_>>;
}

/// Development sender that writes messages to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSender;

impl ConsoleSender {
    /// Creates a console sender.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl NotificationSender for ConsoleSender {
    fn send(
        &self,
        notification: &Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), SendError>> + Send + '_>> {
        let notification = notification.clone();
        Box::pin(async move {
            tracing::info!(
                notification_id = %notification.id,
                recipient = %notification.recipient,
                channel = ?notification.channel,
                subject = %notification.subject,
                body = %notification.body,
                "notification delivered to console"
            );
            Ok(())
        })
    }
}

/// Test sender that fails the first `n` sends, then succeeds.
#[derive(Debug, Default)]
pub struct FlakySender {
    remaining_failures: AtomicUsize,
}

impl FlakySender {
    /// Creates a sender that fails the first `n` deliveries.
    #[must_use]
    pub const fn failing(n: usize) -> Self {
        Self {
            remaining_failures: AtomicUsize::new(n),
        }
    }
}

impl NotificationSender for FlakySender {
    fn send(
        &self,
        _notification: &Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), SendError>> + Send + '_>> {
        Box::pin(async move {
            let remaining = self.remaining_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(SendError("smtp connection refused".to_string()));
            }
            Ok(())
        })
    }
}
