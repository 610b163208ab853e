//! Env-driven configuration for the Redpanda event bus.

use std::env;

/// Broker and consumer settings, loaded from environment variables with
/// development defaults.
#[derive(Debug, Clone)]
pub struct RedpandaConfig {
    /// Broker addresses (comma-separated).
    pub brokers: String,
    /// Consumer group for this service's subscriptions.
    pub consumer_group: Option<String>,
    /// Producer acknowledgment mode ("0", "1", "all").
    pub producer_acks: String,
    /// Producer message timeout in milliseconds.
    pub message_timeout_ms: u64,
    /// Channel capacity between consumer task and subscriber.
    pub buffer_size: usize,
    /// Where new consumer groups start reading ("earliest", "latest").
    pub auto_offset_reset: String,
}

impl RedpandaConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            brokers: env::var("REDPANDA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string()),
            consumer_group: env::var("CONSUMER_GROUP").ok(),
            producer_acks: env::var("REDPANDA_PRODUCER_ACKS")
                .unwrap_or_else(|_| "all".to_string()),
            message_timeout_ms: env::var("REDPANDA_MESSAGE_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5000),
            buffer_size: env::var("REDPANDA_BUFFER_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
            auto_offset_reset: env::var("REDPANDA_AUTO_OFFSET_RESET")
                .unwrap_or_else(|_| "earliest".to_string()),
        }
    }

    /// Derive a copy of this config with the consumer group set for one
    /// service ("booking-service", "payment-service", ...).
    #[must_use]
    pub fn for_service(&self, service: &str) -> Self {
        let mut config = self.clone();
        config.consumer_group = Some(format!("{service}-service"));
        config
    }
}

impl Default for RedpandaConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_service_sets_consumer_group() {
        let config = RedpandaConfig {
            brokers: "localhost:9092".to_string(),
            consumer_group: None,
            producer_acks: "all".to_string(),
            message_timeout_ms: 5000,
            buffer_size: 1000,
            auto_offset_reset: "earliest".to_string(),
        };
        let derived = config.for_service("booking");
        assert_eq!(derived.consumer_group.as_deref(), Some("booking-service"));
    }
}
