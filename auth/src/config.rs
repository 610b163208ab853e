//! Env-driven token configuration.

use std::env;

/// Token signing configuration shared by all services.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Symmetric secret used to sign and verify tokens. Must be identical
    /// in every service process.
    pub secret: String,
    /// Token lifetime in seconds (default: 24 hours).
    pub ttl_seconds: u64,
}

impl TokenConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            secret: env::var("AUTH_JWT_SECRET")
                .unwrap_or_else(|_| "dev-secret-change-in-production".to_string()),
            ttl_seconds: env::var("AUTH_TOKEN_TTL_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(86_400),
        }
    }

    /// Token lifetime as a chrono duration.
    #[must_use]
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_converts_to_duration() {
        let config = TokenConfig {
            secret: "s".to_string(),
            ttl_seconds: 900,
        };
        assert_eq!(config.ttl(), chrono::Duration::minutes(15));
    }
}
