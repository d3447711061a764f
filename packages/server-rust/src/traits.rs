use std::fmt;

use async_trait::async_trait;

use crate::pipeline::rate_limit::{RateLimitDecision, RateLimitPolicy};
use crate::publisher::PublishedEvent;

/// Read access to environment configuration for service registration.
/// Implementations: `Environment` (runtime), the sniffer's recording source.
pub trait ConfigSource: Send + Sync + fmt::Debug {
    /// Look up a configuration value.
    fn get(&self, key: &str) -> Option<String>;

    /// Look up a value that must be present.
    ///
    /// # Errors
    ///
    /// Returns an error naming `key` when it is not set.
    fn require(&self, key: &str) -> anyhow::Result<String> {
        self.get(key)
            .ok_or_else(|| anyhow::anyhow!("missing required environment variable `{key}`"))
    }

    /// Whether reads are being recorded for static analysis rather than
    /// served from real configuration.
    fn is_recording(&self) -> bool {
        false
    }
}

/// Delivers domain events after a successful response.
/// Implementations: null (discard), memory (tests, local dev), webhook.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a batch of events, preserving order.
    async fn publish(&self, events: Vec<PublishedEvent>) -> anyhow::Result<()>;
}

/// Checks and records usage against a rate-limit policy.
///
/// `check_and_record` must be atomic per key: two concurrent calls for the
/// same key never both observe the last remaining slot.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check_and_record(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
    ) -> anyhow::Result<RateLimitDecision>;
}
