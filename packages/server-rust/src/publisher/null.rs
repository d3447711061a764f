//! No-op [`EventPublisher`] implementation.

use async_trait::async_trait;

use super::PublishedEvent;
use crate::traits::EventPublisher;

/// Discards all events. This is the default publisher when no event bus is
/// configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPublisher;

#[async_trait]
impl EventPublisher for NullPublisher {
    async fn publish(&self, _events: Vec<PublishedEvent>) -> anyhow::Result<()> {
        Ok(())
    }
}
