//! In-memory [`EventPublisher`] that records every published batch.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::PublishedEvent;
use crate::traits::EventPublisher;

/// Records published events. Clones share the same log.
///
/// Can be switched into a failing mode to exercise publication error paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryPublisher {
    batches: Arc<Mutex<Vec<Vec<PublishedEvent>>>>,
    fail_with: Arc<Mutex<Option<String>>>,
}

impl MemoryPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `publish` calls fail with `message`.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.fail_with.lock() = Some(message.into());
    }

    /// All events published so far, flattened in publish order.
    #[must_use]
    pub fn events(&self) -> Vec<PublishedEvent> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    /// Number of `publish` calls that succeeded.
    #[must_use]
    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }
}

#[async_trait]
impl EventPublisher for MemoryPublisher {
    async fn publish(&self, events: Vec<PublishedEvent>) -> anyhow::Result<()> {
        if let Some(message) = self.fail_with.lock().clone() {
            anyhow::bail!(message);
        }
        self.batches.lock().push(events);
        Ok(())
    }
}
