//! Event publisher implementations.
//!
//! - [`NullPublisher`]: discards every event
//! - [`MemoryPublisher`]: records events in memory (tests, local development)
//! - [`WebhookPublisher`]: POSTs each batch as JSON to an HTTP endpoint

pub mod memory;
pub mod null;
pub mod webhook;

pub use memory::MemoryPublisher;
pub use null::NullPublisher;
pub use webhook::WebhookPublisher;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A domain event emitted after a successful response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedEvent {
    /// Event type tag (e.g. `"user.created"`).
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Value,
}

impl PublishedEvent {
    #[must_use]
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}
