//! [`EventPublisher`] that delivers batches to an HTTP endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::PublishedEvent;
use crate::traits::EventPublisher;

#[derive(Serialize)]
struct Batch<'a> {
    events: &'a [PublishedEvent],
}

/// POSTs `{"events": [...]}` to a fixed URL. Any non-2xx response is an error.
#[derive(Debug, Clone)]
pub struct WebhookPublisher {
    client: reqwest::Client,
    url: String,
}

impl WebhookPublisher {
    /// Create a publisher with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built (e.g. TLS backend
    /// initialization failure).
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EventPublisher for WebhookPublisher {
    async fn publish(&self, events: Vec<PublishedEvent>) -> anyhow::Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let response = self
            .client
            .post(&self.url)
            .json(&Batch { events: &events })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("event webhook {} responded with {status}", self.url);
        }
        Ok(())
    }
}
