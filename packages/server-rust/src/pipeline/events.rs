//! Post-success event publication.
//!
//! Gates and projections run synchronously against the response. The
//! resulting batch is handed to a detached [`PublishTask`] that logs its own
//! failures; the request only waits for it up to a bounded duration.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{debug, error, Instrument};

use crate::endpoint::{EventContext, EventDeclaration};
use crate::publisher::PublishedEvent;
use crate::traits::EventPublisher;

/// Evaluate every declaration against `ctx`, in declaration order.
///
/// A gate or projection that panics drops only its own event.
pub(crate) fn collect(declarations: &[EventDeclaration], ctx: &EventContext<'_>) -> Vec<PublishedEvent> {
    declarations
        .iter()
        .filter_map(|declaration| {
            let evaluated = catch_unwind(AssertUnwindSafe(|| {
                declaration
                    .should_publish(ctx)
                    .then(|| declaration.project(ctx))
            }));
            evaluated.unwrap_or_else(|panic| {
                error!(
                    event_type = declaration.event_type(),
                    panic = %panic_message(&*panic),
                    "event projection panicked"
                );
                None
            })
        })
        .collect()
}

/// How a publish attempt ended from the request's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStatus {
    Completed,
    Failed,
    /// Still running after the wait elapsed; it finishes in the background.
    Detached,
}

/// Handle to a detached publish task.
#[derive(Debug)]
pub struct PublishTask {
    handle: JoinHandle<bool>,
}

impl PublishTask {
    /// Start publishing `events` in the background, inside the current span.
    #[must_use]
    pub fn spawn(publisher: Arc<dyn EventPublisher>, events: Vec<PublishedEvent>) -> Self {
        let task = async move {
            let count = events.len();
            let types: Vec<String> = events.iter().map(|e| e.event_type.clone()).collect();
            match AssertUnwindSafe(publisher.publish(events)).catch_unwind().await {
                Ok(Ok(())) => {
                    for event_type in types {
                        counter!("waypoint_events_published_total", "event_type" => event_type).increment(1);
                    }
                    debug!(count, "events published");
                    true
                }
                Ok(Err(err)) => {
                    let chain = format!("{err:#}");
                    error!(count, error = %chain, "event publication failed");
                    false
                }
                Err(panic) => {
                    error!(count, panic = %panic_message(&*panic), "event publisher panicked");
                    false
                }
            }
        };
        Self {
            handle: tokio::spawn(task.in_current_span()),
        }
    }

    /// Wait at most `limit` for the task. Dropping the handle on timeout
    /// leaves the task running.
    pub async fn wait(self, limit: Duration) -> PublishStatus {
        match tokio::time::timeout(limit, self.handle).await {
            Ok(Ok(true)) => PublishStatus::Completed,
            Ok(Ok(false)) => PublishStatus::Failed,
            Ok(Err(join)) => {
                error!(error = %join, "event publication task aborted");
                PublishStatus::Failed
            }
            Err(_) => {
                debug!(wait = ?limit, "event publication still running, detaching");
                PublishStatus::Detached
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
