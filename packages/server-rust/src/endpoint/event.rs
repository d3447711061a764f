//! Event declarations attached to endpoints.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::context::EventContext;
use crate::publisher::PublishedEvent;

type ProjectFn = dyn for<'a> Fn(&EventContext<'a>) -> Value + Send + Sync;
type GateFn = dyn for<'a> Fn(&EventContext<'a>) -> bool + Send + Sync;

/// One event an endpoint emits after a successful response: a type tag, a
/// payload projection, and an optional gate (defaults to always).
#[derive(Clone)]
pub struct EventDeclaration {
    event_type: String,
    project: Arc<ProjectFn>,
    when: Option<Arc<GateFn>>,
}

impl EventDeclaration {
    pub fn new<F>(event_type: impl Into<String>, project: F) -> Self
    where
        F: for<'a> Fn(&EventContext<'a>) -> Value + Send + Sync + 'static,
    {
        Self {
            event_type: event_type.into(),
            project: Arc::new(project),
            when: None,
        }
    }

    /// Only publish when `gate` returns true for the call.
    #[must_use]
    pub fn when<F>(mut self, gate: F) -> Self
    where
        F: for<'a> Fn(&EventContext<'a>) -> bool + Send + Sync + 'static,
    {
        self.when = Some(Arc::new(gate));
        self
    }

    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Whether the gate (if any) lets this call publish.
    #[must_use]
    pub fn should_publish(&self, ctx: &EventContext<'_>) -> bool {
        self.when.as_ref().map_or(true, |gate| gate(ctx))
    }

    /// Build the event from the call's input and output.
    #[must_use]
    pub fn project(&self, ctx: &EventContext<'_>) -> PublishedEvent {
        PublishedEvent::new(self.event_type.clone(), (self.project)(ctx))
    }
}

impl fmt::Debug for EventDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDeclaration")
            .field("event_type", &self.event_type)
            .field("gated", &self.when.is_some())
            .finish_non_exhaustive()
    }
}
