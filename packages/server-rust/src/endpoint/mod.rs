//! Endpoint definitions: one immutable description per route.
//!
//! An [`Endpoint`] bundles a method and path pattern with optional input and
//! output shapes, declared service dependencies, session/authorization
//! functions, a rate-limit policy, event declarations, and the handler.
//! Build one with [`Endpoint::get`] (etc.) and finish with
//! [`EndpointBuilder::handle`].

pub mod context;
pub mod event;

pub use context::{AuthContext, EventContext, HandlerContext, SessionContext};
pub use event::EventDeclaration;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use http::{Method, StatusCode};
use serde_json::Value;
use waypoint_core::{Schema, SchemaRef};

use crate::pipeline::rate_limit::RateLimitPolicy;
use crate::service::ServiceDescriptor;

pub(crate) type HandlerFn =
    dyn Fn(HandlerContext) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync;
pub(crate) type SessionFn =
    dyn Fn(SessionContext) -> BoxFuture<'static, anyhow::Result<Option<Value>>> + Send + Sync;
pub(crate) type AuthorizeFn =
    dyn Fn(AuthContext) -> BoxFuture<'static, anyhow::Result<bool>> + Send + Sync;

/// Marker that starts a path parameter segment (`/jobs/:id`).
pub const PARAM_MARKER: char = ':';

/// Immutable description of one route. Shared as `Arc<Endpoint>` across
/// concurrent invocations.
pub struct Endpoint {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) description: String,
    pub(crate) body: Option<SchemaRef>,
    pub(crate) query: Option<SchemaRef>,
    pub(crate) params: Option<SchemaRef>,
    pub(crate) output: Option<SchemaRef>,
    pub(crate) services: Vec<ServiceDescriptor>,
    pub(crate) session: Option<Arc<SessionFn>>,
    pub(crate) authorize: Option<Arc<AuthorizeFn>>,
    pub(crate) rate_limit: Option<RateLimitPolicy>,
    pub(crate) events: Vec<EventDeclaration>,
    pub(crate) success_status: StatusCode,
    pub(crate) handler: Arc<HandlerFn>,
}

impl Endpoint {
    /// Start building an endpoint for `method` and `path`.
    #[must_use]
    pub fn builder(method: Method, path: impl Into<String>) -> EndpointBuilder {
        EndpointBuilder::new(method, path.into())
    }

    /// Start a `GET` endpoint.
    #[must_use]
    pub fn get(path: impl Into<String>) -> EndpointBuilder {
        Self::builder(Method::GET, path)
    }

    /// Start a `POST` endpoint.
    #[must_use]
    pub fn post(path: impl Into<String>) -> EndpointBuilder {
        Self::builder(Method::POST, path)
    }

    /// Start a `PUT` endpoint.
    #[must_use]
    pub fn put(path: impl Into<String>) -> EndpointBuilder {
        Self::builder(Method::PUT, path)
    }

    /// Start a `PATCH` endpoint.
    #[must_use]
    pub fn patch(path: impl Into<String>) -> EndpointBuilder {
        Self::builder(Method::PATCH, path)
    }

    /// Start a `DELETE` endpoint.
    #[must_use]
    pub fn delete(path: impl Into<String>) -> EndpointBuilder {
        Self::builder(Method::DELETE, path)
    }

    /// HTTP method this endpoint answers.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path pattern, e.g. `/users/:id`.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Free-text description; empty when none was given.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Services resolved before validation, in declaration order.
    #[must_use]
    pub fn services(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    /// Events published after a successful call.
    #[must_use]
    pub fn events(&self) -> &[EventDeclaration] {
        &self.events
    }

    /// Status returned when the handler succeeds.
    #[must_use]
    pub fn success_status(&self) -> StatusCode {
        self.success_status
    }

    /// Rate limit policy, if any.
    #[must_use]
    pub fn rate_limit(&self) -> Option<&RateLimitPolicy> {
        self.rate_limit.as_ref()
    }

    /// Names of the path parameters in declaration order.
    #[must_use]
    pub fn param_names(&self) -> Vec<&str> {
        self.path
            .split('/')
            .filter_map(|segment| segment.strip_prefix(PARAM_MARKER))
            .collect()
    }

    /// Example response body generated from the output shape, if declared.
    #[must_use]
    pub fn example_output(&self) -> Option<Value> {
        self.output.as_ref().map(|schema| schema.mock())
    }

    /// Whether the handler's output is serialized into the response body.
    pub(crate) fn has_output_schema(&self) -> bool {
        self.output.is_some()
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("description", &self.description)
            .field("services", &self.services.iter().map(ServiceDescriptor::name).collect::<Vec<_>>())
            .field("events", &self.events.iter().map(EventDeclaration::event_type).collect::<Vec<_>>())
            .field("success_status", &self.success_status)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Endpoint`]. Every setter is optional except the handler.
pub struct EndpointBuilder {
    method: Method,
    path: String,
    description: String,
    body: Option<SchemaRef>,
    query: Option<SchemaRef>,
    params: Option<SchemaRef>,
    output: Option<SchemaRef>,
    services: Vec<ServiceDescriptor>,
    session: Option<Arc<SessionFn>>,
    authorize: Option<Arc<AuthorizeFn>>,
    rate_limit: Option<RateLimitPolicy>,
    events: Vec<EventDeclaration>,
    success_status: StatusCode,
}

impl EndpointBuilder {
    fn new(method: Method, path: String) -> Self {
        Self {
            method,
            path,
            description: String::new(),
            body: None,
            query: None,
            params: None,
            output: None,
            services: Vec::new(),
            session: None,
            authorize: None,
            rate_limit: None,
            events: Vec::new(),
            success_status: StatusCode::OK,
        }
    }

    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Schema the JSON body must satisfy. Unset means the body is ignored.
    #[must_use]
    pub fn body(mut self, schema: impl Schema + 'static) -> Self {
        self.body = Some(Arc::new(schema));
        self
    }

    /// Schema for the query string object.
    #[must_use]
    pub fn query(mut self, schema: impl Schema + 'static) -> Self {
        self.query = Some(Arc::new(schema));
        self
    }

    /// Schema for the path parameters.
    #[must_use]
    pub fn params(mut self, schema: impl Schema + 'static) -> Self {
        self.params = Some(Arc::new(schema));
        self
    }

    /// Schema the handler output must satisfy; extra fields are stripped.
    #[must_use]
    pub fn output(mut self, schema: impl Schema + 'static) -> Self {
        self.output = Some(Arc::new(schema));
        self
    }

    /// Declare the services resolved for every call, in order.
    #[must_use]
    pub fn services<I>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = ServiceDescriptor>,
    {
        self.services.extend(services);
        self
    }

    /// Resolve a session value from headers, cookies and services. Returning
    /// `Ok(None)` means "no session", which is not an error.
    #[must_use]
    pub fn session<F, Fut>(mut self, resolve: F) -> Self
    where
        F: Fn(SessionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<Value>>> + Send + 'static,
    {
        self.session = Some(Arc::new(move |ctx: SessionContext| resolve(ctx).boxed()));
        self
    }

    /// Authorization predicate; `false` short-circuits with 401.
    #[must_use]
    pub fn authorize<F, Fut>(mut self, predicate: F) -> Self
    where
        F: Fn(AuthContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        self.authorize = Some(Arc::new(move |ctx: AuthContext| predicate(ctx).boxed()));
        self
    }

    /// Limit calls per key; see [`RateLimitPolicy`].
    #[must_use]
    pub fn rate_limit(mut self, policy: RateLimitPolicy) -> Self {
        self.rate_limit = Some(policy);
        self
    }

    /// Declare an event published after a successful response. Events are
    /// published in declaration order.
    #[must_use]
    pub fn event(mut self, event: EventDeclaration) -> Self {
        self.events.push(event);
        self
    }

    /// Default success status (200 unless set).
    #[must_use]
    pub fn status(mut self, status: StatusCode) -> Self {
        self.success_status = status;
        self
    }

    /// Finish the definition with its business handler.
    pub fn handle<F, Fut>(self, handler: F) -> Arc<Endpoint>
    where
        F: Fn(HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Arc::new(Endpoint {
            method: self.method,
            path: self.path,
            description: self.description,
            body: self.body,
            query: self.query,
            params: self.params,
            output: self.output,
            services: self.services,
            session: self.session,
            authorize: self.authorize,
            rate_limit: self.rate_limit,
            events: self.events,
            success_status: self.success_status,
            handler: Arc::new(move |ctx: HandlerContext| handler(ctx).boxed()),
        })
    }
}
