//! Waypoint Server — typed endpoints with a cached service registry, an
//! execution pipeline, and axum / API Gateway adaptors.

pub mod endpoint;
pub mod lambda;
pub mod network;
pub mod pipeline;
pub mod publisher;
pub mod routing;
pub mod service;
pub mod telemetry;
pub mod traits;

pub use endpoint::{
    AuthContext, Endpoint, EndpointBuilder, EventContext, EventDeclaration, HandlerContext,
    SessionContext,
};
pub use lambda::LambdaAdapter;
pub use network::{NetworkConfig, NetworkModule};
pub use pipeline::{EndpointResponse, InboundRequest, Pipeline, PipelineConfig, RateLimitPolicy};
pub use publisher::{MemoryPublisher, NullPublisher, PublishedEvent, WebhookPublisher};
pub use routing::{add_route, add_routes, compare_paths, sort_endpoints, RouteError, RouteTable};
pub use service::{
    ConfigSniffer, Environment, RegistryError, RegistryPool, ServiceContext, ServiceDescriptor,
    ServiceRegistry, Services,
};
pub use traits::{ConfigSource, EventPublisher, RateLimiter};
pub use waypoint_core::{Cookies, Headers, HttpError, RequestMeta, Schema, Shape};
