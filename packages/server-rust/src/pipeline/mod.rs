//! The execution pipeline shared by every transport adaptor.
//!
//! [`Pipeline::execute`] runs one call through the fixed stage order:
//!
//! 1. request span (route, method, request id, source ip, user agent, path)
//! 2. error boundary (errors and panics normalized, logged once)
//! 3. service resolution
//! 4. input validation: body, query, params
//! 5. session
//! 6. authorization
//! 7. rate limiting
//! 8. handler
//! 9. output validation
//! 10. event publication (2xx only, bounded wait)
//!
//! Every path produces exactly one [`EndpointResponse`].

pub mod config;
pub mod events;
pub mod outcome;
pub mod rate_limit;
pub mod request;

pub use config::PipelineConfig;
pub use events::{PublishStatus, PublishTask};
pub use outcome::{InputTarget, Rejection};
pub use rate_limit::{InMemoryRateLimiter, RateLimitDecision, RateLimitKey, RateLimitPolicy};
pub use request::{EndpointResponse, InboundRequest};

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use http::StatusCode;
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;
use waypoint_core::{HttpError, Headers, SchemaRef};

use crate::endpoint::{AuthContext, Endpoint, EventContext, HandlerContext, SessionContext};
use crate::publisher::NullPublisher;
use crate::service::ServiceRegistry;
use crate::traits::{EventPublisher, RateLimiter};

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Shared execution state: the service registry and the collaborators every
/// call uses. Cheap to clone; adaptors hold one for their lifetime.
#[derive(Clone)]
pub struct Pipeline {
    registry: ServiceRegistry,
    publisher: Arc<dyn EventPublisher>,
    rate_limiter: Arc<dyn RateLimiter>,
    config: Arc<PipelineConfig>,
}

impl Pipeline {
    /// Pipeline over `registry` with a discarding publisher and an in-memory
    /// rate limiter.
    #[must_use]
    pub fn new(registry: ServiceRegistry) -> Self {
        Self {
            registry,
            publisher: Arc::new(NullPublisher),
            rate_limiter: Arc::new(InMemoryRateLimiter::new()),
            config: Arc::new(PipelineConfig::default()),
        }
    }

    /// Publish endpoint events through `publisher`.
    #[must_use]
    pub fn with_publisher<P: EventPublisher + 'static>(mut self, publisher: P) -> Self {
        self.publisher = Arc::new(publisher);
        self
    }

    /// Replace the in-memory rate limiter.
    #[must_use]
    pub fn with_rate_limiter<R: RateLimiter + 'static>(mut self, rate_limiter: R) -> Self {
        self.rate_limiter = Arc::new(rate_limiter);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// Registry that services are resolved from.
    #[must_use]
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run `request` through `endpoint`. Never fails and never panics: every
    /// error becomes a response.
    pub async fn execute(&self, endpoint: &Endpoint, request: InboundRequest) -> EndpointResponse {
        let started = Instant::now();
        let request_id = request
            .meta
            .request_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let span = info_span!(
            "request",
            route = endpoint.path(),
            method = %endpoint.method(),
            request_id = %request_id,
            source_ip = request.meta.source_ip.as_deref(),
            user_agent = request.meta.user_agent.as_deref(),
            path = %request.meta.path,
        );

        async move {
            let mut decision = None;
            let outcome = AssertUnwindSafe(self.run(endpoint, request, &mut decision))
                .catch_unwind()
                .await;
            let mut response = match outcome {
                Ok(Ok(response)) => response,
                Ok(Err(rejection)) => self.reject(rejection),
                Err(panic) => self.reject(Rejection::server(anyhow::anyhow!(
                    "handler panicked: {}",
                    events::panic_message(&*panic)
                ))),
            };
            if let Some(decision) = decision {
                decision.apply_headers(&mut response.headers);
            }

            record_metrics(endpoint, response.status, started);
            info!(
                status = response.status.as_u16(),
                elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "request completed"
            );
            response
        }
        .instrument(span)
        .await
    }

    fn reject(&self, rejection: Rejection) -> EndpointResponse {
        rejection.log();
        rejection.into_response(self.config.expose_error_details)
    }

    /// Stages 3 to 10. Any early exit is a [`Rejection`].
    async fn run(
        &self,
        endpoint: &Endpoint,
        request: InboundRequest,
        decision: &mut Option<RateLimitDecision>,
    ) -> Result<EndpointResponse, Rejection> {
        let services = self.registry.register(endpoint.services()).await?;

        let body = match &endpoint.body {
            Some(schema) => {
                let raw = request
                    .json_body()
                    .map_err(|_| HttpError::bad_request("Invalid JSON body"))?;
                validate(schema, &raw, InputTarget::Body)?
            }
            None => request.lenient_body(),
        };
        let query = match &endpoint.query {
            Some(schema) => validate(schema, &request.query_value(), InputTarget::Query)?,
            None => request.query_value(),
        };
        let params = match &endpoint.params {
            Some(schema) => validate(schema, &request.params_value(), InputTarget::Params)?,
            None => request.params_value(),
        };

        let cookies = request.cookies();
        let headers = Headers::new(request.headers);
        let meta = request.meta;

        let session = match &endpoint.session {
            Some(resolve) => resolve(SessionContext {
                headers: headers.clone(),
                cookies: cookies.clone(),
                services: services.clone(),
                meta: meta.clone(),
            })
            .await
            .map_err(Rejection::from_error)?,
            None => None,
        };

        if let Some(authorize) = &endpoint.authorize {
            let allowed = authorize(AuthContext {
                headers: headers.clone(),
                cookies: cookies.clone(),
                services: services.clone(),
                session: session.clone(),
                meta: meta.clone(),
            })
            .await
            .map_err(Rejection::from_error)?;
            if !allowed {
                return Err(Rejection::Unauthorized);
            }
        }

        if let Some(policy) = &endpoint.rate_limit {
            let key = policy.key_for(&route_label(endpoint), &headers, &meta);
            let checked = self
                .rate_limiter
                .check_and_record(&key, policy)
                .await
                .map_err(Rejection::server)?;
            *decision = Some(checked);
            if !checked.allowed {
                return Err(Rejection::RateLimited(checked));
            }
        }

        let call = (endpoint.handler)(HandlerContext {
            headers,
            cookies,
            body: body.clone(),
            query: query.clone(),
            params: params.clone(),
            session,
            services,
            meta,
        });
        let output = match self.config.handler_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| Rejection::Server {
                    error: HttpError::gateway_timeout("Handler timed out"),
                    cause: None,
                })?,
            None => call.await,
        }
        .map_err(Rejection::from_error)?;

        let output = match &endpoint.output {
            Some(schema) => schema
                .validate(&output)
                .map_err(|issues| Rejection::invalid_output(&issues))?,
            None => output,
        };

        let status = endpoint.success_status();
        let response = render(endpoint, status, &output)?;

        if status.is_success() && !endpoint.events().is_empty() {
            let batch = events::collect(
                endpoint.events(),
                &EventContext {
                    body: &body,
                    query: &query,
                    params: &params,
                    response: &output,
                },
            );
            if !batch.is_empty() {
                PublishTask::spawn(Arc::clone(&self.publisher), batch)
                    .wait(self.config.event_publish_wait)
                    .await;
            }
        }

        Ok(response)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn validate(schema: &SchemaRef, value: &Value, target: InputTarget) -> Result<Value, Rejection> {
    schema
        .validate(value)
        .map_err(|issues| Rejection::Validation { target, issues })
}

/// `METHOD /pattern`, used for rate-limit buckets.
fn route_label(endpoint: &Endpoint) -> String {
    format!("{} {}", endpoint.method(), endpoint.path())
}

/// A body is sent unless the status is 204 or the endpoint declares no
/// output shape and the handler returned nothing.
fn render(endpoint: &Endpoint, status: StatusCode, output: &Value) -> Result<EndpointResponse, Rejection> {
    if status == StatusCode::NO_CONTENT || (!endpoint.has_output_schema() && output.is_null()) {
        return Ok(EndpointResponse::empty(status));
    }
    let body = serde_json::to_string(output).map_err(|err| Rejection::server(err.into()))?;
    Ok(EndpointResponse::json(status, body))
}

fn record_metrics(endpoint: &Endpoint, status: StatusCode, started: Instant) {
    let route = endpoint.path().to_string();
    let method = endpoint.method().to_string();
    counter!(
        "waypoint_requests_total",
        "route" => route.clone(),
        "method" => method.clone(),
        "status" => status.as_u16().to_string()
    )
    .increment(1);
    histogram!("waypoint_request_duration_seconds", "route" => route, "method" => method)
        .record(started.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use http::{HeaderMap, HeaderValue};
    use serde_json::json;
    use tracing_test::traced_test;
    use waypoint_core::{RequestMeta, Shape, UNKNOWN_ERROR_MESSAGE};

    use super::*;
    use crate::endpoint::EventDeclaration;
    use crate::publisher::{MemoryPublisher, PublishedEvent};
    use crate::service::{Environment, ServiceDescriptor};

    fn pipeline() -> Pipeline {
        Pipeline::new(ServiceRegistry::new(Arc::new(Environment::default())))
    }

    fn json_request(body: &str) -> InboundRequest {
        InboundRequest::new(RequestMeta {
            request_id: Some("req-1".into()),
            path: "/users".into(),
            ..RequestMeta::default()
        })
        .with_body(body.to_string())
    }

    fn user_shape() -> Shape {
        Shape::object([("name", Shape::string_min(1)), ("email", Shape::Email)])
    }

    fn counted(calls: &Arc<AtomicUsize>) -> impl Fn(HandlerContext) -> futures_util::future::Ready<anyhow::Result<Value>> {
        let calls = Arc::clone(calls);
        move |_ctx| {
            calls.fetch_add(1, Ordering::SeqCst);
            futures_util::future::ready(Ok(json!({"ok": true})))
        }
    }

    // -- validation ---------------------------------------------------------

    #[traced_test]
    #[tokio::test]
    async fn invalid_body_never_reaches_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let endpoint = Endpoint::post("/users").body(user_shape()).handle(counted(&calls));

        let response = pipeline()
            .execute(&endpoint, json_request(r#"{"name": "T"}"#))
            .await;

        assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
        let issues = response.body_json();
        let issues = issues.as_array().expect("issue list");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0]["path"], json!(["email"]));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(logs_contain("input validation failed"));
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let calls = Arc::new(AtomicUsize::new(0));
        let endpoint = Endpoint::post("/users").body(user_shape()).handle(counted(&calls));

        let response = pipeline().execute(&endpoint, json_request("{not json")).await;

        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.body_json(), json!({"message": "Invalid JSON body"}));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn query_and_params_are_validated_in_order() {
        let endpoint = Endpoint::get("/jobs/:id")
            .query(Shape::object([("page", Shape::integer().with_default(json!(1)))]))
            .params(Shape::object([("id", Shape::integer())]))
            .handle(|ctx| async move { Ok(json!({"page": ctx.query["page"], "id": ctx.params["id"]})) });

        let ok = pipeline()
            .execute(&endpoint, InboundRequest::default().with_param("id", "42"))
            .await;
        assert_eq!(ok.status, StatusCode::OK);
        assert_eq!(ok.body_json(), json!({"page": 1, "id": 42}));

        let bad_query = pipeline()
            .execute(
                &endpoint,
                InboundRequest::default()
                    .with_query([("page", "x")])
                    .with_param("id", "nope"),
            )
            .await;
        assert_eq!(bad_query.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(bad_query.body_json()[0]["path"], json!(["page"]));

        let bad_params = pipeline()
            .execute(&endpoint, InboundRequest::default().with_param("id", "nope"))
            .await;
        assert_eq!(bad_params.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(bad_params.body_json()[0]["path"], json!(["id"]));
    }

    // -- session & authorization ----------------------------------------------

    #[traced_test]
    #[tokio::test]
    async fn denied_authorization_is_401_with_one_warning() {
        let calls = Arc::new(AtomicUsize::new(0));
        let endpoint = Endpoint::get("/admin")
            .authorize(|_ctx| async { Ok(false) })
            .handle(counted(&calls));

        let response = pipeline().execute(&endpoint, InboundRequest::default()).await;

        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.body_json(), json!({"message": "Unauthorized"}));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        logs_assert(|lines: &[&str]| {
            match lines.iter().filter(|line| line.contains(" WARN ")).count() {
                1 => Ok(()),
                n => Err(format!("expected one warning, found {n}")),
            }
        });
    }

    #[tokio::test]
    async fn session_flows_into_authorization_and_handler() {
        let endpoint = Endpoint::get("/me")
            .session(|ctx| async move {
                Ok(ctx
                    .headers
                    .bearer_token()
                    .map(|token| json!({"user": token})))
            })
            .authorize(|ctx| async move { Ok(ctx.session.is_some()) })
            .handle(|ctx| async move { Ok(ctx.session.unwrap_or(Value::Null)) });

        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer alice"));
        let response = pipeline()
            .execute(&endpoint, InboundRequest::default().with_headers(headers))
            .await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body_json(), json!({"user": "alice"}));

        let anonymous = pipeline().execute(&endpoint, InboundRequest::default()).await;
        assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn session_error_passes_through_error_boundary() {
        let endpoint = Endpoint::get("/me")
            .session(|_ctx| async { Err(HttpError::forbidden("Account locked").into()) })
            .handle(|_ctx| async { Ok(Value::Null) });

        let response = pipeline().execute(&endpoint, InboundRequest::default()).await;
        assert_eq!(response.status, StatusCode::FORBIDDEN);
        assert_eq!(response.body_json(), json!({"message": "Account locked"}));
    }

    // -- services -------------------------------------------------------------

    #[tokio::test]
    async fn handler_receives_resolved_services() {
        let greeting = ServiceDescriptor::new("greeting", |ctx| async move {
            Ok(format!("hello from {}", ctx.require("REGION")?))
        });
        let registry = ServiceRegistry::new(Arc::new(Environment::from_pairs([("REGION", "eu-west-1")])));
        let endpoint = Endpoint::get("/hello")
            .services([greeting])
            .handle(|ctx| async move {
                let greeting = ctx.service::<String>("greeting")?;
                Ok(json!(*greeting))
            });

        let response = Pipeline::new(registry.clone())
            .execute(&endpoint, InboundRequest::default())
            .await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body_json(), json!("hello from eu-west-1"));
        assert!(registry.is_resolved("greeting"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_cold_requests_create_a_service_once() {
        let created = Arc::new(AtomicUsize::new(0));
        let pool = ServiceDescriptor::new("pool", {
            let created = Arc::clone(&created);
            move |_ctx| {
                let created = Arc::clone(&created);
                async move {
                    created.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(7_u32)
                }
            }
        });
        let endpoint = Endpoint::get("/pool")
            .services([pool])
            .handle(|ctx| async move { Ok(json!(*ctx.service::<u32>("pool")?)) });
        let pipeline = pipeline();

        let requests = (0..16).map(|_| {
            let pipeline = pipeline.clone();
            let endpoint = Arc::clone(&endpoint);
            tokio::spawn(async move { pipeline.execute(&endpoint, InboundRequest::default()).await })
        });
        for response in futures_util::future::join_all(requests).await {
            let response = response.unwrap();
            assert_eq!(response.status, StatusCode::OK);
            assert_eq!(response.body_json(), json!(7));
        }
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[traced_test]
    #[tokio::test]
    async fn service_failure_is_generic_500() {
        let broken = ServiceDescriptor::new("db", |ctx| async move { ctx.require("DATABASE_URL") });
        let endpoint = Endpoint::get("/hello")
            .services([broken])
            .handle(|_ctx| async { Ok(Value::Null) });

        let response = pipeline().execute(&endpoint, InboundRequest::default()).await;
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body_json(), json!({"message": UNKNOWN_ERROR_MESSAGE}));
        assert!(logs_contain("DATABASE_URL"));
    }

    // -- rate limiting --------------------------------------------------------

    #[tokio::test]
    async fn rate_limit_headers_on_every_response() {
        let endpoint = Endpoint::get("/search")
            .rate_limit(RateLimitPolicy::per_ip(1, Duration::from_secs(60)))
            .handle(|_ctx| async { Ok(json!([])) });
        let pipeline = pipeline();
        let request = || {
            InboundRequest::new(RequestMeta {
                source_ip: Some("198.51.100.7".into()),
                ..RequestMeta::default()
            })
        };

        let first = pipeline.execute(&endpoint, request()).await;
        assert_eq!(first.status, StatusCode::OK);
        assert_eq!(first.headers["x-ratelimit-limit"], "1");
        assert_eq!(first.headers["x-ratelimit-remaining"], "0");
        assert!(!first.headers.contains_key("retry-after"));

        let second = pipeline.execute(&endpoint, request()).await;
        assert_eq!(second.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(second.headers["x-ratelimit-remaining"], "0");
        assert!(second.headers.contains_key("retry-after"));
    }

    #[tokio::test]
    async fn rate_limit_headers_survive_handler_failure() {
        let endpoint = Endpoint::get("/search")
            .rate_limit(RateLimitPolicy::global(5, Duration::from_secs(60)))
            .handle(|_ctx| async { Err(HttpError::conflict("busy").into()) });

        let response = pipeline().execute(&endpoint, InboundRequest::default()).await;
        assert_eq!(response.status, StatusCode::CONFLICT);
        assert_eq!(response.headers["x-ratelimit-remaining"], "4");
    }

    // -- handler & error boundary --------------------------------------------

    #[traced_test]
    #[tokio::test]
    async fn unknown_handler_error_is_normalized() {
        let endpoint = Endpoint::get("/boom")
            .handle(|_ctx| async { Err(anyhow::anyhow!("connection refused")) });

        let response = pipeline().execute(&endpoint, InboundRequest::default()).await;
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body_json(), json!({"message": UNKNOWN_ERROR_MESSAGE}));
        assert!(logs_contain("connection refused"));
    }

    #[tokio::test]
    async fn server_http_error_passes_through_unchanged() {
        let endpoint = Endpoint::get("/upstream")
            .handle(|_ctx| async { Err(HttpError::bad_gateway("Upstream down").code("UPSTREAM").into()) });

        let response = pipeline().execute(&endpoint, InboundRequest::default()).await;
        assert_eq!(response.status, StatusCode::BAD_GATEWAY);
        assert_eq!(
            response.body_json(),
            json!({"message": "Upstream down", "code": "UPSTREAM"})
        );
    }

    #[traced_test]
    #[tokio::test]
    async fn handler_panic_becomes_500() {
        let endpoint = Endpoint::get("/panic").handle(|_ctx| async {
            if true {
                panic!("index out of range");
            }
            Ok(Value::Null)
        });

        let response = pipeline().execute(&endpoint, InboundRequest::default()).await;
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body_json(), json!({"message": UNKNOWN_ERROR_MESSAGE}));
        assert!(logs_contain("index out of range"));
    }

    #[tokio::test(start_paused = true)]
    async fn handler_timeout_is_504() {
        let endpoint = Endpoint::get("/slow").handle(|_ctx| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Value::Null)
        });
        let pipeline = pipeline().with_config(PipelineConfig {
            handler_timeout: Some(Duration::from_secs(5)),
            ..PipelineConfig::default()
        });

        let response = pipeline.execute(&endpoint, InboundRequest::default()).await;
        assert_eq!(response.status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(response.body_json(), json!({"message": "Handler timed out"}));
    }

    #[traced_test]
    #[tokio::test]
    async fn invalid_output_is_logged_server_error() {
        let endpoint = Endpoint::get("/users/:id")
            .output(Shape::object([("id", Shape::integer()), ("email", Shape::Email)]))
            .handle(|_ctx| async { Ok(json!({"id": 1})) });

        let response = pipeline().execute(&endpoint, InboundRequest::default()).await;
        assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(response.body_json(), json!({"message": "Response validation failed"}));
        assert!(logs_contain("Response validation failed"));
        assert!(logs_contain("ERROR"));
    }

    #[tokio::test]
    async fn output_shape_strips_unknown_fields() {
        let endpoint = Endpoint::get("/users/:id")
            .output(Shape::object([("id", Shape::integer())]))
            .handle(|_ctx| async { Ok(json!({"id": 1, "password_hash": "x"})) });

        let response = pipeline().execute(&endpoint, InboundRequest::default()).await;
        assert_eq!(response.body_json(), json!({"id": 1}));
        assert_eq!(response.headers["content-type"], "application/json");
    }

    #[tokio::test]
    async fn empty_bodies() {
        let no_content = Endpoint::delete("/users/:id")
            .status(StatusCode::NO_CONTENT)
            .handle(|_ctx| async { Ok(json!({"ignored": true})) });
        let response = pipeline().execute(&no_content, InboundRequest::default()).await;
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert_eq!(response.body, None);

        let unit = Endpoint::post("/ping").handle(|_ctx| async { Ok(Value::Null) });
        let response = pipeline().execute(&unit, InboundRequest::default()).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, None);
    }

    // -- events ---------------------------------------------------------------

    fn job_endpoint(status: &'static str) -> Arc<Endpoint> {
        Endpoint::post("/jobs")
            .status(StatusCode::CREATED)
            .event(
                EventDeclaration::new("job.created", |ctx| json!({"jobId": ctx.response["id"]}))
                    .when(|ctx| ctx.response["status"] != "draft"),
            )
            .event(
                EventDeclaration::new("job.published", |ctx| json!({"jobId": ctx.response["id"]}))
                    .when(|ctx| ctx.response["status"] == "published"),
            )
            .handle(move |_ctx| async move { Ok(json!({"id": 9, "status": status})) })
    }

    #[tokio::test]
    async fn gated_events_publish_in_order_once() {
        let publisher = MemoryPublisher::new();
        let pipeline = pipeline().with_publisher(publisher.clone());

        let response = pipeline
            .execute(&job_endpoint("published"), InboundRequest::default())
            .await;
        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(
            publisher.events(),
            vec![
                PublishedEvent::new("job.created", json!({"jobId": 9})),
                PublishedEvent::new("job.published", json!({"jobId": 9})),
            ]
        );
        assert_eq!(publisher.batch_count(), 1);

        pipeline.execute(&job_endpoint("open"), InboundRequest::default()).await;
        let types: Vec<_> = publisher.events().into_iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec!["job.created", "job.published", "job.created"]);

        pipeline.execute(&job_endpoint("draft"), InboundRequest::default()).await;
        assert_eq!(publisher.batch_count(), 2);
    }

    #[tokio::test]
    async fn no_events_when_handler_fails() {
        let publisher = MemoryPublisher::new();
        let endpoint = Endpoint::post("/jobs")
            .event(EventDeclaration::new("job.created", |ctx| ctx.response.clone()))
            .handle(|_ctx| async { Err(HttpError::conflict("duplicate").into()) });

        let response = pipeline()
            .with_publisher(publisher.clone())
            .execute(&endpoint, InboundRequest::default())
            .await;
        assert_eq!(response.status, StatusCode::CONFLICT);
        assert!(publisher.events().is_empty());
    }

    #[traced_test]
    #[tokio::test]
    async fn publisher_failure_does_not_affect_response() {
        let publisher = MemoryPublisher::new();
        publisher.fail_with("event bus unreachable");

        let response = pipeline()
            .with_publisher(publisher)
            .execute(&job_endpoint("published"), InboundRequest::default())
            .await;

        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(response.body_json(), json!({"id": 9, "status": "published"}));
        assert!(logs_contain("event publication failed"));
        assert!(logs_contain("event bus unreachable"));
    }

    #[traced_test]
    #[tokio::test]
    async fn request_span_carries_metadata() {
        let endpoint = Endpoint::get("/users").handle(|_ctx| async { Ok(json!([])) });
        let request = InboundRequest::new(RequestMeta {
            request_id: Some("abc-123".into()),
            source_ip: Some("192.0.2.1".into()),
            user_agent: Some("curl/8".into()),
            path: "/users".into(),
        });

        pipeline().execute(&endpoint, request).await;
        assert!(logs_contain("request completed"));
        assert!(logs_contain("request_id=abc-123"));
        assert!(logs_contain("source_ip=\"192.0.2.1\""));
    }
}
