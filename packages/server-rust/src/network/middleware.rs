//! HTTP middleware stack for the embedded server.
//!
//! Layers follow the outer-to-inner convention: the first layer listed is
//! the outermost (processes the request first on the way in, and the
//! response last on the way out).

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::header::HeaderName;
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use waypoint_core::HttpError;

use super::config::NetworkConfig;
use super::shutdown::ShutdownController;

/// The composed Tower layer type produced by [`build_http_layers`].
type HttpLayers = tower::layer::util::Stack<
    DefaultBodyLimit,
    tower::layer::util::Stack<
        PropagateRequestIdLayer,
        tower::layer::util::Stack<
            TimeoutLayer,
            tower::layer::util::Stack<
                CorsLayer,
                tower::layer::util::Stack<
                    CompressionLayer,
                    tower::layer::util::Stack<
                        TraceLayer<
                            tower_http::classify::SharedClassifier<
                                tower_http::classify::ServerErrorsAsFailures,
                            >,
                        >,
                        tower::layer::util::Stack<
                            SetRequestIdLayer<MakeRequestUuid>,
                            tower::layer::util::Identity,
                        >,
                    >,
                >,
            >,
        >,
    >,
>;

/// Builds the HTTP-level Tower middleware stack from the network configuration.
///
/// **Middleware ordering (outermost to innermost):**
/// 1. `SetRequestId` -- assigns a UUID v4 `X-Request-Id` when absent; the
///    pipeline picks it up as the request id
/// 2. `Tracing` -- transport-level request/response spans
/// 3. `Compression` -- gzip response compression
/// 4. `CORS` -- allowed origins from configuration
/// 5. `Timeout` -- 408 after `request_timeout`
/// 6. `PropagateRequestId` -- copies `X-Request-Id` onto the response
/// 7. `DefaultBodyLimit` -- body extractors reject with 413 above
///    `max_body_bytes`
#[must_use]
pub fn build_http_layers(config: &NetworkConfig) -> HttpLayers {
    let x_request_id = HeaderName::from_static("x-request-id");

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(build_cors_layer(&config.cors_origins))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .into_inner()
}

/// A wildcard `"*"` allows any origin; otherwise each origin is parsed into
/// an explicit allowlist.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers(Any)
}

/// Counts the request as in flight for the shutdown drain, and turns new
/// requests away with 503 once draining has begun.
pub async fn track_in_flight(
    State(shutdown): State<Arc<ShutdownController>>,
    request: Request,
    next: Next,
) -> Response {
    if !shutdown.health_state().is_accepting() {
        let error = HttpError::with_status(StatusCode::SERVICE_UNAVAILABLE, "Server is shutting down");
        return (error.status(), axum::Json(error.to_body(false))).into_response();
    }
    let _guard = shutdown.in_flight_guard();
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    use super::*;

    #[test]
    fn build_http_layers_with_custom_timeout() {
        let config = NetworkConfig {
            request_timeout: Duration::from_secs(5),
            ..NetworkConfig::default()
        };
        let _layers = build_http_layers(&config);
    }

    #[test]
    fn build_cors_layer_specific_origins() {
        let origins = vec![
            "http://localhost:3000".to_string(),
            "https://example.com".to_string(),
        ];
        let _cors = build_cors_layer(&origins);
    }

    #[tokio::test]
    async fn request_id_is_assigned_and_propagated() {
        let router = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(build_http_layers(&NetworkConfig::default()));

        let response = router
            .oneshot(axum::http::Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let config = NetworkConfig {
            max_body_bytes: 8,
            ..NetworkConfig::default()
        };
        let router = Router::new()
            .route("/", axum::routing::post(|body: axum::body::Bytes| async move { body.len().to_string() }))
            .layer(build_http_layers(&config));

        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .method(Method::POST)
                    .uri("/")
                    .body(Body::from("0123456789abcdef"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn draining_server_rejects_new_requests() {
        let shutdown = Arc::new(ShutdownController::new());
        let router = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(Arc::clone(&shutdown), track_in_flight));

        shutdown.set_ready();
        let ok = router
            .clone()
            .oneshot(axum::http::Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(shutdown.in_flight_count(), 0);

        shutdown.trigger_shutdown();
        let rejected = router
            .oneshot(axum::http::Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(rejected.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
