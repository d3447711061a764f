//! Embedded router adaptor: registers endpoints on an [`axum::Router`].

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Path, Query};
use axum::http::{Extensions, HeaderMap, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{on, MethodFilter};
use axum::Router;
use waypoint_core::RequestMeta;

use super::{prepare_routes, RouteError};
use crate::endpoint::{Endpoint, PARAM_MARKER};
use crate::pipeline::{EndpointResponse, InboundRequest, Pipeline};

/// Translate `/jobs/:id` into axum's `/jobs/{id}`.
#[must_use]
pub fn axum_path(pattern: &str) -> String {
    pattern
        .split('/')
        .map(|segment| match segment.strip_prefix(PARAM_MARKER) {
            Some(name) => format!("{{{name}}}"),
            None => segment.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Register one endpoint on `router`, served through `pipeline`.
///
/// # Errors
///
/// Returns [`RouteError::UnsupportedMethod`] for methods axum cannot route.
pub fn add_route(endpoint: Arc<Endpoint>, pipeline: &Pipeline, router: Router) -> Result<Router, RouteError> {
    let filter = MethodFilter::try_from(endpoint.method().clone()).map_err(|_| RouteError::UnsupportedMethod {
        method: endpoint.method().clone(),
        path: endpoint.path().to_string(),
    })?;
    let path = axum_path(endpoint.path());
    let pipeline = pipeline.clone();

    let handler = move |params: Option<Path<HashMap<String, String>>>,
                        Query(query): Query<Vec<(String, String)>>,
                        uri: Uri,
                        headers: HeaderMap,
                        extensions: Extensions,
                        body: Bytes| {
        let endpoint = Arc::clone(&endpoint);
        let pipeline = pipeline.clone();
        async move {
            let mut meta = RequestMeta::from_headers(uri.path(), &headers);
            if meta.source_ip.is_none() {
                meta.source_ip = extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string());
            }
            let request = InboundRequest {
                headers,
                cookies: None,
                query,
                path_params: params
                    .map(|Path(params)| params.into_iter().collect::<BTreeMap<_, _>>())
                    .unwrap_or_default(),
                body: (!body.is_empty()).then_some(body),
                meta,
            };
            pipeline.execute(&endpoint, request).await
        }
    };

    Ok(router.route(&path, on(filter, handler)))
}

/// Sort `endpoints` by precedence and register them all.
///
/// # Errors
///
/// Returns [`RouteError::Duplicate`] when two endpoints share a method and
/// path, before anything is registered.
pub fn add_routes<I>(endpoints: I, pipeline: &Pipeline, router: Router) -> Result<Router, RouteError>
where
    I: IntoIterator<Item = Arc<Endpoint>>,
{
    prepare_routes(endpoints)?
        .into_iter()
        .try_fold(router, |router, endpoint| add_route(endpoint, pipeline, router))
}

impl IntoResponse for EndpointResponse {
    fn into_response(self) -> Response {
        let body = self.body.map_or_else(Body::empty, Body::from);
        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}
