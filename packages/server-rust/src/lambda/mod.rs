//! Serverless adaptor for API Gateway proxy integrations.
//!
//! A [`LambdaAdapter`] is built once per warm runtime from a [`Pipeline`]
//! and the endpoints the function hosts. Each invocation is routed through
//! a [`RouteTable`] and executed by the same pipeline the embedded router
//! uses, so the service registry is reused across invocations.

pub mod v1;
pub mod v2;

pub use v1::{ProxyRequestV1, ProxyResponseV1};
pub use v2::{ProxyRequestV2, ProxyResponseV2};

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use http::header::HeaderName;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};
use waypoint_core::{Cookies, HttpError, RequestMeta};

use crate::endpoint::Endpoint;
use crate::pipeline::{EndpointResponse, InboundRequest, Pipeline};
use crate::routing::{RouteError, RouteTable};

/// Payload format version marker for HTTP API events.
const V2_VERSION: &str = "2.0";

/// Transport-neutral view of a decoded proxy event.
struct Invocation {
    method: String,
    path: String,
    headers: HeaderMap,
    cookies: Option<Cookies>,
    query: Vec<(String, String)>,
    body: Option<String>,
    is_base64_encoded: bool,
    meta: RequestMeta,
}

/// Routes API Gateway proxy events to endpoints.
#[derive(Debug)]
pub struct LambdaAdapter {
    pipeline: Pipeline,
    routes: RouteTable,
}

impl LambdaAdapter {
    /// # Errors
    ///
    /// Returns [`RouteError::Duplicate`] when two endpoints share a method
    /// and path.
    pub fn new<I>(pipeline: Pipeline, endpoints: I) -> Result<Self, RouteError>
    where
        I: IntoIterator<Item = Arc<Endpoint>>,
    {
        Ok(Self {
            pipeline,
            routes: RouteTable::new(endpoints)?,
        })
    }

    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Routes in precedence order.
    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Handle a REST API (payload 1.0) event.
    pub async fn handle_v1(&self, event: ProxyRequestV1) -> ProxyResponseV1 {
        let invocation = Invocation {
            headers: event.header_map(),
            query: event.query_pairs(),
            cookies: None,
            meta: RequestMeta {
                request_id: event.request_context.request_id,
                source_ip: event.request_context.identity.source_ip,
                user_agent: event.request_context.identity.user_agent,
                path: event.path.clone(),
            },
            method: event.http_method,
            path: event.path,
            body: event.body,
            is_base64_encoded: event.is_base64_encoded,
        };
        self.dispatch(invocation).await.into()
    }

    /// Handle an HTTP API (payload 2.0) event.
    pub async fn handle_v2(&self, event: ProxyRequestV2) -> ProxyResponseV2 {
        let headers = event.header_map();
        let query = event.query_pairs();
        let context = event.request_context.http;
        let user_agent = context.user_agent.or_else(|| {
            headers
                .get(http::header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        });
        let invocation = Invocation {
            headers,
            query,
            cookies: event.cookies.map(Cookies::from_pairs),
            meta: RequestMeta {
                request_id: event.request_context.request_id,
                source_ip: context.source_ip,
                user_agent,
                path: event.raw_path.clone(),
            },
            method: context.method,
            path: event.raw_path,
            body: event.body,
            is_base64_encoded: event.is_base64_encoded,
        };
        self.dispatch(invocation).await.into()
    }

    /// Handle a raw JSON event, choosing the payload format from its
    /// `version` field. The response is returned in the matching format.
    ///
    /// # Errors
    ///
    /// Returns an error when the event is not a recognizable proxy event.
    pub async fn handle_json(&self, event: Value) -> anyhow::Result<Value> {
        let response = if event.get("version").and_then(Value::as_str) == Some(V2_VERSION) {
            let event: ProxyRequestV2 = serde_json::from_value(event)?;
            serde_json::to_value(self.handle_v2(event).await)?
        } else {
            let event: ProxyRequestV1 = serde_json::from_value(event)?;
            serde_json::to_value(self.handle_v1(event).await)?
        };
        Ok(response)
    }

    async fn dispatch(&self, invocation: Invocation) -> EndpointResponse {
        let Ok(method) = Method::from_bytes(invocation.method.as_bytes()) else {
            warn!(method = %invocation.method, "unrecognized method in proxy event");
            return error_response(&HttpError::with_status(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed"));
        };
        let Some(found) = self.routes.find(&method, &invocation.path) else {
            debug!(%method, path = %invocation.path, "no route for proxy event");
            return if self.routes.matches_path(&invocation.path) {
                error_response(&HttpError::with_status(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed"))
            } else {
                error_response(&HttpError::not_found("Not found"))
            };
        };
        let body = match decode_body(invocation.body, invocation.is_base64_encoded) {
            Ok(body) => body,
            Err(err) => return error_response(&err),
        };

        let request = InboundRequest {
            headers: invocation.headers,
            cookies: invocation.cookies,
            query: invocation.query,
            path_params: found.params,
            body,
            meta: invocation.meta,
        };
        self.pipeline.execute(found.endpoint, request).await
    }
}

fn error_response(error: &HttpError) -> EndpointResponse {
    EndpointResponse::json(error.status(), error.to_json(false))
}

fn decode_body(body: Option<String>, is_base64_encoded: bool) -> Result<Option<Bytes>, HttpError> {
    match body {
        None => Ok(None),
        Some(body) if is_base64_encoded => STANDARD
            .decode(body.as_bytes())
            .map(|bytes| Some(Bytes::from(bytes)))
            .map_err(|_| HttpError::bad_request("Invalid base64 body")),
        Some(body) => Ok(Some(Bytes::from(body))),
    }
}

/// Build a header map, skipping names or values that are not valid HTTP.
pub(crate) fn header_map<'a, I>(pairs: I) -> HeaderMap
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut map = HeaderMap::new();
    for (name, value) in pairs {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            map.append(name, value);
        }
    }
    map
}

/// Collapse a header map into single string values, joining repeats with
/// `, `. `skip` names a header left out entirely.
pub(crate) fn joined_headers(headers: &HeaderMap, skip: Option<&HeaderName>) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        if Some(name) == skip {
            continue;
        }
        let Ok(value) = value.to_str() else {
            continue;
        };
        out.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    out
}
