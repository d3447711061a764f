//! Transport-neutral request and response shapes.
//!
//! Every adaptor converts its native request into an [`InboundRequest`] and
//! converts the [`EndpointResponse`] back. Nothing here knows about axum or
//! API Gateway.

use std::collections::BTreeMap;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, StatusCode};
use serde_json::{Map, Value};
use waypoint_core::{Cookies, RequestMeta};

/// One inbound call, already routed to an endpoint.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    pub headers: HeaderMap,
    /// Pre-parsed cookies. `None` means parse them from the `Cookie` headers.
    pub cookies: Option<Cookies>,
    /// Raw query pairs in arrival order.
    pub query: Vec<(String, String)>,
    /// Captured path parameters by name.
    pub path_params: BTreeMap<String, String>,
    pub body: Option<Bytes>,
    pub meta: RequestMeta,
}

impl InboundRequest {
    #[must_use]
    pub fn new(meta: RequestMeta) -> Self {
        Self {
            meta,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn with_query<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.query = pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Body as JSON. An absent or blank body is `Null`.
    ///
    /// # Errors
    ///
    /// Returns the parse error when the body is not valid JSON.
    pub(crate) fn json_body(&self) -> Result<Value, serde_json::Error> {
        match &self.body {
            Some(bytes) if !bytes.iter().all(u8::is_ascii_whitespace) => serde_json::from_slice(bytes),
            _ => Ok(Value::Null),
        }
    }

    /// Body for endpoints that declare no body shape: JSON when it parses,
    /// the raw text otherwise.
    pub(crate) fn lenient_body(&self) -> Value {
        self.json_body().unwrap_or_else(|_| {
            let bytes = self.body.as_deref().unwrap_or_default();
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        })
    }

    /// Query pairs as a JSON object. Repeated keys collect into an array.
    pub(crate) fn query_value(&self) -> Value {
        let mut map = Map::new();
        for (key, value) in &self.query {
            let value = Value::String(value.clone());
            match map.get_mut(key) {
                None => {
                    map.insert(key.clone(), value);
                }
                Some(Value::Array(values)) => values.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
            }
        }
        Value::Object(map)
    }

    /// Path parameters as a JSON object of strings.
    pub(crate) fn params_value(&self) -> Value {
        Value::Object(
            self.path_params
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }

    pub(crate) fn cookies(&self) -> Cookies {
        self.cookies
            .clone()
            .unwrap_or_else(|| Cookies::from_headers(&self.headers))
    }
}

/// Canonical pipeline result: status, headers, and an optional JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Serialized JSON, absent for 204 and for endpoints without output.
    pub body: Option<String>,
}

impl EndpointResponse {
    /// JSON response with `content-type` set.
    #[must_use]
    pub fn json(status: StatusCode, body: String) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            status,
            headers,
            body: Some(body),
        }
    }

    #[must_use]
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Body parsed back into JSON, `Null` when absent or unparsable.
    #[must_use]
    pub fn body_json(&self) -> Value {
        self.body
            .as_deref()
            .and_then(|b| serde_json::from_str(b).ok())
            .unwrap_or(Value::Null)
    }
}
