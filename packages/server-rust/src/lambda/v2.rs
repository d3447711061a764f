//! API Gateway HTTP API (payload format 2.0) proxy events.

use std::collections::BTreeMap;

use http::header::SET_COOKIE;
use http::HeaderMap;
use serde::{Deserialize, Serialize};

use super::{header_map, joined_headers};
use crate::pipeline::EndpointResponse;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRequestV2 {
    pub version: String,
    #[serde(default)]
    pub route_key: Option<String>,
    pub raw_path: String,
    #[serde(default)]
    pub raw_query_string: Option<String>,
    #[serde(default)]
    pub cookies: Option<Vec<String>>,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
    /// Repeated keys arrive comma-joined in a single value.
    #[serde(default)]
    pub query_string_parameters: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub path_parameters: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_base64_encoded: bool,
    pub request_context: RequestContextV2,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContextV2 {
    #[serde(default)]
    pub request_id: Option<String>,
    pub http: HttpContextV2,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpContextV2 {
    pub method: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub source_ip: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl ProxyRequestV2 {
    #[must_use]
    pub fn header_map(&self) -> HeaderMap {
        self.headers
            .as_ref()
            .map(|h| header_map(h.iter().map(|(k, v)| (k.as_str(), v.as_str()))))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.query_string_parameters
            .iter()
            .flatten()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Proxy integration response for payload format 2.0. `Set-Cookie` headers
/// move to `cookies`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyResponseV2 {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub cookies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub body: Option<String>,
    pub is_base64_encoded: bool,
}

impl From<EndpointResponse> for ProxyResponseV2 {
    fn from(response: EndpointResponse) -> Self {
        let cookies = response
            .headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok().map(str::to_string))
            .collect();
        Self {
            status_code: response.status.as_u16(),
            headers: joined_headers(&response.headers, Some(&SET_COOKIE)),
            cookies,
            body: response.body,
            is_base64_encoded: false,
        }
    }
}
