//! API Gateway REST API (payload format 1.0) proxy events.

use std::collections::BTreeMap;

use http::HeaderMap;
use serde::{Deserialize, Serialize};

use super::{header_map, joined_headers};
use crate::pipeline::EndpointResponse;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRequestV1 {
    pub http_method: String,
    pub path: String,
    /// Route template as configured in API Gateway, e.g. `/jobs/{id}`.
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub multi_value_headers: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default)]
    pub query_string_parameters: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub multi_value_query_string_parameters: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default)]
    pub path_parameters: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_base64_encoded: bool,
    #[serde(default)]
    pub request_context: RequestContextV1,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContextV1 {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub identity: IdentityV1,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityV1 {
    #[serde(default)]
    pub source_ip: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl ProxyRequestV1 {
    /// Headers, preferring the multi-value form when present.
    #[must_use]
    pub fn header_map(&self) -> HeaderMap {
        match (&self.multi_value_headers, &self.headers) {
            (Some(multi), _) if !multi.is_empty() => header_map(
                multi
                    .iter()
                    .flat_map(|(k, values)| values.iter().map(move |v| (k.as_str(), v.as_str()))),
            ),
            (_, Some(single)) => header_map(single.iter().map(|(k, v)| (k.as_str(), v.as_str()))),
            _ => HeaderMap::new(),
        }
    }

    /// Query pairs, preferring the multi-value form when present.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        match (
            &self.multi_value_query_string_parameters,
            &self.query_string_parameters,
        ) {
            (Some(multi), _) if !multi.is_empty() => multi
                .iter()
                .flat_map(|(k, values)| values.iter().map(move |v| (k.clone(), v.clone())))
                .collect(),
            (_, Some(single)) => single.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => Vec::new(),
        }
    }
}

/// Proxy integration response for payload format 1.0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyResponseV1 {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub multi_value_headers: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub body: Option<String>,
    pub is_base64_encoded: bool,
}

impl From<EndpointResponse> for ProxyResponseV1 {
    fn from(response: EndpointResponse) -> Self {
        let mut multi_value_headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in &response.headers {
            if let Ok(value) = value.to_str() {
                multi_value_headers
                    .entry(name.as_str().to_string())
                    .or_default()
                    .push(value.to_string());
            }
        }
        multi_value_headers.retain(|_, values| values.len() > 1);
        Self {
            status_code: response.status.as_u16(),
            headers: joined_headers(&response.headers, None),
            multi_value_headers,
            body: response.body,
            is_base64_encoded: false,
        }
    }
}
