//! Read-only views over inbound request metadata.
//!
//! [`Headers`] and [`Cookies`] are handed to session resolvers, authorizers
//! and handlers. [`RequestMeta`] carries the transport-specific values used to
//! enrich the request span.

use std::collections::BTreeMap;
use std::sync::Arc;

use http::header::{COOKIE, USER_AGENT};
use http::HeaderMap;

/// Case-insensitive, read-only header accessor. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    inner: Arc<HeaderMap>,
}

impl Headers {
    #[must_use]
    pub fn new(map: HeaderMap) -> Self {
        Self {
            inner: Arc::new(map),
        }
    }

    /// First value of the header, if present and valid UTF-8.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner.get(name).and_then(|v| v.to_str().ok())
    }

    /// All values of the header that are valid UTF-8.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.inner
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    /// Token from an `Authorization: Bearer <token>` header.
    #[must_use]
    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.get("authorization")?;
        let (scheme, token) = value.split_once(' ')?;
        scheme
            .eq_ignore_ascii_case("bearer")
            .then(|| token.trim())
            .filter(|t| !t.is_empty())
    }

    #[must_use]
    pub fn as_map(&self) -> &HeaderMap {
        &self.inner
    }
}

/// Read-only cookie accessor parsed from every `Cookie` header.
///
/// When a name repeats, the first occurrence wins.
#[derive(Debug, Clone, Default)]
pub struct Cookies {
    inner: Arc<BTreeMap<String, String>>,
}

impl Cookies {
    /// Parse cookies from the request headers.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut map = BTreeMap::new();
        for value in headers.get_all(COOKIE) {
            let Ok(value) = value.to_str() else {
                continue;
            };
            Self::parse_into(value, &mut map);
        }
        Self {
            inner: Arc::new(map),
        }
    }

    /// Build from already-split `name=value` strings (API Gateway v2 sends
    /// cookies this way).
    #[must_use]
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut map = BTreeMap::new();
        for pair in pairs {
            Self::parse_into(pair.as_ref(), &mut map);
        }
        Self {
            inner: Arc::new(map),
        }
    }

    fn parse_into(header: &str, map: &mut BTreeMap<String, String>) {
        for part in header.split(';') {
            let Some((name, value)) = part.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let value = value.trim().trim_matches('"');
            map.entry(name.to_string())
                .or_insert_with(|| value.to_string());
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Transport-specific request metadata used for span enrichment and rate
/// limiting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    /// Request id assigned by the transport (e.g. `X-Request-Id` or the API
    /// Gateway request context id).
    pub request_id: Option<String>,
    /// Caller IP as seen by the transport.
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
    /// Concrete request path (not the route pattern).
    pub path: String,
}

impl RequestMeta {
    /// Derive metadata from headers alone, as the embedded router does.
    ///
    /// The source IP is the first hop of `X-Forwarded-For`, falling back to
    /// `X-Real-Ip`.
    #[must_use]
    pub fn from_headers(path: impl Into<String>, headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let source_ip = header("x-forwarded-for")
            .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
            .or_else(|| header("x-real-ip"));
        Self {
            request_id: header("x-request-id"),
            source_ip,
            user_agent: headers
                .get(USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            path: path.into(),
        }
    }
}
