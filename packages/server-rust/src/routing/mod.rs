//! Route precedence and matching.
//!
//! [`compare_paths`] orders path patterns so that more specific routes come
//! first: segments are compared position by position, a literal segment
//! sorts before a `:param` segment, same-kind segments compare
//! lexicographically, and a missing segment counts as the empty literal.
//! [`RouteTable`] matches concrete requests against a sorted set of
//! endpoints; [`axum`] registers them on an axum router.

pub mod axum;

pub use self::axum::{add_route, add_routes, axum_path};

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use http::Method;

use crate::endpoint::{Endpoint, PARAM_MARKER};

/// Errors raised while registering endpoints on a router.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("duplicate route {method} {path}")]
    Duplicate { method: Method, path: String },
    #[error("unsupported method {method} for route {path}")]
    UnsupportedMethod { method: Method, path: String },
}

// ---------------------------------------------------------------------------
// Precedence
// ---------------------------------------------------------------------------

fn is_param(segment: &str) -> bool {
    segment.starts_with(PARAM_MARKER)
}

/// Precedence order of two path patterns. `Less` means `a` is more specific
/// and must be registered (and matched) first.
#[must_use]
pub fn compare_paths(a: &str, b: &str) -> Ordering {
    let left: Vec<&str> = a.split('/').collect();
    let right: Vec<&str> = b.split('/').collect();
    for i in 0..left.len().max(right.len()) {
        let x = left.get(i).copied().unwrap_or("");
        let y = right.get(i).copied().unwrap_or("");
        let ordering = match (is_param(x), is_param(y)) {
            (false, true) => Ordering::Less,
            (true, false) => Ordering::Greater,
            _ => x.cmp(y),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Sort endpoints into registration order. Equal paths are ordered by
/// method so the result never depends on declaration order.
pub fn sort_endpoints(endpoints: &mut [Arc<Endpoint>]) {
    endpoints.sort_by(|a, b| {
        compare_paths(a.path(), b.path()).then_with(|| a.method().as_str().cmp(b.method().as_str()))
    });
}

/// Sort `endpoints` and reject any repeated method and path pair.
///
/// # Errors
///
/// Returns [`RouteError::Duplicate`] for the first repeated pair.
pub fn prepare_routes<I>(endpoints: I) -> Result<Vec<Arc<Endpoint>>, RouteError>
where
    I: IntoIterator<Item = Arc<Endpoint>>,
{
    let mut endpoints: Vec<_> = endpoints.into_iter().collect();
    sort_endpoints(&mut endpoints);
    for pair in endpoints.windows(2) {
        if pair[0].method() == pair[1].method() && pair[0].path() == pair[1].path() {
            return Err(RouteError::Duplicate {
                method: pair[1].method().clone(),
                path: pair[1].path().to_string(),
            });
        }
    }
    Ok(endpoints)
}

// ---------------------------------------------------------------------------
// RouteTable
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

#[derive(Debug)]
struct Route {
    endpoint: Arc<Endpoint>,
    segments: Vec<Segment>,
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

impl Route {
    fn new(endpoint: Arc<Endpoint>) -> Self {
        let segments = split_path(endpoint.path())
            .into_iter()
            .map(|segment| match segment.strip_prefix(PARAM_MARKER) {
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Literal(segment.to_string()),
            })
            .collect();
        Self { endpoint, segments }
    }

    fn capture(&self, path: &[&str]) -> Option<BTreeMap<String, String>> {
        if path.len() != self.segments.len() {
            return None;
        }
        let mut params = BTreeMap::new();
        for (segment, actual) in self.segments.iter().zip(path) {
            match segment {
                Segment::Literal(expected) if expected == actual => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), (*actual).to_string());
                }
            }
        }
        Some(params)
    }
}

/// A matched endpoint with its captured path parameters.
#[derive(Debug, Clone)]
pub struct RouteMatch<'a> {
    pub endpoint: &'a Arc<Endpoint>,
    pub params: BTreeMap<String, String>,
}

/// Endpoints in precedence order, matched first-wins.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Build a table from `endpoints`, sorted by precedence.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::Duplicate`] when two endpoints share a method
    /// and path.
    pub fn new<I>(endpoints: I) -> Result<Self, RouteError>
    where
        I: IntoIterator<Item = Arc<Endpoint>>,
    {
        let routes = prepare_routes(endpoints)?.into_iter().map(Route::new).collect();
        Ok(Self { routes })
    }

    /// First endpoint whose method and pattern match. Empty segments
    /// (including a trailing slash) are ignored.
    #[must_use]
    pub fn find(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        let actual = split_path(path);
        self.routes
            .iter()
            .filter(|route| route.endpoint.method() == method)
            .find_map(|route| {
                route.capture(&actual).map(|params| RouteMatch {
                    endpoint: &route.endpoint,
                    params,
                })
            })
    }

    /// Whether any endpoint matches `path` under some method.
    #[must_use]
    pub fn matches_path(&self, path: &str) -> bool {
        let actual = split_path(path);
        self.routes.iter().any(|route| route.capture(&actual).is_some())
    }

    /// Endpoints in precedence order.
    pub fn endpoints(&self) -> impl Iterator<Item = &Arc<Endpoint>> {
        self.routes.iter().map(|route| &route.endpoint)
    }

    /// Number of registered endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no endpoint is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::Value;

    use super::*;

    fn endpoint(method: Method, path: &str) -> Arc<Endpoint> {
        Endpoint::builder(method, path).handle(|_ctx| async { Ok(Value::Null) })
    }

    fn paths(endpoints: &[Arc<Endpoint>]) -> Vec<&str> {
        endpoints.iter().map(|e| e.path()).collect()
    }

    #[test]
    fn literal_sorts_before_param() {
        assert_eq!(compare_paths("/jobs/me", "/jobs/:id"), Ordering::Less);
        assert_eq!(compare_paths("/jobs/:id", "/jobs/me"), Ordering::Greater);
        assert_eq!(compare_paths("/jobs/a", "/jobs/b"), Ordering::Less);
        assert_eq!(compare_paths("/jobs/:a", "/jobs/:b"), Ordering::Less);
        assert_eq!(compare_paths("/jobs/me", "/jobs/me"), Ordering::Equal);
    }

    #[test]
    fn missing_segment_counts_as_empty_literal() {
        // Strict prefix: the shorter route sorts first.
        assert_eq!(compare_paths("/jobs", "/jobs/:id"), Ordering::Less);
        assert_eq!(compare_paths("/jobs", "/jobs/me"), Ordering::Less);
        assert_eq!(compare_paths("/jobs/:id", "/jobs/:id/edit"), Ordering::Less);
        // Differing before the length difference: position decides.
        assert_eq!(compare_paths("/a/:x/c", "/a/b"), Ordering::Greater);
        assert_eq!(compare_paths("/b", "/a/c/d"), Ordering::Greater);
    }

    #[test]
    fn sorts_nested_routes_by_specificity() {
        let mut endpoints = vec![
            endpoint(Method::GET, "/api/users/:userId/posts/:postId"),
            endpoint(Method::GET, "/api/users/me/posts/:postId"),
            endpoint(Method::GET, "/api/users/:userId/posts/featured"),
            endpoint(Method::GET, "/api/users/me/posts/featured"),
        ];
        sort_endpoints(&mut endpoints);
        assert_eq!(
            paths(&endpoints),
            vec![
                "/api/users/me/posts/featured",
                "/api/users/me/posts/:postId",
                "/api/users/:userId/posts/featured",
                "/api/users/:userId/posts/:postId",
            ]
        );
    }

    #[test]
    fn same_path_orders_by_method() {
        let mut endpoints = vec![endpoint(Method::POST, "/jobs"), endpoint(Method::GET, "/jobs")];
        sort_endpoints(&mut endpoints);
        assert_eq!(*endpoints[0].method(), Method::GET);
    }

    #[test]
    fn duplicate_route_is_rejected() {
        let err = RouteTable::new([endpoint(Method::GET, "/jobs"), endpoint(Method::GET, "/jobs")])
            .unwrap_err();
        assert_eq!(
            err,
            RouteError::Duplicate {
                method: Method::GET,
                path: "/jobs".into()
            }
        );
        assert!(RouteTable::new([endpoint(Method::GET, "/jobs"), endpoint(Method::POST, "/jobs")]).is_ok());
    }

    #[test]
    fn table_prefers_static_sibling() {
        let table = RouteTable::new([
            endpoint(Method::GET, "/jobs/:id"),
            endpoint(Method::GET, "/jobs/me"),
        ])
        .unwrap();

        let me = table.find(&Method::GET, "/jobs/me").unwrap();
        assert_eq!(me.endpoint.path(), "/jobs/me");
        assert!(me.params.is_empty());

        let id = table.find(&Method::GET, "/jobs/123").unwrap();
        assert_eq!(id.endpoint.path(), "/jobs/:id");
        assert_eq!(id.params["id"], "123");

        assert!(table.find(&Method::POST, "/jobs/123").is_none());
        assert!(table.matches_path("/jobs/123"));
        assert!(table.find(&Method::GET, "/jobs").is_none());
    }

    #[test]
    fn table_resolves_nested_ambiguity() {
        let table = RouteTable::new([
            endpoint(Method::GET, "/api/users/:userId/posts/:postId"),
            endpoint(Method::GET, "/api/users/me/posts/:postId"),
            endpoint(Method::GET, "/api/users/:userId/posts/featured"),
            endpoint(Method::GET, "/api/users/me/posts/featured"),
        ])
        .unwrap();

        let cases = [
            ("/api/users/me/posts/featured", "/api/users/me/posts/featured"),
            ("/api/users/me/posts/123", "/api/users/me/posts/:postId"),
            ("/api/users/456/posts/featured", "/api/users/:userId/posts/featured"),
            ("/api/users/456/posts/789", "/api/users/:userId/posts/:postId"),
        ];
        for (request, expected) in cases {
            let found = table.find(&Method::GET, request).unwrap();
            assert_eq!(found.endpoint.path(), expected, "request {request}");
        }

        let found = table.find(&Method::GET, "/api/users/456/posts/789/").unwrap();
        assert_eq!(found.params["userId"], "456");
        assert_eq!(found.params["postId"], "789");
    }

    fn segment() -> impl Strategy<Value = String> {
        prop_oneof![
            prop::sample::select(vec!["a", "b", "me", "posts"]).prop_map(str::to_string),
            prop::sample::select(vec![":id", ":x"]).prop_map(str::to_string),
        ]
    }

    fn pattern() -> impl Strategy<Value = String> {
        prop::collection::vec(segment(), 0..4).prop_map(|s| format!("/{}", s.join("/")))
    }

    proptest! {
        #[test]
        fn comparison_is_antisymmetric(a in pattern(), b in pattern()) {
            prop_assert_eq!(compare_paths(&a, &b), compare_paths(&b, &a).reverse());
        }

        #[test]
        fn comparison_is_transitive(a in pattern(), b in pattern(), c in pattern()) {
            if compare_paths(&a, &b) != Ordering::Greater && compare_paths(&b, &c) != Ordering::Greater {
                prop_assert_ne!(compare_paths(&a, &c), Ordering::Greater);
            }
        }

        #[test]
        fn sort_is_independent_of_declaration_order(mut set in prop::collection::vec(pattern(), 1..6)) {
            set.sort();
            set.dedup();
            let mut forward: Vec<_> = set.iter().map(|p| endpoint(Method::GET, p)).collect();
            let mut backward: Vec<_> = set.iter().rev().map(|p| endpoint(Method::GET, p)).collect();
            sort_endpoints(&mut forward);
            sort_endpoints(&mut backward);
            prop_assert_eq!(paths(&forward), paths(&backward));
        }
    }
}
