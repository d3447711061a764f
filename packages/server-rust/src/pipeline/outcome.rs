//! Explicit outcome of the stages before and around the handler.
//!
//! Every early exit is a [`Rejection`] variant. The pipeline threads it with
//! `?`, logs it exactly once through the request span, and renders it as the
//! single response for the call.

use std::fmt;

use http::StatusCode;
use serde_json::Value;
use tracing::{error, info, warn};
use waypoint_core::{HttpError, Issue};

use super::rate_limit::RateLimitDecision;
use super::request::EndpointResponse;
use crate::service::RegistryError;

/// Which part of the input failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputTarget {
    Body,
    Query,
    Params,
}

impl InputTarget {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Body => "body",
            Self::Query => "query",
            Self::Params => "params",
        }
    }
}

impl fmt::Display for InputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a call ended before (or instead of) a successful handler response.
#[derive(Debug)]
pub enum Rejection {
    /// Inbound body, query or params failed the declared shape (422).
    Validation {
        target: InputTarget,
        issues: Vec<Issue>,
    },
    /// Authorization predicate returned `false` (401).
    Unauthorized,
    /// Rate limit exhausted (429).
    RateLimited(RateLimitDecision),
    /// An `HttpError` raised by a collaborator; passed through unchanged.
    Business(HttpError),
    /// Server-side defect. `cause` is logged and never sent to the client
    /// unless details are exposed.
    Server {
        error: HttpError,
        cause: Option<anyhow::Error>,
    },
}

impl Rejection {
    /// Normalize an arbitrary error from a handler, session function,
    /// authorizer or service: a recognized `HttpError` passes through,
    /// anything else becomes a 500.
    #[must_use]
    pub fn from_error(err: anyhow::Error) -> Self {
        match err.downcast::<HttpError>() {
            Ok(http) => Self::Business(http),
            Err(cause) => Self::Server {
                error: HttpError::internal(),
                cause: Some(cause),
            },
        }
    }

    /// A 500 carrying `cause` for the log.
    #[must_use]
    pub fn server(cause: anyhow::Error) -> Self {
        Self::Server {
            error: HttpError::internal(),
            cause: Some(cause),
        }
    }

    /// Handler output did not match the declared output shape.
    #[must_use]
    pub fn invalid_output(issues: &[Issue]) -> Self {
        let details = serde_json::to_value(issues).unwrap_or(Value::Null);
        Self::Server {
            error: HttpError::unprocessable("Response validation failed").details(details),
            cause: None,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Business(error) | Self::Server { error, .. } => error.status(),
        }
    }

    /// Log the rejection at its level. Called once per rejected call, inside
    /// the request span.
    pub(crate) fn log(&self) {
        match self {
            Self::Validation { target, issues } => {
                info!(input = %target, issues = issues.len(), "input validation failed");
            }
            Self::Unauthorized => warn!("unauthorized request"),
            Self::RateLimited(decision) => {
                warn!(
                    limit = decision.limit,
                    reset_secs = decision.reset_secs(),
                    "rate limit exceeded"
                );
            }
            Self::Business(error) if error.is_server_error() => {
                error!(status = error.status().as_u16(), message = error.message(), "request failed");
            }
            Self::Business(error) => {
                warn!(status = error.status().as_u16(), message = error.message(), "request rejected");
            }
            Self::Server { error, cause } => match (cause, error.detail_value()) {
                (Some(cause), _) => {
                    let chain = format!("{cause:#}");
                    error!(status = error.status().as_u16(), error = %chain, "{}", error.message());
                }
                (None, Some(details)) => error!(
                    status = error.status().as_u16(),
                    details = %details,
                    "{}",
                    error.message()
                ),
                (None, None) => error!(status = error.status().as_u16(), "{}", error.message()),
            },
        }
    }

    /// Render the single response for this call.
    pub(crate) fn into_response(self, expose_details: bool) -> EndpointResponse {
        let status = self.status();
        match self {
            Self::Validation { issues, .. } => {
                let body = serde_json::to_string(&issues).unwrap_or_else(|_| "[]".to_string());
                EndpointResponse::json(status, body)
            }
            Self::Unauthorized => {
                EndpointResponse::json(status, HttpError::unauthorized().to_json(false))
            }
            Self::RateLimited(decision) => {
                let mut response =
                    EndpointResponse::json(status, HttpError::too_many_requests().to_json(false));
                decision.apply_headers(&mut response.headers);
                response
            }
            Self::Business(error) => {
                let include = expose_details || error.is_client_error();
                EndpointResponse::json(status, error.to_json(include))
            }
            Self::Server { error, cause } => {
                let has_details = error.detail_value().is_some();
                let error = match cause {
                    Some(cause) if expose_details && !has_details => {
                        error.details(Value::String(format!("{cause:#}")))
                    }
                    _ => error,
                };
                EndpointResponse::json(status, error.to_json(expose_details))
            }
        }
    }
}

impl From<HttpError> for Rejection {
    fn from(error: HttpError) -> Self {
        Self::Business(error)
    }
}

impl From<RegistryError> for Rejection {
    fn from(err: RegistryError) -> Self {
        Self::server(err.into())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tracing_test::traced_test;
    use waypoint_core::UNKNOWN_ERROR_MESSAGE;

    use super::*;

    #[test]
    fn http_error_passes_through() {
        let err = anyhow::Error::new(HttpError::not_found("No such job").code("JOB_MISSING"));
        let rejection = Rejection::from_error(err);
        assert_eq!(rejection.status(), StatusCode::NOT_FOUND);

        let response = rejection.into_response(false);
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(
            response.body_json(),
            json!({"message": "No such job", "code": "JOB_MISSING"})
        );
    }

    #[test]
    fn unknown_error_becomes_generic_500() {
        let rejection = Rejection::from_error(anyhow::anyhow!("db connection reset"));
        let response = rejection.into_response(false);
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body_json(), json!({"message": UNKNOWN_ERROR_MESSAGE}));
        assert!(!response.body.unwrap().contains("db connection reset"));
    }

    #[test]
    fn exposed_details_include_cause() {
        let rejection = Rejection::from_error(anyhow::anyhow!("db connection reset"));
        let response = rejection.into_response(true);
        assert_eq!(
            response.body_json(),
            json!({"message": UNKNOWN_ERROR_MESSAGE, "error": "db connection reset"})
        );
    }

    #[test]
    fn validation_body_is_issue_list() {
        let issues = vec![Issue {
            code: "invalid_type".into(),
            path: vec!["email".into()],
            message: "Required".into(),
        }];
        let response = Rejection::Validation {
            target: InputTarget::Body,
            issues,
        }
        .into_response(false);
        assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            response.body_json(),
            json!([{"code": "invalid_type", "path": ["email"], "message": "Required"}])
        );
    }

    #[test]
    fn invalid_output_hides_issues_from_client() {
        let issues = vec![Issue {
            code: "invalid_type".into(),
            path: vec!["id".into()],
            message: "Required".into(),
        }];
        let response = Rejection::invalid_output(&issues).into_response(false);
        assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(response.body_json(), json!({"message": "Response validation failed"}));
    }

    #[test]
    fn rate_limited_carries_headers() {
        let response = Rejection::RateLimited(RateLimitDecision {
            allowed: false,
            limit: 1,
            remaining: 0,
            reset_after: Duration::from_secs(30),
        })
        .into_response(false);
        assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers["retry-after"], "30");
        assert_eq!(response.body_json(), json!({"message": "Too many requests"}));
    }

    #[traced_test]
    #[test]
    fn log_levels_follow_status_class() {
        Rejection::Unauthorized.log();
        Rejection::Business(HttpError::conflict("taken")).log();
        Rejection::server(anyhow::anyhow!("boom")).log();

        assert!(logs_contain("unauthorized request"));
        logs_assert(|lines: &[&str]| {
            let warns = lines.iter().filter(|l| l.contains(" WARN ")).count();
            let errors = lines.iter().filter(|l| l.contains("ERROR")).count();
            match (warns, errors) {
                (2, 1) => Ok(()),
                other => Err(format!("unexpected (warn, error) counts: {other:?}")),
            }
        });
    }
}
