//! HTTP error taxonomy shared by the pipeline and endpoint handlers.
//!
//! A single [`HttpError`] struct is parameterised by status code instead of a
//! type per error class. Handlers return it through `anyhow::Error`; the
//! pipeline's error boundary downcasts it back and passes it through
//! unchanged.

use http::StatusCode;
use serde::Serialize;
use serde_json::Value;

/// Message used when an error without an HTTP shape escapes a handler.
pub const UNKNOWN_ERROR_MESSAGE: &str = "An unknown error occurred";

/// An error carrying an HTTP status, a human message, an optional machine
/// code, and optional structured details.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{} {message}", .status.as_u16())]
pub struct HttpError {
    status: StatusCode,
    message: String,
    code: Option<String>,
    details: Option<Value>,
}

/// Wire envelope for pipeline-generated errors: `{ message, code?, error? }`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl HttpError {
    /// Create an error with an arbitrary status code.
    #[must_use]
    pub fn with_status(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: None,
            details: None,
        }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, message)
    }

    #[must_use]
    pub fn unauthorized() -> Self {
        Self::with_status(StatusCode::UNAUTHORIZED, "Unauthorized")
    }

    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::FORBIDDEN, message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::NOT_FOUND, message)
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::CONFLICT, message)
    }

    #[must_use]
    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::UNPROCESSABLE_ENTITY, message)
    }

    #[must_use]
    pub fn too_many_requests() -> Self {
        Self::with_status(StatusCode::TOO_MANY_REQUESTS, "Too many requests")
    }

    /// Generic 500 used by the error boundary for unrecognised failures.
    #[must_use]
    pub fn internal() -> Self {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, UNKNOWN_ERROR_MESSAGE)
    }

    #[must_use]
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::BAD_GATEWAY, message)
    }

    #[must_use]
    pub fn gateway_timeout(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::GATEWAY_TIMEOUT, message)
    }

    /// Attach a machine-readable code (e.g. `"USER_EXISTS"`).
    #[must_use]
    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach structured diagnostic details.
    #[must_use]
    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn machine_code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    #[must_use]
    pub fn detail_value(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    /// Whether the status is in the 4xx range.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status.is_client_error()
    }

    /// Whether the status is in the 5xx range.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status.is_server_error()
    }

    /// Build the wire envelope. Details are only included when
    /// `include_details` is set, so server-side causes stay in the logs.
    #[must_use]
    pub fn to_body(&self, include_details: bool) -> ErrorBody {
        ErrorBody {
            message: self.message.clone(),
            code: self.code.clone(),
            error: if include_details {
                self.details.clone()
            } else {
                None
            },
        }
    }

    /// Serialize the envelope to a JSON string.
    #[must_use]
    pub fn to_json(&self, include_details: bool) -> String {
        // ErrorBody contains only strings and JSON values; serialization cannot fail.
        serde_json::to_string(&self.to_body(include_details))
            .unwrap_or_else(|_| format!("{{\"message\":{:?}}}", self.message))
    }
}
