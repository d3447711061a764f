//! Per-call contexts handed to session resolvers, authorizers, handlers and
//! event declarations. Each is built fresh for one call and never shared.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use waypoint_core::{Cookies, Headers, HttpError, RequestMeta};

use crate::service::{RegistryError, Services};

/// Input to a session resolver.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub headers: Headers,
    pub cookies: Cookies,
    pub services: Services,
    pub meta: RequestMeta,
}

/// Input to an authorization predicate.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub headers: Headers,
    pub cookies: Cookies,
    pub services: Services,
    /// Resolved session, `None` when no resolver is declared or it found none.
    pub session: Option<Value>,
    pub meta: RequestMeta,
}

/// Fully assembled input to the business handler.
///
/// `body`, `query` and `params` hold validated values when the endpoint
/// declares a shape for them, and the raw decoded values otherwise.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub headers: Headers,
    pub cookies: Cookies,
    pub body: Value,
    pub query: Value,
    pub params: Value,
    pub session: Option<Value>,
    pub services: Services,
    pub meta: RequestMeta,
}

fn decode<T: DeserializeOwned>(value: &Value, what: &str) -> Result<T, HttpError> {
    T::deserialize(value).map_err(|err| HttpError::bad_request(format!("Invalid {what}: {err}")))
}

impl HandlerContext {
    /// Deserialize the body into `T`.
    ///
    /// # Errors
    ///
    /// Returns a 400 `HttpError` when the body does not fit `T`.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        decode(&self.body, "body")
    }

    /// Deserialize the query into `T`.
    ///
    /// # Errors
    ///
    /// Returns a 400 `HttpError` when the query does not fit `T`.
    pub fn query_as<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        decode(&self.query, "query")
    }

    /// Deserialize the path params into `T`.
    ///
    /// # Errors
    ///
    /// Returns a 400 `HttpError` when the params do not fit `T`.
    pub fn params_as<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        decode(&self.params, "path parameters")
    }

    /// A single path parameter rendered as a string.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<String> {
        match self.params.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Typed access to a declared service.
    ///
    /// # Errors
    ///
    /// See [`Services::get`].
    pub fn service<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, RegistryError> {
        self.services.get(name)
    }
}

/// View passed to event gate and projection functions after a successful
/// response.
#[derive(Debug, Clone, Copy)]
pub struct EventContext<'a> {
    pub body: &'a Value,
    pub query: &'a Value,
    pub params: &'a Value,
    pub response: &'a Value,
}
