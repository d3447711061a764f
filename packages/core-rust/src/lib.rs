//! Waypoint Core — HTTP error taxonomy, schema validation, and request accessors.

pub mod context;
pub mod error;
pub mod schema;

pub use context::{Cookies, Headers, RequestMeta};
pub use error::{ErrorBody, HttpError, UNKNOWN_ERROR_MESSAGE};
pub use schema::{Issue, Schema, SchemaRef, Shape, ShapeKind, StringRules, Validated};

