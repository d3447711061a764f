//! Built-in operational handlers served next to the user's endpoints.

pub mod health;

pub use health::{health_handler, liveness_handler, readiness_handler};

use std::sync::Arc;
use std::time::Instant;

use super::ShutdownController;
use crate::service::ServiceRegistry;

/// State shared by the operational handlers. Cheap to clone.
#[derive(Clone, Debug)]
pub struct AppState {
    pub shutdown: Arc<ShutdownController>,
    /// Runtime registry, reported by `/health`.
    pub registry: ServiceRegistry,
    /// Number of endpoints mounted on the router.
    pub routes: usize,
    pub start_time: Instant,
}
