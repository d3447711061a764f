//! Network module with deferred startup lifecycle.
//!
//! `new()` captures configuration and the pipeline, `start()` binds the TCP
//! listener, and `serve()` accepts connections until the shutdown future
//! resolves, then drains in-flight requests and tears down the service
//! registry.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use super::config::NetworkConfig;
use super::handlers::{health_handler, liveness_handler, readiness_handler, AppState};
use super::middleware::{build_http_layers, track_in_flight};
use super::shutdown::ShutdownController;
use crate::endpoint::Endpoint;
use crate::pipeline::Pipeline;
use crate::routing::{add_routes, RouteError};

/// Serves a set of endpoints over HTTP with health probes and graceful
/// shutdown.
///
/// 1. `new()` -- allocates the shutdown controller
/// 2. `start()` -- binds the listener (port 0 picks an ephemeral port)
/// 3. `serve()` -- accepts connections until shutdown, then drains
pub struct NetworkModule {
    config: NetworkConfig,
    pipeline: Pipeline,
    endpoints: Vec<Arc<Endpoint>>,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    /// Creates the module without binding any port.
    #[must_use]
    pub fn new(config: NetworkConfig, pipeline: Pipeline) -> Self {
        Self {
            config,
            pipeline,
            endpoints: Vec::new(),
            listener: None,
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    /// Mount `endpoints`. Precedence sorting happens when the router is
    /// built, so declaration order does not matter.
    #[must_use]
    pub fn with_endpoints<I>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = Arc<Endpoint>>,
    {
        self.endpoints.extend(endpoints);
        self
    }

    /// Handle for reading health or stopping the server from elsewhere.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Assembles the router: the user's endpoints (with in-flight tracking)
    /// plus `GET /health`, `/health/live` and `/health/ready`, all under the
    /// HTTP middleware stack.
    ///
    /// # Errors
    ///
    /// Returns a [`RouteError`] when two endpoints share a method and path.
    pub fn build_router(&self) -> Result<Router, RouteError> {
        let state = AppState {
            shutdown: Arc::clone(&self.shutdown),
            registry: self.pipeline.registry().clone(),
            routes: self.endpoints.len(),
            start_time: Instant::now(),
        };

        let api = add_routes(self.endpoints.iter().cloned(), &self.pipeline, Router::new())?.layer(
            axum::middleware::from_fn_with_state(Arc::clone(&self.shutdown), track_in_flight),
        );
        let health = Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .with_state(state);

        Ok(api.merge(health).layer(build_http_layers(&self.config)))
    }

    /// Binds the TCP listener and returns the bound port.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let port = listener.local_addr()?.port();
        info!(host = %self.config.host, port, "TCP listener bound");
        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves or the controller is told to shut
    /// down, then drains in-flight requests for up to `drain_timeout` and
    /// shuts the service registry down.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called, if routes conflict, or
    /// if the server hits a fatal I/O error.
    pub async fn serve(self, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let router = self.build_router()?;
        let Self {
            config,
            pipeline,
            listener,
            shutdown: controller,
            ..
        } = self;
        let listener = listener.ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;

        controller.set_ready();
        info!(addr = %listener.local_addr()?, "serving HTTP");

        let signal = Arc::clone(&controller);
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            tokio::select! {
                () = shutdown => signal.trigger_shutdown(),
                () = signal.draining() => {}
            }
        })
        .await?;

        controller.drain(config.drain_timeout).await;
        pipeline.registry().shutdown();
        info!("server stopped");
        Ok(())
    }
}
