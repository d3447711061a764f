//! Server lifecycle: health state plus in-flight request tracking.
//!
//! Health lives in a `watch` channel so the serve loop can wait for a drain
//! request made from anywhere holding the controller. Requests are tracked
//! with `TaskTracker` tokens; a handler that panics still drops its token.

use std::fmt;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Server health state.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Starting,
    Ready,
    /// Finishing in-flight requests; new requests are refused.
    Draining,
    Stopped,
}

impl HealthState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }

    /// Whether new requests are still admitted.
    #[must_use]
    pub fn is_accepting(self) -> bool {
        matches!(self, Self::Starting | Self::Ready)
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owns the lifecycle of one server: readiness handlers read
/// [`health_state`](Self::health_state), the in-flight middleware takes a
/// guard per request, and [`drain`](Self::drain) waits for the guards.
#[derive(Debug)]
pub struct ShutdownController {
    state: watch::Sender<HealthState>,
    requests: TaskTracker,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(HealthState::Starting);
        Self {
            state,
            requests: TaskTracker::new(),
        }
    }

    /// `Starting -> Ready`. No effect once a drain has begun.
    pub fn set_ready(&self) {
        self.state.send_if_modified(|state| {
            if *state == HealthState::Starting {
                *state = HealthState::Ready;
                true
            } else {
                false
            }
        });
    }

    /// Ask the server to stop accepting requests. Idempotent.
    pub fn trigger_shutdown(&self) {
        let changed = self.state.send_if_modified(|state| {
            if state.is_accepting() {
                *state = HealthState::Draining;
                true
            } else {
                false
            }
        });
        if changed {
            info!("shutdown requested");
        }
    }

    /// Resolves once [`trigger_shutdown`](Self::trigger_shutdown) has run.
    pub async fn draining(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|state| !state.is_accepting()).await;
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        *self.state.borrow()
    }

    /// Count one request as in flight until the guard drops.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        InFlightGuard {
            _token: self.requests.token(),
        }
    }

    /// Requests currently holding a guard.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.requests.len()
    }

    /// Trigger shutdown, then wait up to `timeout` for every guard to drop.
    /// On success the state becomes `Stopped`; on timeout it stays
    /// `Draining` and `false` is returned.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.trigger_shutdown();
        self.requests.close();

        let remaining = self.requests.len();
        if remaining > 0 {
            info!(in_flight = remaining, "draining in-flight requests");
        }

        if tokio::time::timeout(timeout, self.requests.wait()).await.is_ok() {
            self.state.send_replace(HealthState::Stopped);
            info!("all requests drained");
            true
        } else {
            warn!(in_flight = self.requests.len(), "drain timeout expired");
            false
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Held for the lifetime of one request.
#[derive(Debug)]
pub struct InFlightGuard {
    _token: TaskTrackerToken,
}
