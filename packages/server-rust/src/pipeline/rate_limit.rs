//! Per-endpoint rate limiting.
//!
//! A [`RateLimitPolicy`] is declared per endpoint; the pipeline derives a
//! bucket key from it and asks a [`RateLimiter`] to check and record one hit.
//! [`InMemoryRateLimiter`] is the default single-process implementation.

use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::middleware::StateInformationMiddleware;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter as GovernorLimiter};
use http::header::{HeaderName, HeaderValue, RETRY_AFTER};
use http::HeaderMap;
use waypoint_core::{Headers, RequestMeta};

use crate::traits::RateLimiter;

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// Bucket key used when the caller's IP or the keyed header is unavailable.
const UNKNOWN_CALLER: &str = "unknown";

/// Drop replenished buckets every this many checks.
const PRUNE_EVERY: u64 = 1024;

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// What a rate-limit bucket is keyed by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitKey {
    /// One bucket for every caller of the route.
    Global,
    /// One bucket per source IP.
    SourceIp,
    /// One bucket per value of the given request header (e.g. an API key).
    Header(HeaderName),
}

/// At most `limit` calls per `window`, bucketed by `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub limit: u32,
    pub window: Duration,
    pub key: RateLimitKey,
}

impl RateLimitPolicy {
    /// One bucket shared by every caller of the route.
    #[must_use]
    pub fn global(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            key: RateLimitKey::Global,
        }
    }

    /// One bucket per source IP.
    #[must_use]
    pub fn per_ip(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            key: RateLimitKey::SourceIp,
        }
    }

    /// One bucket per value of `header`.
    #[must_use]
    pub fn per_header(limit: u32, window: Duration, header: HeaderName) -> Self {
        Self {
            limit,
            window,
            key: RateLimitKey::Header(header),
        }
    }

    /// Bucket key for one call to `route`.
    #[must_use]
    pub fn key_for(&self, route: &str, headers: &Headers, meta: &RequestMeta) -> String {
        match &self.key {
            RateLimitKey::Global => format!("{route}|global"),
            RateLimitKey::SourceIp => {
                let ip = meta.source_ip.as_deref().unwrap_or(UNKNOWN_CALLER);
                format!("{route}|ip:{ip}")
            }
            RateLimitKey::Header(name) => {
                let value = headers.get(name.as_str()).unwrap_or(UNKNOWN_CALLER);
                format!("{route}|{name}:{value}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Outcome of one check, carried onto the response as headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the bucket is full again (allowed) or the next call is
    /// admitted (denied).
    pub reset_after: Duration,
}

impl RateLimitDecision {
    /// Seconds until reset, rounded up so clients never retry early.
    #[must_use]
    pub fn reset_secs(&self) -> u64 {
        let secs = self.reset_after.as_secs();
        if self.reset_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }

    /// Write the `x-ratelimit-*` headers, plus `retry-after` when denied.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        let reset = HeaderValue::from(self.reset_secs());
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(X_RATELIMIT_RESET, reset.clone());
        if !self.allowed {
            headers.insert(RETRY_AFTER, reset);
        }
    }
}

// ---------------------------------------------------------------------------
// InMemoryRateLimiter
// ---------------------------------------------------------------------------

type KeyedLimiter =
    GovernorLimiter<String, DefaultKeyedStateStore<String>, DefaultClock, StateInformationMiddleware>;

/// GCRA quota for "`limit` calls per `window`": the full `limit` may be spent
/// as a burst, and one call is replenished every `window / limit`.
fn quota(limit: NonZeroU32, window: Duration) -> Quota {
    let period = (window / limit.get()).max(Duration::from_nanos(1));
    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(limit))
        .allow_burst(limit)
}

/// Process-local limiter backed by `governor` keyed GCRA state.
///
/// One keyed limiter exists per distinct (limit, window) pair; buckets inside
/// it are keyed by [`RateLimitPolicy::key_for`]. Checks are lock-free
/// compare-and-swap updates, so concurrent calls never both take the last
/// slot.
pub struct InMemoryRateLimiter {
    limiters: DashMap<(u32, Duration), Arc<KeyedLimiter>>,
    checks: AtomicU64,
}

impl InMemoryRateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            limiters: DashMap::new(),
            checks: AtomicU64::new(0),
        }
    }

    /// Number of live buckets across every quota.
    #[must_use]
    pub fn len(&self) -> usize {
        self.limiters.iter().map(|limiter| limiter.len()).sum()
    }

    /// Whether no bucket has been touched yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop buckets that have fully replenished.
    fn prune(&self) {
        for limiter in self.limiters.iter() {
            limiter.retain_recent();
        }
    }

    fn limiter(&self, limit: NonZeroU32, window: Duration) -> Arc<KeyedLimiter> {
        let limiter = self
            .limiters
            .entry((limit.get(), window))
            .or_insert_with(|| {
                Arc::new(GovernorLimiter::keyed(quota(limit, window)).with_middleware::<StateInformationMiddleware>())
            });
        Arc::clone(limiter.value())
    }

    fn check(&self, key: &str, policy: &RateLimitPolicy) -> RateLimitDecision {
        let Some(limit) = NonZeroU32::new(policy.limit) else {
            return RateLimitDecision {
                allowed: false,
                limit: 0,
                remaining: 0,
                reset_after: policy.window,
            };
        };
        if self.checks.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune();
        }

        let period = (policy.window / limit.get()).max(Duration::from_nanos(1));
        let limiter = self.limiter(limit, policy.window);
        match limiter.check_key(&key.to_string()) {
            Ok(snapshot) => {
                let remaining = snapshot.remaining_burst_capacity();
                RateLimitDecision {
                    allowed: true,
                    limit: limit.get(),
                    remaining,
                    reset_after: period * (limit.get() - remaining),
                }
            }
            Err(not_until) => RateLimitDecision {
                allowed: false,
                limit: limit.get(),
                remaining: 0,
                reset_after: not_until.wait_time_from(limiter.clock().now()),
            },
        }
    }
}

impl Default for InMemoryRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryRateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryRateLimiter")
            .field("quotas", &self.limiters.len())
            .field("buckets", &self.len())
            .finish()
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check_and_record(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
    ) -> anyhow::Result<RateLimitDecision> {
        Ok(self.check(key, policy))
    }
}
