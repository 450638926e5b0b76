//! Per-client request rate limiter.
//!
//! A fixed window counter per client key (`{count, window_start}`), kept in
//! a [`DashMap`] so increment-and-check happens under the entry's shard
//! lock. Concurrent requests from one client can therefore never admit more
//! than `max_requests` in a window.
//!
//! There is no background sweep. An expired window is reset the next time
//! its client shows up. The map never tracks more than
//! `max_tracked_clients` keys: a new key arriving at the cap triggers a
//! prune of expired windows (at most once per [`PRUNE_INTERVAL`]), and if
//! the map is still full the new key is limited without being tracked.
//!
//! State is process-local; several server replicas each count separately.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    window_start: Instant,
}

/// Minimum time between two prunes of the window map.
pub const PRUNE_INTERVAL: Duration = Duration::from_secs(1);

pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    max_tracked_clients: usize,
    windows: DashMap<String, Window>,
    created: Instant,
    /// Milliseconds after `created` of the last prune, plus one. 0 = never.
    last_prune: AtomicU64,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration, max_tracked_clients: usize) -> Self {
        Self {
            max_requests,
            window,
            max_tracked_clients,
            windows: DashMap::new(),
            created: Instant::now(),
            last_prune: AtomicU64::new(0),
        }
    }

    /// Build a limiter from `[rate_limit]`, or `None` when it is disabled.
    pub fn from_config(config: &RateLimitConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        Some(Self::new(
            config.max_requests,
            Duration::from_secs(config.window_secs),
            config.max_tracked_clients,
        ))
    }

    /// Count one request for `key` and decide whether it may proceed.
    pub fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> RateDecision {
        if !self.windows.contains_key(key) && self.windows.len() >= self.max_tracked_clients {
            if self.claim_prune(now) {
                self.prune(now);
            }
            if self.windows.len() >= self.max_tracked_clients {
                tracing::warn!(
                    tracked = self.windows.len(),
                    "rate limiter full, refusing new client"
                );
                return RateDecision::Limited {
                    retry_after: self.window,
                };
            }
        }

        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            window_start: now,
        });
        let window = entry.value_mut();

        if now.saturating_duration_since(window.window_start) >= self.window {
            window.count = 0;
            window.window_start = now;
        }

        if window.count >= self.max_requests {
            let elapsed = now.saturating_duration_since(window.window_start);
            return RateDecision::Limited {
                retry_after: self.window.saturating_sub(elapsed),
            };
        }

        window.count += 1;
        RateDecision::Allowed {
            remaining: self.max_requests - window.count,
        }
    }

    /// True for exactly one caller per `PRUNE_INTERVAL`.
    fn claim_prune(&self, now: Instant) -> bool {
        let at = now.saturating_duration_since(self.created).as_millis() as u64 + 1;
        let last = self.last_prune.load(Ordering::Relaxed);
        if last != 0 && at.saturating_sub(last) < PRUNE_INTERVAL.as_millis() as u64 {
            return false;
        }
        self.last_prune
            .compare_exchange(last, at, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    fn prune(&self, now: Instant) {
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.window_start) < self.window);
        tracing::debug!(
            pruned = before.saturating_sub(self.windows.len()),
            tracked = self.windows.len(),
            "pruned expired rate limit windows"
        );
    }

    /// Number of client keys currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}
