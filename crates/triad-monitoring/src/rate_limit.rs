use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Keeps the backoff finite for persistent offenders.
const MAX_BACKOFF_EXPONENT: u32 = 32;

/// Per-endpoint request budget.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests admitted per rolling window.
    pub max_requests: u32,
    /// Width of the rolling window.
    pub window: Duration,
    /// Backoff grows by this factor on every repeated violation.
    pub backoff_multiplier: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 3,
            window: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

/// Quota left for one key/endpoint pair, as reported to callers.
#[derive(Debug, Clone, Serialize)]
pub struct RemainingQuota {
    pub remaining: u32,
    pub reset_in_seconds: f64,
}

#[derive(Default)]
struct ClientWindow {
    hits: VecDeque<Instant>,
    backoff_until: Option<Instant>,
    violations: u32,
    last_seen: Option<Instant>,
}

impl ClientWindow {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.hits.front() {
            if now.duration_since(*oldest) > window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    fn backed_off(&self, now: Instant) -> Option<Duration> {
        self.backoff_until
            .filter(|until| now < *until)
            .map(|until| until - now)
    }
}

/// Sliding-window request gate with exponential backoff per key/endpoint.
///
/// Violations accumulate for the lifetime of a window entry, so a client
/// that keeps tripping the limit waits longer every time. Requests arriving
/// during a backoff are denied without touching the window.
pub struct RateLimiter {
    windows: Mutex<HashMap<(String, String), ClientWindow>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Checks one request against the budget and records it when admitted.
    ///
    /// Returns `true` when the request must be rejected.
    pub async fn is_rate_limited(
        &self,
        key: &str,
        endpoint: &str,
        config: &RateLimitConfig,
    ) -> bool {
        let mut windows = self.windows.lock().await;
        let now = Instant::now();
        let window = windows
            .entry((key.to_string(), endpoint.to_string()))
            .or_default();
        window.last_seen = Some(now);
        window.prune(now, config.window);

        if window.backed_off(now).is_some() {
            return true;
        }

        if window.hits.len() as u32 >= config.max_requests {
            window.violations += 1;
            let exponent = window.violations.min(MAX_BACKOFF_EXPONENT);
            let backoff = config
                .window
                .mul_f64(config.backoff_multiplier.powi(exponent as i32));
            window.backoff_until = Some(now + backoff);
            warn!(
                key,
                endpoint,
                violations = window.violations,
                backoff_s = backoff.as_secs_f64(),
                "rate limit exceeded, backing off"
            );
            true
        } else {
            window.hits.push_back(now);
            false
        }
    }

    /// Remaining budget and the time until it replenishes.
    ///
    /// While backed off, the budget is zero and the reset time is the end
    /// of the backoff, even after the window's hits have aged out.
    pub async fn remaining_quota(
        &self,
        key: &str,
        endpoint: &str,
        config: &RateLimitConfig,
    ) -> RemainingQuota {
        let mut windows = self.windows.lock().await;
        let now = Instant::now();
        let Some(window) = windows.get_mut(&(key.to_string(), endpoint.to_string())) else {
            return RemainingQuota {
                remaining: config.max_requests,
                reset_in_seconds: config.window.as_secs_f64(),
            };
        };
        window.prune(now, config.window);

        if let Some(left) = window.backed_off(now) {
            return RemainingQuota {
                remaining: 0,
                reset_in_seconds: left.as_secs_f64(),
            };
        }

        let remaining = config.max_requests.saturating_sub(window.hits.len() as u32);
        let reset_in = window.hits.front().map_or(config.window, |oldest| {
            config.window.saturating_sub(now.duration_since(*oldest))
        });
        RemainingQuota {
            remaining,
            reset_in_seconds: reset_in.as_secs_f64(),
        }
    }

    /// Drops window entries idle for longer than `max_idle`.
    ///
    /// Returns how many entries were removed.
    pub async fn cleanup(&self, max_idle: Duration) -> usize {
        let mut windows = self.windows.lock().await;
        let now = Instant::now();
        let before = windows.len();
        windows.retain(|_, window| {
            window
                .last_seen
                .is_some_and(|seen| now.duration_since(seen) < max_idle)
        });
        let removed = before - windows.len();
        if removed > 0 {
            debug!(removed, "pruned idle rate limit windows");
        }
        removed
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
