//! Fixed-window rate limiter
//!
//! Counts requests per client key in fixed windows. A window starts with the
//! first request after the previous one elapsed; a request landing exactly
//! on the boundary opens the new window. Rejected requests still count and
//! never restart the window.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::clock::Clock;
use crate::error::ResilienceError;

/// Rate limit decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Request allowed
    Allowed {
        /// Requests left in the current window
        remaining: u32,
    },
    /// Request denied with retry-after duration
    Denied {
        /// Time until the current window elapses
        retry_after: Duration,
    },
}

impl RateLimitDecision {
    /// Whether the request may proceed.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Rate limit configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests allowed per window
    pub max_requests: u32,
    /// Window duration
    pub window: Duration,
    /// Upper bound on tracked client keys; least recently used keys are evicted
    pub max_clients: Option<usize>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 3,
            window: Duration::from_secs(60),
            max_clients: None,
        }
    }
}

impl RateLimitConfig {
    /// Creates a configuration allowing `max_requests` per `window`.
    #[must_use]
    pub const fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            max_clients: None,
        }
    }

    /// Bounds the number of tracked client keys.
    #[must_use]
    pub const fn with_max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = Some(max_clients);
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ResilienceError> {
        if self.max_requests == 0 {
            return Err(ResilienceError::invalid_config(
                "max_requests",
                "must be greater than 0",
            ));
        }
        if self.window.is_zero() {
            return Err(ResilienceError::invalid_config("window", "must be greater than 0"));
        }
        if self.max_clients == Some(0) {
            return Err(ResilienceError::invalid_config(
                "max_clients",
                "must be greater than 0 when set",
            ));
        }
        Ok(())
    }
}

/// Rate limit information for headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Requests allowed per window
    pub limit: u32,
    /// Requests left in the current window
    pub remaining: u32,
    /// When the current window ends, if one is active
    pub reset_at: Option<DateTime<Utc>>,
}

/// Per-client window state
#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    window_start: DateTime<Utc>,
}

impl RateWindow {
    const fn start(now: DateTime<Utc>) -> Self {
        Self {
            count: 1,
            window_start: now,
        }
    }

    fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        (now - self.window_start).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Fixed-window rate limiter keyed by client.
///
/// The read-increment-compare for a key happens under one lock, so
/// concurrent callers can never both be admitted past the limit.
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    windows: Mutex<LruCache<String, RateWindow>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("tracked_clients", &self.tracked_clients())
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Creates a new rate limiter.
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Result<Self, ResilienceError> {
        config.validate()?;
        let windows = match config.max_clients.and_then(NonZeroUsize::new) {
            Some(capacity) => LruCache::new(capacity),
            None => LruCache::unbounded(),
        };
        Ok(Self {
            config,
            clock,
            windows: Mutex::new(windows),
        })
    }

    /// Returns the configuration this limiter was built with
    #[must_use]
    pub const fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Checks if a request should be allowed
    pub fn allow(&self, client_key: &str) -> bool {
        self.check(client_key).is_allowed()
    }

    /// Counts a request against `client_key` and decides whether it may proceed.
    pub fn check(&self, client_key: &str) -> RateLimitDecision {
        let now = self.clock.now();
        let max = self.config.max_requests;
        let mut windows = self.windows.lock();

        if let Some(window) = windows.get_mut(client_key) {
            let elapsed = window.elapsed(now);
            if elapsed < self.config.window {
                window.count = window.count.saturating_add(1);
                if window.count <= max {
                    return RateLimitDecision::Allowed {
                        remaining: max - window.count,
                    };
                }
                let retry_after = self.config.window.saturating_sub(elapsed);
                debug!(client_key = %client_key, count = window.count, "Rate limit exceeded");
                return RateLimitDecision::Denied { retry_after };
            }
            *window = RateWindow::start(now);
        } else if let Some((evicted, _)) = windows.push(client_key.to_owned(), RateWindow::start(now))
        {
            debug!(evicted = %evicted, "Evicted least recently used rate limit window");
        }

        RateLimitDecision::Allowed { remaining: max - 1 }
    }

    /// Gets current rate limit info for a client without counting a request.
    #[must_use]
    pub fn info(&self, client_key: &str) -> RateLimitInfo {
        let now = self.clock.now();
        let windows = self.windows.lock();
        let limit = self.config.max_requests;

        match windows.peek(client_key) {
            Some(window) if window.elapsed(now) < self.config.window => RateLimitInfo {
                limit,
                remaining: limit.saturating_sub(window.count),
                reset_at: TimeDelta::from_std(self.config.window)
                    .ok()
                    .and_then(|w| window.window_start.checked_add_signed(w)),
            },
            _ => RateLimitInfo {
                limit,
                remaining: limit,
                reset_at: None,
            },
        }
    }

    /// Drops the window for `client_key`.
    pub fn reset(&self, client_key: &str) {
        self.windows.lock().pop(client_key);
    }

    /// Number of client keys currently tracked.
    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.windows.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(clock: &ManualClock, max: u32) -> RateLimiter {
        RateLimiter::new(
            RateLimitConfig::new(max, Duration::from_secs(60)),
            Arc::new(clock.clone()),
        )
        .unwrap()
    }

    #[test]
    fn test_limit_then_reject() {
        let clock = ManualClock::new();
        let rl = limiter(&clock, 3);

        assert!(rl.allow("10.0.0.1"));
        assert!(rl.allow("10.0.0.1"));
        assert!(rl.allow("10.0.0.1"));
        assert!(!rl.allow("10.0.0.1"));
    }

    #[test]
    fn test_keys_are_independent() {
        let clock = ManualClock::new();
        let rl = limiter(&clock, 1);

        assert!(rl.allow("a"));
        assert!(!rl.allow("a"));
        assert!(rl.allow("b"));
    }

    #[test]
    fn test_denied_reports_time_left_in_window() {
        let clock = ManualClock::new();
        let rl = limiter(&clock, 1);

        rl.check("a");
        clock.advance(Duration::from_secs(20));

        assert_eq!(
            rl.check("a"),
            RateLimitDecision::Denied {
                retry_after: Duration::from_secs(40)
            }
        );
    }

    #[test]
    fn test_remaining_counts_down() {
        let clock = ManualClock::new();
        let rl = limiter(&clock, 3);

        assert_eq!(rl.check("a"), RateLimitDecision::Allowed { remaining: 2 });
        assert_eq!(rl.check("a"), RateLimitDecision::Allowed { remaining: 1 });
        assert_eq!(rl.info("a").remaining, 1);
        assert_eq!(rl.check("a"), RateLimitDecision::Allowed { remaining: 0 });
    }

    #[test]
    fn test_info_for_unknown_client() {
        let clock = ManualClock::new();
        let rl = limiter(&clock, 5);

        let info = rl.info("nobody");
        assert_eq!(info.limit, 5);
        assert_eq!(info.remaining, 5);
        assert!(info.reset_at.is_none());
        assert_eq!(rl.tracked_clients(), 0);
    }

    #[test]
    fn test_reset_clears_window() {
        let clock = ManualClock::new();
        let rl = limiter(&clock, 1);

        assert!(rl.allow("a"));
        assert!(!rl.allow("a"));
        rl.reset("a");
        assert!(rl.allow("a"));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());

        assert!(RateLimiter::new(RateLimitConfig::new(0, Duration::from_secs(1)), clock.clone()).is_err());
        assert!(RateLimiter::new(RateLimitConfig::new(1, Duration::ZERO), clock.clone()).is_err());
        assert!(
            RateLimiter::new(RateLimitConfig::default().with_max_clients(0), clock).is_err()
        );
    }
}
