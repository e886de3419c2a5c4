//! Fixed-window counter limiter over a bounded key cache.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use moka::sync::Cache;
use tracing::debug;

use taxhub_core::config::rate_limit::PoolConfig;

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request is within quota.
    Allowed {
        /// Requests left in the current window.
        remaining: u32,
        /// Limit in effect (nominal, or scaled down under load).
        limit: u32,
    },
    /// The request exceeds quota.
    Denied {
        /// Whole seconds until the window resets, rounded up, at
        /// least 1.
        retry_after_seconds: u64,
        /// Limit in effect.
        limit: u32,
    },
}

impl Decision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

#[derive(Debug)]
struct WindowState {
    window_start: Instant,
    count: u32,
}

/// Per-key fixed-window counter.
///
/// Key state lives in a bounded `moka` cache: least-recently-seen keys
/// are evicted under pressure, and keys idle for a full window expire
/// outright. An evicted key restarts with a fresh window, which only
/// ever errs in the caller's favor.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    windows: Cache<String, Arc<Mutex<WindowState>>>,
    window: Duration,
    nominal_limit: u32,
    effective_limit: AtomicU32,
}

impl FixedWindowLimiter {
    /// Build a limiter for one quota pool.
    pub fn new(pool: PoolConfig, max_tracked_keys: u64) -> Self {
        let window = Duration::from_millis(pool.window_ms);
        let windows = Cache::builder()
            .max_capacity(max_tracked_keys)
            .time_to_idle(window)
            .build();
        Self {
            windows,
            window,
            nominal_limit: pool.limit,
            effective_limit: AtomicU32::new(pool.limit),
        }
    }

    /// Record one request for `key` and decide whether it may proceed.
    ///
    /// The first request of a window always passes (limits are >= 1);
    /// once the counter exceeds the effective limit every further
    /// request in the window is denied with the time to the reset.
    pub fn check(&self, key: &str) -> Decision {
        let now = Instant::now();
        let state = self
            .windows
            .get_with(key.to_string(), || {
                Arc::new(Mutex::new(WindowState {
                    window_start: now,
                    count: 0,
                }))
            });

        let limit = self.effective_limit.load(Ordering::Relaxed);
        let mut state = match state.lock() {
            Ok(guard) => guard,
            // A poisoned window only affects this key; start it over.
            Err(poisoned) => poisoned.into_inner(),
        };

        let elapsed = now.saturating_duration_since(state.window_start);
        if elapsed >= self.window {
            state.window_start = now;
            state.count = 0;
        }
        state.count += 1;

        if state.count > limit {
            let remaining_window = self
                .window
                .saturating_sub(now.saturating_duration_since(state.window_start));
            let retry_after_seconds = (remaining_window.as_secs_f64().ceil() as u64).max(1);
            Decision::Denied {
                retry_after_seconds,
                limit,
            }
        } else {
            Decision::Allowed {
                remaining: limit - state.count,
                limit,
            }
        }
    }

    /// The configured (unscaled) limit.
    pub fn nominal_limit(&self) -> u32 {
        self.nominal_limit
    }

    /// The limit currently in effect.
    pub fn effective_limit(&self) -> u32 {
        self.effective_limit.load(Ordering::Relaxed)
    }

    /// Scale the effective limit to a fraction of nominal. Clamped so
    /// the limit never drops below 1.
    pub fn set_scale(&self, scale: f64) {
        let scaled = ((self.nominal_limit as f64 * scale).floor() as u32).max(1);
        let previous = self.effective_limit.swap(scaled, Ordering::Relaxed);
        if previous != scaled {
            debug!(
                nominal = self.nominal_limit,
                effective = scaled,
                "Rate limit scaled"
            );
        }
    }

    /// Fraction of the key-cache capacity in use, 0.0 to 1.0.
    pub fn occupancy(&self) -> f64 {
        self.windows.run_pending_tasks();
        let capacity = self.windows.policy().max_capacity().unwrap_or(u64::MAX);
        if capacity == 0 {
            return 0.0;
        }
        (self.windows.entry_count() as f64 / capacity as f64).min(1.0)
    }

    /// Number of distinct keys currently tracked.
    pub fn tracked_keys(&self) -> u64 {
        self.windows.run_pending_tasks();
        self.windows.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limit: u32, window_ms: u64) -> FixedWindowLimiter {
        FixedWindowLimiter::new(PoolConfig::new(limit, window_ms), 100)
    }

    #[test]
    fn test_allows_up_to_limit_then_denies() {
        let l = limiter(5, 60_000);
        for i in 0..5 {
            let decision = l.check("client-a");
            assert!(decision.is_allowed(), "request {i} should pass");
        }
        match l.check("client-a") {
            Decision::Denied {
                retry_after_seconds,
                limit,
            } => {
                assert_eq!(limit, 5);
                assert!(retry_after_seconds >= 1 && retry_after_seconds <= 60);
            }
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[test]
    fn test_keys_are_independent() {
        let l = limiter(1, 60_000);
        assert!(l.check("client-a").is_allowed());
        assert!(!l.check("client-a").is_allowed());
        assert!(l.check("client-b").is_allowed());
    }

    #[test]
    fn test_window_expiry_resets_counter() {
        let l = limiter(3, 200);
        for _ in 0..3 {
            assert!(l.check("client-a").is_allowed());
        }
        assert!(!l.check("client-a").is_allowed());

        std::thread::sleep(Duration::from_millis(250));

        // A fresh window: the counter restarts at 1.
        match l.check("client-a") {
            Decision::Allowed { remaining, .. } => assert_eq!(remaining, 2),
            other => panic!("expected fresh window, got {other:?}"),
        }
    }

    #[test]
    fn test_remaining_counts_down() {
        let l = limiter(3, 60_000);
        let remaining: Vec<u32> = (0..3)
            .map(|_| match l.check("client-a") {
                Decision::Allowed { remaining, .. } => remaining,
                other => panic!("unexpected denial: {other:?}"),
            })
            .collect();
        assert_eq!(remaining, vec![2, 1, 0]);
    }

    #[test]
    fn test_scaling_lowers_effective_limit() {
        let l = limiter(10, 60_000);
        l.set_scale(0.5);
        assert_eq!(l.effective_limit(), 5);
        for _ in 0..5 {
            assert!(l.check("client-a").is_allowed());
        }
        assert!(!l.check("client-a").is_allowed());

        l.set_scale(1.0);
        assert_eq!(l.effective_limit(), 10);
    }

    #[test]
    fn test_scale_never_drops_below_one() {
        let l = limiter(2, 60_000);
        l.set_scale(0.1);
        assert_eq!(l.effective_limit(), 1);
        assert!(l.check("client-a").is_allowed());
    }
}
