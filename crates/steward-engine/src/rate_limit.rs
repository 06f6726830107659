//! Fixed-window rate limiting per user and globally.
//!
//! Counters are soft state: they live in process memory, are safe to lose on
//! restart, and are not shared between processes. The global window protects
//! the completion quota shared by every operator.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use steward_core::{RateLimitConfig, SharedClock};

/// Result of [`RateLimiter::allow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Denied { reset_in_secs: u64 },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed)
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    start: DateTime<Utc>,
    count: u32,
    last_seen: DateTime<Utc>,
}

impl Window {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            start: now,
            count: 0,
            last_seen: now,
        }
    }

    /// Start a new window once the current one has ended.
    fn roll(&mut self, now: DateTime<Utc>, length: Duration) {
        if now >= self.start + length {
            self.start = now;
            self.count = 0;
        }
    }

    /// Whole seconds until the window ends, rounded up.
    fn reset_in(&self, now: DateTime<Utc>, length: Duration) -> u64 {
        let remaining = (self.start + length - now).num_milliseconds().max(0) as u64;
        remaining.div_ceil(1000).max(1)
    }
}

struct Windows {
    users: HashMap<String, Window>,
    global: Window,
}

/// Per-user and global fixed-window limiter.
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: SharedClock,
    windows: Mutex<Windows>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: SharedClock) -> Self {
        let now = clock.now();
        Self {
            config,
            clock,
            windows: Mutex::new(Windows {
                users: HashMap::new(),
                global: Window::new(now),
            }),
        }
    }

    fn window_len(&self) -> Duration {
        Duration::seconds(self.config.window_secs as i64)
    }

    /// Count one request for `user_id` and decide whether it may proceed.
    ///
    /// Denied requests still count. When both scopes are exceeded, the shorter
    /// of the two resets is returned.
    pub fn allow(&self, user_id: &str) -> RateDecision {
        let now = self.clock.now();
        let length = self.window_len();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        windows.global.roll(now, length);
        windows.global.count = windows.global.count.saturating_add(1);
        windows.global.last_seen = now;
        let global = windows.global;

        let user = windows
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| Window::new(now));
        user.roll(now, length);
        user.count = user.count.saturating_add(1);
        user.last_seen = now;
        let user = *user;

        let user_reset = (user.count > self.config.per_user_max).then(|| user.reset_in(now, length));
        let global_reset =
            (global.count > self.config.global_max).then(|| global.reset_in(now, length));

        let reset_in_secs = match (user_reset, global_reset) {
            (None, None) => return RateDecision::Allowed,
            (Some(u), None) => u,
            (None, Some(g)) => g,
            (Some(u), Some(g)) => u.min(g),
        };

        tracing::info!(
            user_id = %user_id,
            user_count = user.count,
            global_count = global.count,
            reset_in_secs,
            "Rate limit exceeded"
        );
        RateDecision::Denied { reset_in_secs }
    }

    /// Evict per-user windows idle past the grace period. Returns how many.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let idle = self.window_len() + Duration::seconds(self.config.idle_grace_secs as i64);
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        let before = windows.users.len();
        windows.users.retain(|_, w| now < w.last_seen + idle);
        let evicted = before - windows.users.len();
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted idle rate-limit windows");
        }
        evicted
    }

    /// Number of users with a live window.
    pub fn tracked_users(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .users
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use steward_core::ManualClock;

    fn limiter(per_user: u32, global: u32) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let config = RateLimitConfig {
            per_user_max: per_user,
            global_max: global,
            window_secs: 60,
            idle_grace_secs: 300,
        };
        (RateLimiter::new(config, clock.clone()), clock)
    }

    #[test]
    fn test_eleventh_call_denied_then_window_restarts() {
        let (limiter, clock) = limiter(10, 50);

        for _ in 0..10 {
            assert!(limiter.allow("u").is_allowed());
        }
        clock.advance(Duration::seconds(20));
        match limiter.allow("u") {
            RateDecision::Denied { reset_in_secs } => {
                assert!(reset_in_secs <= 60);
                assert_eq!(reset_in_secs, 40);
            }
            RateDecision::Allowed => panic!("11th call should be denied"),
        }

        clock.advance(Duration::seconds(40));
        for _ in 0..10 {
            assert!(limiter.allow("u").is_allowed());
        }
    }

    #[test]
    fn test_users_are_independent() {
        let (limiter, _clock) = limiter(2, 50);
        assert!(limiter.allow("a").is_allowed());
        assert!(limiter.allow("a").is_allowed());
        assert!(!limiter.allow("a").is_allowed());
        assert!(limiter.allow("b").is_allowed());
    }

    #[test]
    fn test_global_window() {
        let (limiter, _clock) = limiter(10, 50);
        for i in 0..50 {
            assert!(limiter.allow(&format!("user-{}", i % 10)).is_allowed());
        }
        assert_eq!(
            limiter.allow("fresh"),
            RateDecision::Denied { reset_in_secs: 60 }
        );
    }

    #[test]
    fn test_both_exceeded_returns_shorter_reset() {
        let (limiter, clock) = limiter(1, 2);
        assert!(limiter.allow("a").is_allowed());
        clock.advance(Duration::seconds(30));
        // User "b" starts a window 30s after the global one.
        assert!(limiter.allow("b").is_allowed());
        clock.advance(Duration::seconds(10));
        assert_eq!(
            limiter.allow("b"),
            RateDecision::Denied { reset_in_secs: 20 }
        );
    }

    #[test]
    fn test_sweep_evicts_idle_users() {
        let (limiter, clock) = limiter(10, 50);
        limiter.allow("a");
        clock.advance(Duration::seconds(200));
        limiter.allow("b");
        assert_eq!(limiter.sweep(), 0);

        clock.advance(Duration::seconds(200));
        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.tracked_users(), 1);
    }
}
