//! Client-side request rate limiting.
//!
//! Tracks request timestamps per logical key over a trailing window.
//! Timestamps older than the window are purged lazily on each check, so
//! quota is restored incrementally as the window slides rather than all at
//! once. State is in-memory only and does not survive process restarts.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

/// Sliding-window rate limiter keyed by logical request class.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    requests: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Check whether a request under `key` is allowed right now.
    ///
    /// Allowed requests are recorded against the quota; denied requests are
    /// not, so a denied caller does not push its own retry further out.
    pub fn is_allowed(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut guard = match self.requests.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let timestamps = guard.entry(key.to_string()).or_default();
        Self::purge(timestamps, now, self.window);

        if timestamps.len() >= self.max_requests as usize {
            debug!(key, count = timestamps.len(), "rate limit denied");
            return false;
        }
        timestamps.push(now);
        true
    }

    /// Requests still available for `key` in the current window.
    pub fn remaining(&self, key: &str) -> u32 {
        let now = Instant::now();
        let mut guard = match self.requests.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let count = match guard.get_mut(key) {
            Some(timestamps) => {
                Self::purge(timestamps, now, self.window);
                timestamps.len() as u32
            }
            None => 0,
        };
        self.max_requests.saturating_sub(count)
    }

    /// Time until the oldest recorded request for `key` ages out of the
    /// window. Zero when quota is available.
    pub fn retry_after(&self, key: &str) -> Duration {
        let now = Instant::now();
        let mut guard = match self.requests.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(timestamps) = guard.get_mut(key) else {
            return Duration::ZERO;
        };
        Self::purge(timestamps, now, self.window);
        if timestamps.len() < self.max_requests as usize {
            return Duration::ZERO;
        }
        timestamps
            .first()
            .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
            .unwrap_or(Duration::ZERO)
    }

    /// Drop timestamps that fell out of the trailing window.
    /// The list is chronologically sorted since entries are only appended.
    fn purge(timestamps: &mut Vec<Instant>, now: Instant, window: Duration) {
        let cutoff_idx = timestamps.partition_point(|t| now.duration_since(*t) > window);
        if cutoff_idx > 0 {
            timestamps.drain(0..cutoff_idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_exactly_max_requests() {
        let limiter = RateLimiter::new(10, Duration::from_secs(60));
        for i in 0..10 {
            assert!(limiter.is_allowed("analyze"), "request {} denied", i);
        }
        assert!(!limiter.is_allowed("analyze"));
        assert_eq!(limiter.remaining("analyze"), 0);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.is_allowed("analyze"));
        assert!(limiter.is_allowed("stats"));
        assert!(!limiter.is_allowed("analyze"));
    }

    #[test]
    fn test_window_slides_incrementally() {
        let limiter = RateLimiter::new(2, Duration::from_millis(50));
        assert!(limiter.is_allowed("k"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.is_allowed("k"));
        // Window full: first timestamp is 30ms old, second is fresh
        assert!(!limiter.is_allowed("k"));
        std::thread::sleep(Duration::from_millis(30));
        // First timestamp has aged out (60ms > 50ms), second has not
        assert!(limiter.is_allowed("k"));
        assert!(!limiter.is_allowed("k"));
    }

    #[test]
    fn test_denied_request_is_not_recorded() {
        let limiter = RateLimiter::new(1, Duration::from_millis(50));
        assert!(limiter.is_allowed("k"));
        // Denials must not extend the window occupancy
        for _ in 0..5 {
            assert!(!limiter.is_allowed("k"));
        }
        std::thread::sleep(Duration::from_millis(60));
        assert!(limiter.is_allowed("k"));
    }

    #[test]
    fn test_remaining_floors_at_zero() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert_eq!(limiter.remaining("k"), 2);
        limiter.is_allowed("k");
        assert_eq!(limiter.remaining("k"), 1);
        limiter.is_allowed("k");
        limiter.is_allowed("k");
        assert_eq!(limiter.remaining("k"), 0);
    }

    #[test]
    fn test_retry_after_tracks_oldest_timestamp() {
        let limiter = RateLimiter::new(1, Duration::from_millis(100));
        assert_eq!(limiter.retry_after("k"), Duration::ZERO);
        assert!(limiter.is_allowed("k"));
        let wait = limiter.retry_after("k");
        assert!(wait > Duration::ZERO && wait <= Duration::from_millis(100));
    }
}
