//! Per-address sliding window rate limiting

use crate::error::{BridgeError, BridgeResult};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use tracing::debug;

/// Request timestamps retained for one address
#[derive(Debug, Default)]
struct SlidingWindow {
    requests: VecDeque<DateTime<Utc>>,
    /// Last access time (for cleanup)
    last_seen: Option<DateTime<Utc>>,
}

impl SlidingWindow {
    fn evict_before(&mut self, cutoff: DateTime<Utc>) {
        while self.requests.front().is_some_and(|t| *t <= cutoff) {
            self.requests.pop_front();
        }
    }
}

/// Sliding window limiter keyed by address
pub struct RateLimiter {
    windows: DashMap<String, SlidingWindow>,
    window: Duration,
    max_requests: usize,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            windows: DashMap::new(),
            window,
            max_requests,
        }
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a request for `address`, rejecting it if the window is full
    pub fn check(&self, address: &str) -> BridgeResult<()> {
        self.check_at(address, Utc::now())
    }

    pub fn check_at(&self, address: &str, now: DateTime<Utc>) -> BridgeResult<()> {
        let cutoff = now - self.window;
        let mut window = self.windows.entry(address.to_string()).or_default();

        window.evict_before(cutoff);
        window.last_seen = Some(now);

        if window.requests.len() >= self.max_requests {
            debug!(address, count = window.requests.len(), "Rate limit hit");
            return Err(BridgeError::RateLimitExceeded {
                address: address.to_string(),
                count: window.requests.len(),
                window_secs: self.window.num_seconds().max(0) as u64,
            });
        }

        window.requests.push_back(now);
        Ok(())
    }

    /// Requests retained in the window for `address` at `now`, without recording one
    pub fn recent_requests_at(&self, address: &str, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.window;
        self.windows
            .get(address)
            .map(|w| w.requests.iter().filter(|t| **t > cutoff).count())
            .unwrap_or(0)
    }

    /// Drop windows that have been idle for longer than the window size
    pub fn cleanup_at(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.window;
        let before = self.windows.len();
        self.windows.retain(|address, window| {
            let stale = window.last_seen.map_or(true, |seen| seen <= cutoff);
            if stale {
                debug!(address = %address, "Removing idle rate limit window");
            }
            !stale
        });
        before - self.windows.len()
    }

    /// Number of tracked addresses
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}
