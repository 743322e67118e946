// src/limiter/sliding_window.rs

use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::LimiterConfig;
use crate::limiter::RateLimitStatus;
use crate::rate_limit_event;

/// Timestamps of admitted requests for one key
#[derive(Debug)]
struct RateLimitBucket {
    timestamps: VecDeque<Instant>,
    /// Window of the most recent check, used by the sweep
    window: Duration,
}

impl RateLimitBucket {
    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.timestamps.front() {
            if now.duration_since(*oldest) >= self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn is_idle(&self, now: Instant) -> bool {
        match self.timestamps.back() {
            Some(newest) => now.duration_since(*newest) >= self.window,
            None => true,
        }
    }
}

#[derive(Debug)]
struct LimiterState {
    buckets: HashMap<String, RateLimitBucket>,
    last_sweep: Instant,
}

/// Sliding log rate limiter keyed by arbitrary strings.
///
/// Every check recomputes the window relative to now; there are no fixed
/// window boundaries. Idle keys are swept lazily, at most once per
/// `sweep_interval`.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    state: Mutex<LimiterState>,
    config: LimiterConfig,
}

impl SlidingWindowLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            state: Mutex::new(LimiterState {
                buckets: HashMap::new(),
                last_sweep: Instant::now(),
            }),
            config,
        }
    }

    /// Admit or reject one request for `key`.
    ///
    /// Only admitted requests are recorded.
    pub async fn check(&self, key: &str, limit: u64, window: Duration) -> RateLimitStatus {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        if now.duration_since(state.last_sweep) >= self.config.sweep_interval {
            let before = state.buckets.len();
            state.buckets.retain(|_, bucket| !bucket.is_idle(now));
            state.last_sweep = now;
            debug!(
                removed = before - state.buckets.len(),
                remaining = state.buckets.len(),
                "Swept idle rate limit keys"
            );
        }

        let bucket = state
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| RateLimitBucket {
                timestamps: VecDeque::new(),
                window,
            });
        bucket.window = window;
        bucket.prune(now);

        let count = bucket.timestamps.len() as u64;
        let allowed = count < limit;

        let status = if allowed {
            bucket.timestamps.push_back(now);
            RateLimitStatus {
                allowed: true,
                remaining: limit - count - 1,
                limit,
                retry_after: Duration::ZERO,
            }
        } else {
            // Time until the oldest admitted request leaves the window
            let retry_after = match bucket.timestamps.front() {
                Some(oldest) => window.saturating_sub(now.duration_since(*oldest)),
                None => window,
            };
            RateLimitStatus {
                allowed: false,
                remaining: 0,
                limit,
                retry_after,
            }
        };

        rate_limit_event!(key, status.allowed, limit, window.as_millis() as u64);
        status
    }

    /// Forget every request recorded for `key`
    pub async fn reset(&self, key: &str) {
        self.state.lock().await.buckets.remove(key);
    }

    /// Number of keys currently holding state
    pub async fn tracked_keys(&self) -> usize {
        self.state.lock().await.buckets.len()
    }
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::new(LimiterConfig::default())
    }
}
