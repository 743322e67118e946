// src/limiter/mod.rs

pub mod client_ip;
pub mod sliding_window;

#[cfg(test)]
mod tests;

pub use client_ip::client_identifier;
pub use sliding_window::SlidingWindowLimiter;

use std::time::Duration;

/// Status returned by rate limiting operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// Whether the request was allowed
    pub allowed: bool,

    /// Requests still allowed in the current window
    pub remaining: u64,

    /// Limit the request was checked against
    pub limit: u64,

    /// How long until a rejected request could succeed; zero when allowed
    pub retry_after: Duration,
}
