use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::duration_serde;

/// Configuration for retry strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Additional attempts after the first one
    pub max_retries: usize,
    /// Delay before the first retry
    #[serde(with = "duration_serde")]
    pub initial_backoff: Duration,
    /// Cap on the exponential part of the delay
    #[serde(with = "duration_serde")]
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,
    /// Upper bound of the random delay added on top
    #[serde(with = "duration_serde")]
    pub max_jitter: Duration,
    /// Whether to add jitter to backoff
    #[serde(default = "default_use_jitter")]
    pub use_jitter: bool,
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_use_jitter() -> bool {
    true
}

impl RetryConfig {
    /// Policy for direct calls (documents, images, JSON APIs)
    pub fn general() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            max_jitter: Duration::from_millis(150),
            use_jitter: true,
        }
    }

    /// Policy for calls routed through rotating proxies
    pub fn proxied() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(15),
            backoff_multiplier: 2.0,
            max_jitter: Duration::from_millis(500),
            use_jitter: true,
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Deterministic delays, mostly useful in tests
    pub fn without_jitter(mut self) -> Self {
        self.use_jitter = false;
        self
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::general()
    }
}

/// Exponential backoff implementation for retries
#[derive(Debug)]
pub struct ExponentialBackoff {
    /// Current attempt number
    current_attempt: usize,
    /// Configuration for the retry strategy
    config: RetryConfig,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with the given configuration
    pub fn new(config: RetryConfig) -> Self {
        Self {
            current_attempt: 0,
            config,
        }
    }

    /// Get the next backoff duration, or None if max retries reached
    pub fn next_backoff(&mut self) -> Option<Duration> {
        self.current_attempt += 1;

        if self.current_attempt > self.config.max_retries {
            return None;
        }

        let exp = self.current_attempt as f64 - 1.0;
        let base_ms = self.config.initial_backoff.as_millis() as f64;
        let backoff_ms = base_ms * self.config.backoff_multiplier.powf(exp);
        let max_ms = self.config.max_backoff.as_millis() as f64;
        let capped_ms = backoff_ms.min(max_ms) as u64;

        // Jitter is added on top so a retry never fires earlier than the base schedule
        let jitter_ms = if self.config.use_jitter {
            let max_jitter_ms = self.config.max_jitter.as_millis() as u64;
            rand::rng().random_range(0..=max_jitter_ms)
        } else {
            0
        };

        Some(Duration::from_millis(capped_ms + jitter_ms))
    }

    /// Retries handed out so far
    pub fn retries_used(&self) -> usize {
        self.current_attempt.min(self.config.max_retries)
    }

    /// Reset the backoff to start from the beginning
    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}
