// src/resilience/mod.rs
//! Resilience features for outbound calls.
//!
//! 1. **Retry with Exponential Backoff** - doubling delays with additive jitter
//! 2. **Timeout-bounded attempts** - every attempt races a deadline and an optional caller cancellation
//! 3. **Status classification** - 2xx returns, a fixed set of statuses retries, the rest is terminal

mod cancel;
mod exponential_backoff;
mod fetch;
mod request;

#[cfg(test)]
mod tests;

// Re-export key components
pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use exponential_backoff::{ExponentialBackoff, RetryConfig};
pub use fetch::{drain_body, FetchOptions, RetryingFetch, MAX_DRAIN_BYTES};
pub use request::HttpRequest;

pub(crate) use fetch::{pause, send_once};
