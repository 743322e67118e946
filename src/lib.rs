// library entry
pub mod budget;
pub mod cache;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod guard;
pub mod limiter;
pub mod logging;
pub mod proxy;
pub mod resilience;

#[cfg(test)]
mod test_utils;

#[cfg(test)]
mod tests;

// Re-export key components for convenience
pub use budget::{BudgetTracker, BudgetUsage, CircuitState};
pub use cache::TtlCache;
pub use concurrency::{with_limit, ConcurrencyLimiter};
pub use config::{CacheConfig, GuardConfig, ServicePolicy};
pub use error::{GuardError, Result};
pub use guard::{GuardStatus, UpstreamGuard};
pub use limiter::{client_identifier, RateLimitStatus, SlidingWindowLimiter};
pub use logging::init as init_logging;
pub use proxy::{redact, ProxiedFetch, ProxyFetchOptions, ProxyManager, ProxySelection, RotationMode};
pub use resilience::{cancel_pair, drain_body, FetchOptions, HttpRequest, RetryConfig, RetryingFetch};
