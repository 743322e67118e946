use serde::Serialize;
use std::hash::Hash;
use std::sync::Arc;
use tracing::info;

use crate::budget::{BudgetTracker, BudgetUsage};
use crate::cache::TtlCache;
use crate::config::{CacheConfig, GuardConfig};
use crate::error::Result;
use crate::limiter::SlidingWindowLimiter;
use crate::proxy::{ProxiedFetch, ProxyManager, RotationMode};
use crate::resilience::RetryingFetch;

/// Snapshot of the guard's state, safe to expose on a health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct GuardStatus {
    pub budgets: Vec<BudgetUsage>,
    pub limiter_keys: usize,
    pub proxy: ProxyStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProxyStatus {
    pub configured: bool,
    pub endpoints: usize,
    pub sticky_sessions: usize,
    pub default_mode: RotationMode,
}

/// One instance of every outbound-call component, built once at startup and
/// shared by handle.
///
/// Instances are independent: each process enforces its own limits.
#[derive(Debug, Clone)]
pub struct UpstreamGuard {
    pub limiter: Arc<SlidingWindowLimiter>,
    pub budgets: Arc<BudgetTracker>,
    pub proxies: Arc<ProxyManager>,
    pub fetch: Arc<RetryingFetch>,
    pub proxied: Arc<ProxiedFetch>,
}

impl UpstreamGuard {
    pub fn from_config(config: GuardConfig) -> Result<Self> {
        config.validate()?;

        let budgets = Arc::new(BudgetTracker::new(config.budgets.clone()));
        let limiter = Arc::new(SlidingWindowLimiter::new(config.limiter.clone()));
        let proxies = Arc::new(ProxyManager::new(config.proxy.clone()));
        let fetch = Arc::new(RetryingFetch::new(&config.fetch)?);
        let proxied = Arc::new(
            ProxiedFetch::new(Arc::clone(&proxies), &config.fetch)?.with_budget(Arc::clone(&budgets)),
        );

        info!(
            services = config.budgets.len(),
            proxy_configured = proxies.is_configured(),
            proxy_endpoints = proxies.endpoint_count(),
            fetch_timeout_ms = config.fetch.general_timeout.as_millis() as u64,
            proxied_timeout_ms = config.fetch.proxied_timeout.as_millis() as u64,
            "Upstream guard initialized"
        );

        Ok(Self {
            limiter,
            budgets,
            proxies,
            fetch,
            proxied,
        })
    }

    /// Build a cache for one use site. Caches share no state with each other
    /// or with a guard instance.
    pub fn cache<K, V>(config: CacheConfig) -> TtlCache<K, V>
    where
        K: Hash + Eq,
        V: Clone,
    {
        TtlCache::new(config)
    }

    pub async fn status(&self) -> GuardStatus {
        GuardStatus {
            budgets: self.budgets.usage_all().await,
            limiter_keys: self.limiter.tracked_keys().await,
            proxy: ProxyStatus {
                configured: self.proxies.is_configured(),
                endpoints: self.proxies.endpoint_count(),
                sticky_sessions: self.proxies.session_count().await,
                default_mode: self.proxies.default_mode(),
            },
        }
    }
}
