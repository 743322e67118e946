// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{GuardError, Result};
use crate::proxy::{ProxyEndpoint, ProxyScheme, RotationMode};
use crate::resilience::RetryConfig;

/// Gateway used when proxy credentials are set but no endpoint list is
pub const DEFAULT_PROXY_ENDPOINT: &str = "127.0.0.1:3128";

/// Ceiling and rolling window for one named upstream service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePolicy {
    /// Calls allowed inside the window before the breaker opens
    pub max_calls: u32,

    /// Counting window, reused as the cooldown once tripped
    #[serde(rename = "window_ms", with = "duration_serde")]
    pub window: Duration,

    /// Human readable name used in logs and error messages
    #[serde(default)]
    pub label: String,
}

impl ServicePolicy {
    pub fn new(max_calls: u32, window: Duration, label: impl Into<String>) -> Self {
        Self {
            max_calls,
            window,
            label: label.into(),
        }
    }
}

/// Default budgets; the numbers are policy and meant to be overridden per deployment
pub fn default_budgets() -> HashMap<String, ServicePolicy> {
    let ten_minutes = Duration::from_secs(600);
    HashMap::from([
        (
            "places".to_string(),
            ServicePolicy::new(500, ten_minutes, "Places lookup"),
        ),
        (
            "email".to_string(),
            ServicePolicy::new(30, ten_minutes, "Transactional email"),
        ),
        (
            "browser".to_string(),
            ServicePolicy::new(40, ten_minutes, "Browser automation"),
        ),
    ])
}

/// Configuration for the sliding window limiter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Minimum time between two sweeps of idle keys
    #[serde(default = "default_sweep_interval", with = "duration_serde")]
    pub sweep_interval: Duration,
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            sweep_interval: default_sweep_interval(),
        }
    }
}

/// Configuration for one TTL cache instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries to store
    pub max_entries: usize,

    /// Lifetime of an entry after it was written
    #[serde(rename = "ttl_ms", with = "duration_serde")]
    pub ttl: Duration,
}

impl CacheConfig {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self { max_entries, ttl }
    }
}

/// Proxy pool and rotation settings
#[derive(Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default, skip_serializing)]
    pub username: Option<String>,

    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    #[serde(default)]
    pub endpoints: Vec<ProxyEndpoint>,

    #[serde(default)]
    pub scheme: ProxyScheme,

    /// How long a session key stays bound to its endpoint
    #[serde(default = "default_sticky_ttl", with = "duration_serde")]
    pub sticky_ttl: Duration,

    /// How long an endpoint is avoided after a failure
    #[serde(default = "default_failure_cooldown", with = "duration_serde")]
    pub failure_cooldown: Duration,

    #[serde(default)]
    pub default_mode: RotationMode,
}

fn default_sticky_ttl() -> Duration {
    Duration::from_secs(600)
}

fn default_failure_cooldown() -> Duration {
    Duration::from_secs(60)
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            endpoints: Vec::new(),
            scheme: ProxyScheme::default(),
            sticky_ttl: default_sticky_ttl(),
            failure_cooldown: default_failure_cooldown(),
            default_mode: RotationMode::default(),
        }
    }
}

// Hand-written so the password never ends up in a log line
impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("username", &self.username.as_ref().map(|_| "***"))
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("endpoints", &self.endpoints)
            .field("scheme", &self.scheme)
            .field("sticky_ttl", &self.sticky_ttl)
            .field("failure_cooldown", &self.failure_cooldown)
            .field("default_mode", &self.default_mode)
            .finish()
    }
}

impl ProxyConfig {
    /// Endpoints to rotate over, falling back to the default gateway
    pub fn effective_endpoints(&self) -> Vec<ProxyEndpoint> {
        if !self.endpoints.is_empty() {
            return self.endpoints.clone();
        }

        DEFAULT_PROXY_ENDPOINT
            .parse()
            .map(|endpoint| vec![endpoint])
            .unwrap_or_default()
    }

    pub fn has_credentials(&self) -> bool {
        matches!((&self.username, &self.password), (Some(u), Some(p)) if !u.is_empty() && !p.is_empty())
    }
}

/// Timeouts and retry policies for outbound calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    pub general: RetryConfig,

    #[serde(with = "duration_serde")]
    pub general_timeout: Duration,

    pub proxied: RetryConfig,

    #[serde(with = "duration_serde")]
    pub proxied_timeout: Duration,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_user_agent() -> String {
    format!("upstream_guard/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            general: RetryConfig::general(),
            general_timeout: Duration::from_secs(8),
            proxied: RetryConfig::proxied(),
            proxied_timeout: Duration::from_secs(30),
            user_agent: default_user_agent(),
        }
    }
}

/// Complete configuration for every component
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default = "default_budgets")]
    pub budgets: HashMap<String, ServicePolicy>,

    #[serde(default)]
    pub limiter: LimiterConfig,

    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub fetch: FetchConfig,
}

impl GuardConfig {
    /// Built-in defaults with no proxy credentials
    pub fn defaults() -> Self {
        Self {
            budgets: default_budgets(),
            ..Self::default()
        }
    }

    /// Read configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::defaults();

        if let Some(raw) = get("GUARD_SERVICE_BUDGETS") {
            let overrides: HashMap<String, ServicePolicy> = serde_json::from_str(&raw)?;
            config.budgets.extend(overrides);
        }

        let names: Vec<String> = config.budgets.keys().cloned().collect();
        for name in names {
            let prefix = format!("BUDGET_{}", env_segment(&name));
            let max_calls = parse_var::<u32>(&get, &format!("{}_MAX_CALLS", prefix))?;
            let window_ms = parse_var::<u64>(&get, &format!("{}_WINDOW_MS", prefix))?;
            if let Some(policy) = config.budgets.get_mut(&name) {
                if let Some(max_calls) = max_calls {
                    policy.max_calls = max_calls;
                }
                if let Some(window_ms) = window_ms {
                    policy.window = Duration::from_millis(window_ms);
                }
            }
        }

        for (name, policy) in config.budgets.iter_mut() {
            if policy.label.is_empty() {
                policy.label = name.clone();
            }
        }

        if let Some(ms) = parse_var::<u64>(&get, "RATE_LIMIT_SWEEP_INTERVAL_MS")? {
            config.limiter.sweep_interval = Duration::from_millis(ms);
        }

        let proxy = &mut config.proxy;
        proxy.username = get("PROXY_USERNAME");
        proxy.password = get("PROXY_PASSWORD");
        if let Some(list) = get("PROXY_ENDPOINTS") {
            proxy.endpoints = list
                .split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(ProxyEndpoint::from_str)
                .collect::<Result<Vec<_>>>()?;
        }
        if let Some(scheme) = parse_var::<ProxyScheme>(&get, "PROXY_SCHEME")? {
            proxy.scheme = scheme;
        }
        if let Some(secs) = parse_var::<u64>(&get, "PROXY_STICKY_TTL_SECS")? {
            proxy.sticky_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&get, "PROXY_FAILURE_COOLDOWN_SECS")? {
            proxy.failure_cooldown = Duration::from_secs(secs);
        }
        if let Some(mode) = parse_var::<RotationMode>(&get, "PROXY_ROTATION")? {
            proxy.default_mode = mode;
        }

        let fetch = &mut config.fetch;
        if let Some(ms) = parse_var::<u64>(&get, "FETCH_TIMEOUT_MS")? {
            fetch.general_timeout = Duration::from_millis(ms);
        }
        if let Some(retries) = parse_var::<usize>(&get, "FETCH_RETRIES")? {
            fetch.general.max_retries = retries;
        }
        if let Some(ms) = parse_var::<u64>(&get, "PROXY_FETCH_TIMEOUT_MS")? {
            fetch.proxied_timeout = Duration::from_millis(ms);
        }
        if let Some(retries) = parse_var::<usize>(&get, "PROXY_FETCH_RETRIES")? {
            fetch.proxied.max_retries = retries;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would make a component misbehave at runtime
    pub fn validate(&self) -> Result<()> {
        for (name, policy) in &self.budgets {
            if policy.max_calls == 0 {
                return Err(GuardError::Config(format!(
                    "budget '{}' must allow at least one call",
                    name
                )));
            }
            if policy.window.is_zero() {
                return Err(GuardError::Config(format!(
                    "budget '{}' needs a non-zero window",
                    name
                )));
            }
        }

        if self.limiter.sweep_interval.is_zero() {
            return Err(GuardError::Config(
                "rate limiter sweep interval must be non-zero".to_string(),
            ));
        }

        if self.proxy.sticky_ttl.is_zero() {
            return Err(GuardError::Config(
                "proxy sticky session TTL must be non-zero".to_string(),
            ));
        }

        if self.fetch.general_timeout.is_zero() || self.fetch.proxied_timeout.is_zero() {
            return Err(GuardError::Config("fetch timeouts must be non-zero".to_string()));
        }

        for policy in [&self.fetch.general, &self.fetch.proxied] {
            if policy.backoff_multiplier < 1.0 {
                return Err(GuardError::Config(
                    "backoff multiplier must be at least 1.0".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// `places-v2` becomes `PLACES_V2`
fn env_segment(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn parse_var<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| GuardError::Config(format!("invalid value for {}: {}", key, e))),
        None => Ok(None),
    }
}

// Helper module to serialize/deserialize Duration with serde
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests;
