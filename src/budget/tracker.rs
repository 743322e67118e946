use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::budget_event;
use crate::config::ServicePolicy;
use crate::error::{GuardError, Result};

/// The state of a service breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    /// Calls flow and are counted
    Closed,
    /// Ceiling reached, every call is rejected until the cooldown elapses
    Open,
}

/// Usage snapshot for observability
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetUsage {
    pub service: String,
    pub label: String,
    pub calls: usize,
    pub limit: u32,
    pub window_ms: u64,
    pub tripped: bool,
    pub tripped_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct BudgetState {
    calls: VecDeque<Instant>,
    tripped_at: Option<Instant>,
    tripped_wall: Option<DateTime<Utc>>,
}

impl BudgetState {
    fn prune(&mut self, window: Duration, now: Instant) {
        while let Some(oldest) = self.calls.front() {
            if now.duration_since(*oldest) >= window {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }

    /// Close the breaker if its cooldown has run out
    fn refresh(&mut self, service: &str, policy: &ServicePolicy, now: Instant) {
        if let Some(tripped_at) = self.tripped_at {
            if now.duration_since(tripped_at) >= policy.window {
                self.tripped_at = None;
                self.tripped_wall = None;
                self.calls.clear();
                info!(service, label = %policy.label, "Service budget cooldown elapsed, circuit closed");
            }
        }
        self.prune(policy.window, now);
    }

    fn allows(&self, policy: &ServicePolicy) -> bool {
        self.tripped_at.is_none() && self.calls.len() < policy.max_calls as usize
    }

    fn retry_after(&self, policy: &ServicePolicy, now: Instant) -> Duration {
        match (self.tripped_at, self.calls.front()) {
            (Some(tripped_at), _) => policy.window.saturating_sub(now.duration_since(tripped_at)),
            (None, Some(oldest)) => policy.window.saturating_sub(now.duration_since(*oldest)),
            (None, None) => Duration::ZERO,
        }
    }

    fn record(&mut self, service: &str, policy: &ServicePolicy, now: Instant) {
        self.calls.push_back(now);
        let calls = self.calls.len();
        let limit = policy.max_calls;

        if self.tripped_at.is_none() && calls >= limit as usize {
            self.tripped_at = Some(now);
            self.tripped_wall = Some(Utc::now());
            warn!(
                service,
                label = %policy.label,
                calls,
                limit,
                window_ms = policy.window.as_millis() as u64,
                "Service budget exhausted, circuit opened"
            );
        }

        budget_event!(service, calls, limit, self.tripped_at.is_some());
    }
}

/// Per-service call budget with a hard circuit breaker.
///
/// Services without a policy are not tracked: they are always allowed and
/// recording them is a no-op.
#[derive(Debug)]
pub struct BudgetTracker {
    policies: HashMap<String, ServicePolicy>,
    state: Mutex<HashMap<String, BudgetState>>,
}

impl BudgetTracker {
    pub fn new(policies: HashMap<String, ServicePolicy>) -> Self {
        Self {
            policies,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Add or replace one policy; builder style for tests and ad-hoc setups
    pub fn with_policy(mut self, service: impl Into<String>, policy: ServicePolicy) -> Self {
        self.policies.insert(service.into(), policy);
        self
    }

    pub fn policy(&self, service: &str) -> Option<&ServicePolicy> {
        self.policies.get(service)
    }

    /// Whether a call to `service` would be admitted right now
    pub async fn can_call(&self, service: &str) -> bool {
        let Some(policy) = self.policies.get(service) else {
            return true;
        };

        let now = Instant::now();
        let mut states = self.state.lock().await;
        let state = states.entry(service.to_string()).or_default();
        state.refresh(service, policy, now);
        state.allows(policy)
    }

    /// Count one call against `service`, opening the breaker at the ceiling
    pub async fn record(&self, service: &str) {
        let Some(policy) = self.policies.get(service) else {
            return;
        };

        let now = Instant::now();
        let mut states = self.state.lock().await;
        let state = states.entry(service.to_string()).or_default();
        state.refresh(service, policy, now);
        state.record(service, policy, now);
    }

    /// Check and record under one lock.
    ///
    /// Rejected calls are not counted and surface as
    /// [`GuardError::BudgetExceeded`].
    pub async fn spend(&self, service: &str) -> Result<()> {
        let Some(policy) = self.policies.get(service) else {
            return Ok(());
        };

        let now = Instant::now();
        let mut states = self.state.lock().await;
        let state = states.entry(service.to_string()).or_default();
        state.refresh(service, policy, now);

        if !state.allows(policy) {
            return Err(GuardError::BudgetExceeded {
                service: service.to_string(),
                label: policy.label.clone(),
                retry_after: state.retry_after(policy, now),
            });
        }

        state.record(service, policy, now);
        Ok(())
    }

    pub async fn usage(&self, service: &str) -> Option<BudgetUsage> {
        let policy = self.policies.get(service)?;
        let now = Instant::now();
        let mut states = self.state.lock().await;
        let state = states.entry(service.to_string()).or_default();
        state.refresh(service, policy, now);

        Some(BudgetUsage {
            service: service.to_string(),
            label: policy.label.clone(),
            calls: state.calls.len(),
            limit: policy.max_calls,
            window_ms: policy.window.as_millis() as u64,
            tripped: state.tripped_at.is_some(),
            tripped_at: state.tripped_wall,
        })
    }

    /// Usage of every configured service, sorted by name
    pub async fn usage_all(&self) -> Vec<BudgetUsage> {
        let mut services: Vec<&String> = self.policies.keys().collect();
        services.sort();

        let mut usage = Vec::with_capacity(services.len());
        for service in services {
            if let Some(entry) = self.usage(service).await {
                usage.push(entry);
            }
        }
        usage
    }

    pub async fn state(&self, service: &str) -> Option<CircuitState> {
        self.usage(service).await.map(|usage| {
            if usage.tripped {
                CircuitState::Open
            } else {
                CircuitState::Closed
            }
        })
    }

    /// Forget all calls and close the breaker for `service`
    pub async fn reset(&self, service: &str) {
        if self.state.lock().await.remove(service).is_some() {
            info!(service, "Service budget reset");
        }
    }
}
