use reqwest::{Client, Response, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use crate::budget::BudgetTracker;
use crate::config::FetchConfig;
use crate::error::{classify_status, GuardError, Result, StatusClass};
use crate::proxy::endpoint::RotationMode;
use crate::proxy::manager::{ProxyManager, ProxySelection};
use crate::resilience::{
    drain_body, pause, send_once, CancelSignal, ExponentialBackoff, HttpRequest, RetryConfig,
};

/// Per-call knobs for [`ProxiedFetch::fetch_via_proxy`]
#[derive(Debug, Clone)]
pub struct ProxyFetchOptions {
    /// Session key for sticky rotation
    pub sticky_key: Option<String>,
    /// Overrides the manager's default rotation mode
    pub rotation_mode: Option<RotationMode>,
    pub timeout: Duration,
    pub max_retries: usize,
    /// Attached to the call's tracing span
    pub log_label: String,
    /// Budget charged once per attempt
    pub budget_service: Option<String>,
    /// Fail with `ProxyUnavailable` instead of going direct
    pub require_proxy: bool,
    pub cancel: Option<CancelSignal>,
}

impl ProxyFetchOptions {
    pub fn new(log_label: impl Into<String>) -> Self {
        let defaults = FetchConfig::default();
        Self {
            sticky_key: None,
            rotation_mode: None,
            timeout: defaults.proxied_timeout,
            max_retries: defaults.proxied.max_retries,
            log_label: log_label.into(),
            budget_service: None,
            require_proxy: false,
            cancel: None,
        }
    }

    pub fn sticky(mut self, key: impl Into<String>) -> Self {
        self.sticky_key = Some(key.into());
        self
    }

    pub fn with_mode(mut self, mode: RotationMode) -> Self {
        self.rotation_mode = Some(mode);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn charge(mut self, service: impl Into<String>) -> Self {
        self.budget_service = Some(service.into());
        self
    }

    pub fn require_proxy(mut self) -> Self {
        self.require_proxy = true;
        self
    }

    pub fn with_cancel(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }
}

/// Retrying fetch that routes every attempt through the proxy pool.
///
/// Clients are cached per endpoint so connections to the same gateway are
/// pooled. When no proxy is configured calls go out on a shared direct client.
#[derive(Debug)]
pub struct ProxiedFetch {
    manager: Arc<ProxyManager>,
    budgets: Option<Arc<BudgetTracker>>,
    direct: Client,
    clients: Mutex<HashMap<String, Client>>,
    retry: RetryConfig,
    user_agent: String,
}

impl ProxiedFetch {
    pub fn new(manager: Arc<ProxyManager>, config: &FetchConfig) -> Result<Self> {
        let direct = build_client(&config.user_agent, None)?;

        Ok(Self {
            manager,
            budgets: None,
            direct,
            clients: Mutex::new(HashMap::new()),
            retry: config.proxied.clone(),
            user_agent: config.user_agent.clone(),
        })
    }

    pub fn with_budget(mut self, budgets: Arc<BudgetTracker>) -> Self {
        self.budgets = Some(budgets);
        self
    }

    /// Replace the backoff schedule; `max_retries` still comes from each call
    pub fn with_retry_policy(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn manager(&self) -> &Arc<ProxyManager> {
        &self.manager
    }

    /// Issue `request`, rotating proxies and retrying transient failures.
    ///
    /// A 429 or a connection failure puts the endpoint used for that attempt
    /// on cooldown. Budget exhaustion is returned at once and never retried.
    pub async fn fetch_via_proxy(
        &self,
        request: &HttpRequest,
        options: &ProxyFetchOptions,
    ) -> Result<Response> {
        let span = info_span!(
            "proxied_fetch",
            label = %options.log_label,
            request_id = %Uuid::new_v4()
        );
        self.attempt_loop(request, options).instrument(span).await
    }

    async fn attempt_loop(&self, request: &HttpRequest, options: &ProxyFetchOptions) -> Result<Response> {
        let mut backoff =
            ExponentialBackoff::new(self.retry.clone().with_max_retries(options.max_retries));
        let mode = options.rotation_mode.unwrap_or_else(|| self.manager.default_mode());
        let url = request.loggable_url();
        let mut attempt = 0usize;

        loop {
            attempt += 1;

            let selection = self
                .manager
                .select_endpoint(options.sticky_key.as_deref(), mode)
                .await;
            let client = match &selection {
                Some(selection) => self.client_for(selection).await?,
                None if options.require_proxy => {
                    return Err(GuardError::ProxyUnavailable(
                        "no proxy endpoint could be selected".to_string(),
                    ))
                }
                None => self.direct.clone(),
            };
            let route = route_name(selection.as_ref());

            // Only attempts that are about to go out are charged
            self.charge_budget(options).await?;
            let outcome = send_once(&client, request, options.timeout, options.cancel.as_ref()).await;

            match outcome {
                Ok(response) => match classify_status(response.status()) {
                    StatusClass::Success | StatusClass::NonRetryable => return Ok(response),
                    StatusClass::Retryable => {
                        let status = response.status();
                        if status == StatusCode::TOO_MANY_REQUESTS {
                            if let Some(selection) = &selection {
                                self.manager.mark_failed(selection.connection_string()).await;
                            }
                        }

                        let Some(delay) = backoff.next_backoff() else {
                            warn!(
                                %url,
                                attempt,
                                status = status.as_u16(),
                                route = %route,
                                "Retries exhausted, returning last response"
                            );
                            return Ok(response);
                        };

                        debug!(
                            %url,
                            attempt,
                            status = status.as_u16(),
                            route = %route,
                            delay_ms = delay.as_millis() as u64,
                            "Retryable status, backing off"
                        );
                        drain_body(response).await;
                        pause(delay, options.cancel.as_ref()).await?;
                    }
                },
                Err(err) if err.is_transient() => {
                    if let (GuardError::Network(_), Some(selection)) = (&err, &selection) {
                        self.manager.mark_failed(selection.connection_string()).await;
                    }

                    let Some(delay) = backoff.next_backoff() else {
                        warn!(%url, attempt, route = %route, error = %err, "Retries exhausted");
                        return Err(err);
                    };

                    debug!(
                        %url,
                        attempt,
                        route = %route,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "Transient failure, backing off"
                    );
                    pause(delay, options.cancel.as_ref()).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn charge_budget(&self, options: &ProxyFetchOptions) -> Result<()> {
        match (&self.budgets, &options.budget_service) {
            (Some(budgets), Some(service)) => budgets.spend(service).await,
            (None, Some(service)) => {
                debug!(service = %service, "No budget tracker attached, call not charged");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn client_for(&self, selection: &ProxySelection) -> Result<Client> {
        let key = selection.endpoint().key();
        let mut clients = self.clients.lock().await;

        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let proxy = self.manager.proxy_for(selection)?;
        let client = build_client(&self.user_agent, Some(proxy))?;
        debug!(endpoint = %key, "Built client for proxy endpoint");
        clients.insert(key, client.clone());
        Ok(client)
    }
}

fn build_client(user_agent: &str, proxy: Option<reqwest::Proxy>) -> Result<Client> {
    let mut builder = Client::builder().user_agent(user_agent);
    if let Some(proxy) = proxy {
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| GuardError::Config(format!("failed to build HTTP client: {}", e)))
}

fn route_name(selection: Option<&ProxySelection>) -> String {
    selection
        .map(ProxySelection::redacted)
        .unwrap_or_else(|| "direct".to_string())
}
