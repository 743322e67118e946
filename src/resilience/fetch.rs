use reqwest::{Client, Response};
use std::time::Duration;
use tokio::time;
use tracing::{debug, warn};

use crate::config::FetchConfig;
use crate::error::{classify_status, GuardError, Result, StatusClass};
use crate::resilience::cancel::CancelSignal;
use crate::resilience::exponential_backoff::{ExponentialBackoff, RetryConfig};
use crate::resilience::request::HttpRequest;

/// Bodies larger than this are dropped instead of read to the end
pub const MAX_DRAIN_BYTES: usize = 1024 * 1024;

/// Per-call knobs for [`RetryingFetch::fetch`]
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Deadline for a single attempt
    pub timeout: Duration,
    /// Retry budget and backoff schedule
    pub retry: RetryConfig,
    /// Optional caller cancellation, combined with the timeout
    pub cancel: Option<CancelSignal>,
}

impl FetchOptions {
    pub fn new(timeout: Duration, retry: RetryConfig) -> Self {
        Self {
            timeout,
            retry,
            cancel: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retry.max_retries = retries;
        self
    }

    pub fn with_cancel(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }
}

/// HTTP client wrapper that bounds, retries and backs off single calls
#[derive(Debug, Clone)]
pub struct RetryingFetch {
    client: Client,
    defaults: FetchOptions,
}

impl RetryingFetch {
    /// Build a client from configuration, using the general retry policy as default
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| GuardError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(
            client,
            FetchOptions::new(config.general_timeout, config.general.clone()),
        ))
    }

    pub fn with_client(client: Client, defaults: FetchOptions) -> Self {
        Self { client, defaults }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn default_options(&self) -> FetchOptions {
        self.defaults.clone()
    }

    pub async fn fetch_default(&self, request: &HttpRequest) -> Result<Response> {
        self.fetch(request, &self.defaults).await
    }

    /// Issue `request`, retrying transient failures.
    ///
    /// 2xx and non-retryable statuses come back as-is. Retryable statuses and
    /// transient errors are retried up to `options.retry.max_retries` times;
    /// once the budget is spent the last response or error is returned.
    pub async fn fetch(&self, request: &HttpRequest, options: &FetchOptions) -> Result<Response> {
        let mut backoff = ExponentialBackoff::new(options.retry.clone());
        let url = request.loggable_url();
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            let outcome = send_once(&self.client, request, options.timeout, options.cancel.as_ref()).await;

            match outcome {
                Ok(response) => match classify_status(response.status()) {
                    StatusClass::Success | StatusClass::NonRetryable => return Ok(response),
                    StatusClass::Retryable => {
                        let status = response.status().as_u16();
                        let Some(delay) = backoff.next_backoff() else {
                            warn!(%url, attempt, status, "Retries exhausted, returning last response");
                            return Ok(response);
                        };

                        debug!(
                            %url,
                            attempt,
                            status,
                            delay_ms = delay.as_millis() as u64,
                            "Retryable status, backing off"
                        );
                        drain_body(response).await;
                        pause(delay, options.cancel.as_ref()).await?;
                    }
                },
                Err(err) if err.is_transient() => {
                    let Some(delay) = backoff.next_backoff() else {
                        warn!(%url, attempt, error = %err, "Retries exhausted");
                        return Err(err);
                    };

                    debug!(
                        %url,
                        attempt,
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
}

/// Run one attempt on `client`, aborting it when `timeout` elapses or `cancel` fires
pub(crate) async fn send_once(
    client: &Client,
    request: &HttpRequest,
    timeout: Duration,
    cancel: Option<&CancelSignal>,
) -> Result<Response> {
    let timed_out = || GuardError::Timeout {
        url: request.loggable_url(),
        timeout: Some(timeout),
    };

    let attempt = time::timeout(timeout, request.build(client, timeout).send());
    let outcome = match cancel {
        Some(signal) => {
            if signal.is_cancelled() {
                return Err(GuardError::Cancelled);
            }
            tokio::select! {
                outcome = attempt => outcome,
                _ = signal.cancelled() => return Err(GuardError::Cancelled),
            }
        }
        None => attempt.await,
    };

    match outcome {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(err)) if err.is_timeout() => Err(timed_out()),
        Ok(Err(err)) => Err(err.into()),
        Err(_elapsed) => Err(timed_out()),
    }
}

/// Wait out a backoff delay; a caller cancellation cuts it short
pub(crate) async fn pause(delay: Duration, cancel: Option<&CancelSignal>) -> Result<()> {
    match cancel {
        Some(signal) => tokio::select! {
            _ = time::sleep(delay) => Ok(()),
            _ = signal.cancelled() => Err(GuardError::Cancelled),
        },
        None => {
            time::sleep(delay).await;
            Ok(())
        }
    }
}

/// Read and discard a response body so its connection can go back to the pool
pub async fn drain_body(mut response: Response) {
    let mut drained = 0usize;

    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                drained += chunk.len();
                if drained >= MAX_DRAIN_BYTES {
                    debug!(drained, "Response body too large to drain, dropping connection");
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                debug!(error = %err, "Failed to drain response body");
                break;
            }
        }
    }
}
