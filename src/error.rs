// for error definitions
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GuardError {
    /// A service budget is exhausted and its breaker is open. Callers fail fast.
    #[error("Budget exceeded for {label} ({service}), retry after {retry_after:?}")]
    BudgetExceeded {
        service: String,
        label: String,
        retry_after: Duration,
    },

    /// A single attempt ran past its deadline. `timeout` is unknown when the
    /// client reported the timeout on its own.
    #[error(
        "Request to {url} timed out{}",
        .timeout.map(|t| format!(" after {:?}", t)).unwrap_or_default()
    )]
    Timeout { url: String, timeout: Option<Duration> },

    /// Connection or send failure before a response arrived
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    /// The caller's cancellation signal fired
    #[error("Request cancelled by caller")]
    Cancelled,

    /// Any other HTTP client error (builder, redirect, decode)
    #[error("Request error: {0}")]
    Request(#[source] reqwest::Error),

    /// No proxy endpoint could be selected while one was required
    #[error("Proxy unavailable: {0}")]
    ProxyUnavailable(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected or internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GuardError {
    /// Connection failures and timeouts are worth another attempt; nothing else is.
    pub fn is_transient(&self) -> bool {
        matches!(self, GuardError::Timeout { .. } | GuardError::Network(_))
    }

    pub fn is_budget_exceeded(&self) -> bool {
        matches!(self, GuardError::BudgetExceeded { .. })
    }

    /// Status code and message that are safe to show an end user.
    ///
    /// Internal quota state and upstream details never leak through here.
    pub fn public_response(&self) -> (u16, &'static str) {
        match self {
            GuardError::BudgetExceeded { .. } => (
                503,
                "Service temporarily unavailable, please try again shortly",
            ),
            GuardError::Timeout { .. } => (504, "Upstream service did not respond in time"),
            GuardError::Network(_) | GuardError::ProxyUnavailable(_) => {
                (502, "Upstream service is unreachable")
            }
            _ => (500, "Internal server error"),
        }
    }
}

// Timeouts and transport failures are transient, the rest is terminal
impl From<reqwest::Error> for GuardError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GuardError::Timeout {
                url: err
                    .url()
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| "<unknown>".to_string()),
                timeout: None,
            }
        } else if err.is_connect() || err.is_request() {
            GuardError::Network(err)
        } else {
            GuardError::Request(err)
        }
    }
}

impl From<serde_json::Error> for GuardError {
    fn from(err: serde_json::Error) -> Self {
        GuardError::Config(format!("invalid JSON: {}", err))
    }
}

/// How the retry loops treat an HTTP status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 2xx, returned immediately
    Success,
    /// Request timeout, too many requests and the common gateway/server errors
    Retryable,
    /// Any other status, returned as-is
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> StatusClass {
    if status.is_success() {
        return StatusClass::Success;
    }

    match status.as_u16() {
        408 | 429 | 500 | 502 | 503 | 504 => StatusClass::Retryable,
        _ => StatusClass::NonRetryable,
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, GuardError>;
