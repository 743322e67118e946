// src/test_utils.rs

use std::collections::HashMap;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::config::{FetchConfig, ProxyConfig, ServicePolicy};
use crate::proxy::ProxyEndpoint;
use crate::resilience::{FetchOptions, HttpRequest, RetryConfig};

pub const TEST_PROXY_USER: &str = "scout-user-7731";
pub const TEST_PROXY_PASS: &str = "s3cr3t!pa55";

/// Fast, deterministic retry policy for tests that talk to a mock server
pub fn fast_retry(max_retries: usize) -> RetryConfig {
    RetryConfig {
        max_retries,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        backoff_multiplier: 2.0,
        max_jitter: Duration::ZERO,
        use_jitter: false,
    }
}

pub fn fast_options(max_retries: usize, timeout: Duration) -> FetchOptions {
    FetchOptions::new(timeout, fast_retry(max_retries))
}

pub fn test_fetch_config() -> FetchConfig {
    FetchConfig {
        general: fast_retry(2),
        general_timeout: Duration::from_secs(2),
        proxied: fast_retry(3),
        proxied_timeout: Duration::from_secs(2),
        ..FetchConfig::default()
    }
}

/// Proxy pool with credentials and `count` endpoints on 10.0.0.x
pub fn test_proxy_config(count: usize) -> ProxyConfig {
    ProxyConfig {
        username: Some(TEST_PROXY_USER.to_string()),
        password: Some(TEST_PROXY_PASS.to_string()),
        endpoints: (1..=count)
            .map(|i| ProxyEndpoint::new(format!("10.0.0.{}", i), 8000 + i as u16))
            .collect(),
        ..ProxyConfig::default()
    }
}

pub fn single_budget(service: &str, max_calls: u32, window: Duration) -> HashMap<String, ServicePolicy> {
    let mut budgets = HashMap::new();
    budgets.insert(service.to_string(), ServicePolicy::new(max_calls, window, service));
    budgets
}

/// Mount a route answering with `statuses` in order, then `fallback` forever
pub async fn mount_sequence(server: &MockServer, route: &str, statuses: &[u16], fallback: u16) {
    for status in statuses {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(*status))
            .up_to_n_times(1)
            .mount(server)
            .await;
    }

    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(fallback).set_body_string("ok"))
        .mount(server)
        .await;
}

pub fn get(server: &MockServer, route: &str) -> HttpRequest {
    HttpRequest::get(&format!("{}{}", server.uri(), route)).expect("mock server URL is valid")
}

pub async fn request_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .map(|requests| requests.len())
        .unwrap_or(0)
}
