// src/config/tests.rs

use std::collections::HashMap;
use std::time::Duration;

use super::*;
use crate::error::GuardError;

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key: &str| vars.get(key).cloned()
}

#[test]
fn test_defaults_are_valid() {
    let config = GuardConfig::from_lookup(lookup(&[])).unwrap();

    assert_eq!(config.budgets["places"].max_calls, 500);
    assert_eq!(config.budgets["email"].window, Duration::from_secs(600));
    assert_eq!(config.limiter.sweep_interval, Duration::from_secs(60));
    assert_eq!(config.proxy.sticky_ttl, Duration::from_secs(600));
    assert_eq!(config.proxy.default_mode, RotationMode::PerSession);
    assert!(!config.proxy.has_credentials());
    assert_eq!(config.fetch.general_timeout, Duration::from_secs(8));
    assert_eq!(config.fetch.proxied_timeout, Duration::from_secs(30));
}

#[test]
fn test_environment_overrides() {
    let config = GuardConfig::from_lookup(lookup(&[
        ("GUARD_SERVICE_BUDGETS", r#"{"demo": {"max_calls": 3, "window_ms": 1000}}"#),
        ("BUDGET_PLACES_MAX_CALLS", "10"),
        ("BUDGET_DEMO_WINDOW_MS", "2500"),
        ("PROXY_USERNAME", "scout"),
        ("PROXY_PASSWORD", "hunter2"),
        ("PROXY_ENDPOINTS", "gate-a.example.net:7000, gate-b.example.net:7001,"),
        ("PROXY_ROTATION", "per-request"),
        ("PROXY_SCHEME", "socks5"),
        ("FETCH_RETRIES", "4"),
        ("PROXY_FETCH_TIMEOUT_MS", "12000"),
    ]))
    .unwrap();

    let demo = &config.budgets["demo"];
    assert_eq!(demo.max_calls, 3);
    assert_eq!(demo.window, Duration::from_millis(2500));
    assert_eq!(demo.label, "demo", "Missing labels fall back to the service name");
    assert_eq!(config.budgets["places"].max_calls, 10);

    assert!(config.proxy.has_credentials());
    assert_eq!(
        config.proxy.endpoints,
        vec![
            ProxyEndpoint::new("gate-a.example.net", 7000),
            ProxyEndpoint::new("gate-b.example.net", 7001),
        ]
    );
    assert_eq!(config.proxy.default_mode, RotationMode::PerRequest);
    assert_eq!(config.proxy.scheme, ProxyScheme::Socks5);
    assert_eq!(config.fetch.general.max_retries, 4);
    assert_eq!(config.fetch.proxied_timeout, Duration::from_millis(12_000));
}

#[test]
fn test_blank_values_count_as_unset() {
    let config = GuardConfig::from_lookup(lookup(&[
        ("PROXY_USERNAME", "  "),
        ("FETCH_RETRIES", ""),
    ]))
    .unwrap();

    assert!(config.proxy.username.is_none());
    assert_eq!(config.fetch.general.max_retries, 2);
}

#[test]
fn test_invalid_values_are_rejected() {
    let cases: [&[(&str, &str)]; 5] = [
        &[("FETCH_RETRIES", "lots")],
        &[("PROXY_ENDPOINTS", "gate-a.example.net")],
        &[("PROXY_ROTATION", "random")],
        &[("GUARD_SERVICE_BUDGETS", "{not json")],
        &[("BUDGET_EMAIL_MAX_CALLS", "0")],
    ];

    for pairs in cases {
        match GuardConfig::from_lookup(lookup(pairs)) {
            Err(GuardError::Config(_)) => {}
            other => panic!("{:?} should be rejected, got {:?}", pairs, other.map(|_| ())),
        }
    }
}

#[test]
fn test_validate_rejects_zero_durations() {
    let mut config = GuardConfig::defaults();
    config.limiter.sweep_interval = Duration::ZERO;
    assert!(config.validate().is_err());

    let mut config = GuardConfig::defaults();
    config.fetch.proxied_timeout = Duration::ZERO;
    assert!(config.validate().is_err());
}

#[test]
fn test_env_segment() {
    assert_eq!(env_segment("places-v2"), "PLACES_V2");
    assert_eq!(env_segment("email"), "EMAIL");
}

#[test]
fn test_proxy_secrets_stay_out_of_output() {
    let config = ProxyConfig {
        username: Some("scout".to_string()),
        password: Some("hunter2".to_string()),
        ..ProxyConfig::default()
    };

    let debug = format!("{:?}", config);
    assert!(!debug.contains("scout"));
    assert!(!debug.contains("hunter2"));

    let json = serde_json::to_string(&config).unwrap();
    assert!(!json.contains("scout"));
    assert!(!json.contains("hunter2"));
}

#[test]
fn test_service_policy_serde_uses_millis() {
    let policy: ServicePolicy =
        serde_json::from_str(r#"{"max_calls": 40, "window_ms": 600000, "label": "Browser automation"}"#)
            .unwrap();
    assert_eq!(policy, ServicePolicy::new(40, Duration::from_secs(600), "Browser automation"));

    let json = serde_json::to_value(&policy).unwrap();
    assert_eq!(json["window_ms"], 600_000);
}
