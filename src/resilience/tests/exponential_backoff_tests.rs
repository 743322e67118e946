// src/resilience/tests/exponential_backoff_tests.rs

use std::time::Duration;
use crate::resilience::{ExponentialBackoff, RetryConfig};

fn config(max_retries: usize, initial_ms: u64, max_ms: u64) -> RetryConfig {
    RetryConfig {
        max_retries,
        initial_backoff: Duration::from_millis(initial_ms),
        max_backoff: Duration::from_millis(max_ms),
        backoff_multiplier: 2.0,
        max_jitter: Duration::from_millis(100),
        use_jitter: false, // Disable jitter for deterministic testing
    }
}

#[test]
fn test_backoff_doubles_per_retry() {
    let mut backoff = ExponentialBackoff::new(config(4, 250, 10_000));

    assert_eq!(backoff.next_backoff().unwrap(), Duration::from_millis(250));
    assert_eq!(backoff.next_backoff().unwrap(), Duration::from_millis(500));
    assert_eq!(backoff.next_backoff().unwrap(), Duration::from_millis(1000));
    assert_eq!(backoff.next_backoff().unwrap(), Duration::from_millis(2000));

    // Retry budget spent
    assert_eq!(backoff.next_backoff(), None);
    assert_eq!(backoff.retries_used(), 4);
}

#[test]
fn test_backoff_respects_max_backoff() {
    let mut backoff = ExponentialBackoff::new(config(5, 100, 300));

    assert_eq!(backoff.next_backoff().unwrap(), Duration::from_millis(100));
    assert_eq!(backoff.next_backoff().unwrap(), Duration::from_millis(200));

    // 400ms would exceed the cap
    assert_eq!(backoff.next_backoff().unwrap(), Duration::from_millis(300));
    assert_eq!(backoff.next_backoff().unwrap(), Duration::from_millis(300));
}

#[test]
fn test_jitter_is_added_on_top() {
    let mut jittered = config(3, 100, 10_000);
    jittered.use_jitter = true;

    for _ in 0..50 {
        let mut backoff = ExponentialBackoff::new(jittered.clone());
        let first = backoff.next_backoff().unwrap();
        let second = backoff.next_backoff().unwrap();

        assert!(
            first >= Duration::from_millis(100) && first <= Duration::from_millis(200),
            "First backoff with jitter should be between 100ms and 200ms, got {:?}",
            first
        );
        assert!(
            second >= Duration::from_millis(200) && second <= Duration::from_millis(300),
            "Second backoff with jitter should be between 200ms and 300ms, got {:?}",
            second
        );
    }
}

#[test]
fn test_jitter_applies_past_the_cap() {
    let mut jittered = config(3, 1000, 1000);
    jittered.use_jitter = true;

    let mut backoff = ExponentialBackoff::new(jittered);
    backoff.next_backoff();
    let capped = backoff.next_backoff().unwrap();
    assert!(capped >= Duration::from_millis(1000) && capped <= Duration::from_millis(1100));
}

#[test]
fn test_reset_restarts_backoff_sequence() {
    let mut backoff = ExponentialBackoff::new(config(2, 100, 10_000));

    assert_eq!(backoff.next_backoff().unwrap(), Duration::from_millis(100));
    assert_eq!(backoff.next_backoff().unwrap(), Duration::from_millis(200));
    assert_eq!(backoff.next_backoff(), None);

    backoff.reset();

    assert_eq!(backoff.retries_used(), 0);
    assert_eq!(backoff.next_backoff().unwrap(), Duration::from_millis(100));
}

#[test]
fn test_zero_retries_never_backs_off() {
    let mut backoff = ExponentialBackoff::new(config(0, 100, 10_000));
    assert_eq!(backoff.next_backoff(), None, "Zero retries should immediately return None");
    assert_eq!(backoff.retries_used(), 0);
}

#[test]
fn test_presets() {
    let general = RetryConfig::general();
    assert_eq!(general.max_retries, 2);
    assert_eq!(general.initial_backoff, Duration::from_millis(250));

    let proxied = RetryConfig::proxied().with_max_retries(5).without_jitter();
    assert_eq!(proxied.max_retries, 5);
    assert!(!proxied.use_jitter);

    let mut backoff = ExponentialBackoff::new(proxied);
    assert_eq!(backoff.next_backoff().unwrap(), Duration::from_millis(500));
    assert_eq!(backoff.next_backoff().unwrap(), Duration::from_millis(1000));
}
