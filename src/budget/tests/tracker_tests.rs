// src/budget/tests/tracker_tests.rs

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing_test::traced_test;

use crate::budget::{BudgetTracker, CircuitState};
use crate::config::ServicePolicy;
use crate::error::GuardError;
use crate::test_utils::single_budget;

const WINDOW: Duration = Duration::from_millis(1000);

fn tracker(max_calls: u32) -> BudgetTracker {
    BudgetTracker::new(single_budget("places", max_calls, WINDOW))
}

#[tokio::test(start_paused = true)]
async fn test_recording_max_calls_trips_breaker() {
    let budgets = tracker(3);

    for _ in 0..2 {
        budgets.record("places").await;
        assert!(budgets.can_call("places").await);
    }

    budgets.record("places").await;
    assert!(!budgets.can_call("places").await, "Breaker should open at the ceiling");
    assert_eq!(budgets.state("places").await, Some(CircuitState::Open));
}

#[tokio::test(start_paused = true)]
async fn test_spend_when_open_does_not_count() {
    let budgets = tracker(2);

    budgets.spend("places").await.unwrap();
    budgets.spend("places").await.unwrap();

    for _ in 0..3 {
        match budgets.spend("places").await {
            Err(GuardError::BudgetExceeded { service, retry_after, .. }) => {
                assert_eq!(service, "places");
                assert!(retry_after > Duration::ZERO && retry_after <= WINDOW);
            }
            other => panic!("Expected BudgetExceeded, got {:?}", other),
        }
    }

    let usage = budgets.usage("places").await.unwrap();
    assert_eq!(usage.calls, 2, "Rejected spends must not increment the counter");
    assert!(usage.tripped);
    assert!(usage.tripped_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_breaker_closes_after_cooldown() {
    let budgets = tracker(1);

    budgets.spend("places").await.unwrap();
    assert!(!budgets.can_call("places").await);

    time::advance(Duration::from_millis(999)).await;
    assert!(!budgets.can_call("places").await, "Still cooling down");

    time::advance(Duration::from_millis(1)).await;
    assert!(budgets.can_call("places").await);

    let usage = budgets.usage("places").await.unwrap();
    assert_eq!(usage.calls, 0, "Cooldown expiry clears the counter");
    assert_eq!(budgets.state("places").await, Some(CircuitState::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_calls_outside_window_expire() {
    let budgets = tracker(3);

    budgets.record("places").await;
    budgets.record("places").await;
    time::advance(Duration::from_millis(1000)).await;

    budgets.record("places").await;
    budgets.record("places").await;
    assert!(budgets.can_call("places").await, "Old calls left the window");
    assert_eq!(budgets.usage("places").await.unwrap().calls, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_spends_never_overshoot() {
    let budgets = Arc::new(BudgetTracker::new(single_budget("places", 3, Duration::from_secs(60))));

    let spends = (0..20).map(|_| {
        let budgets = Arc::clone(&budgets);
        tokio::spawn(async move { budgets.spend("places").await })
    });
    let outcomes = join_all(spends).await;

    let admitted = outcomes
        .into_iter()
        .filter(|outcome| matches!(outcome, Ok(Ok(()))))
        .count();
    assert_eq!(admitted, 3);
    assert_eq!(budgets.usage("places").await.unwrap().calls, 3);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_service_is_untracked() {
    let budgets = tracker(1);

    for _ in 0..100 {
        budgets.spend("geocoder").await.unwrap();
    }
    assert!(budgets.can_call("geocoder").await);
    assert!(budgets.usage("geocoder").await.is_none());
    assert!(budgets.state("geocoder").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_reset_closes_breaker() {
    let budgets = tracker(1);

    budgets.spend("places").await.unwrap();
    assert!(!budgets.can_call("places").await);

    budgets.reset("places").await;
    assert!(budgets.can_call("places").await);
}

#[tokio::test(start_paused = true)]
async fn test_usage_all_lists_every_policy() {
    let budgets = tracker(5).with_policy("email", ServicePolicy::new(30, WINDOW, "Transactional email"));

    budgets.spend("email").await.unwrap();

    let usage = budgets.usage_all().await;
    let services: Vec<&str> = usage.iter().map(|entry| entry.service.as_str()).collect();
    assert_eq!(services, vec!["email", "places"]);
    assert_eq!(usage[0].calls, 1);
    assert_eq!(usage[0].label, "Transactional email");
    assert_eq!(usage[1].calls, 0);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_trip_is_logged_once() {
    let budgets = tracker(1);

    budgets.spend("places").await.unwrap();
    let _ = budgets.spend("places").await;

    assert!(logs_contain("Service budget exhausted, circuit opened"));
    logs_assert(|lines: &[&str]| {
        let trips = lines
            .iter()
            .filter(|line| line.contains("circuit opened"))
            .count();
        match trips {
            1 => Ok(()),
            n => Err(format!("Expected one trip log, found {}", n)),
        }
    });
}
