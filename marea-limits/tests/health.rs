use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use marea_limits::{CircuitState, HealthMonitor};
use marea_types::HealthConfig;

fn breaker(failures: u32, successes: u32, timeout: Duration) -> HealthConfig {
    HealthConfig {
        failure_threshold: failures,
        success_threshold: successes,
        open_timeout: timeout,
        ..HealthConfig::default()
    }
}

#[tokio::test]
async fn circuit_opens_on_the_third_failure_not_the_second() {
    let monitor = HealthMonitor::new();
    monitor.configure("prov", breaker(3, 2, Duration::from_secs(60)));

    monitor.record_failure("prov", Some("boom")).await;
    monitor.record_failure("prov", Some("boom")).await;
    assert_eq!(monitor.health("prov").circuit_state, CircuitState::Closed);
    assert!(monitor.can_request("prov"));

    monitor.record_failure("prov", Some("boom")).await;
    let report = monitor.health("prov");
    assert_eq!(report.circuit_state, CircuitState::Open);
    assert!(!report.is_available);
    assert!(!monitor.can_request("prov"));
}

#[tokio::test]
async fn success_resets_the_consecutive_failure_count() {
    let monitor = HealthMonitor::new();
    monitor.configure("prov", breaker(3, 2, Duration::from_secs(60)));

    monitor.record_failure("prov", Some("boom")).await;
    monitor.record_failure("prov", Some("boom")).await;
    monitor.record_success("prov", 50.0).await;
    monitor.record_failure("prov", Some("boom")).await;
    monitor.record_failure("prov", Some("boom")).await;
    // Still closed: the streak was broken by the success.
    assert_eq!(monitor.health("prov").circuit_state, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn open_circuit_probes_half_open_after_the_timeout() {
    let monitor = HealthMonitor::new();
    monitor.configure("prov", breaker(2, 2, Duration::from_secs(60)));

    monitor.record_failure("prov", Some("boom")).await;
    monitor.record_failure("prov", Some("boom")).await;
    assert!(!monitor.can_request("prov"));

    tokio::time::advance(Duration::from_secs(59)).await;
    assert!(!monitor.can_request("prov"));

    tokio::time::advance(Duration::from_secs(1)).await;
    // The transition is lazy: this call flips the state.
    assert!(monitor.can_request("prov"));
    assert_eq!(monitor.health("prov").circuit_state, CircuitState::HalfOpen);
}

#[tokio::test(start_paused = true)]
async fn half_open_closes_after_enough_successes() {
    let monitor = HealthMonitor::new();
    monitor.configure("prov", breaker(2, 3, Duration::from_secs(10)));

    monitor.record_failure("prov", Some("boom")).await;
    monitor.record_failure("prov", Some("boom")).await;
    tokio::time::advance(Duration::from_secs(10)).await;
    assert!(monitor.can_request("prov"));

    monitor.record_success("prov", 40.0).await;
    monitor.record_success("prov", 40.0).await;
    assert_eq!(monitor.health("prov").circuit_state, CircuitState::HalfOpen);
    monitor.record_success("prov", 40.0).await;

    let report = monitor.health("prov");
    assert_eq!(report.circuit_state, CircuitState::Closed);
    assert!(report.is_available);
}

#[tokio::test(start_paused = true)]
async fn one_half_open_failure_reopens() {
    let monitor = HealthMonitor::new();
    monitor.configure("prov", breaker(2, 3, Duration::from_secs(10)));

    monitor.record_failure("prov", Some("boom")).await;
    monitor.record_failure("prov", Some("boom")).await;
    tokio::time::advance(Duration::from_secs(10)).await;
    assert!(monitor.can_request("prov"));
    monitor.record_success("prov", 40.0).await;

    monitor.record_failure("prov", Some("boom")).await;
    assert_eq!(monitor.health("prov").circuit_state, CircuitState::Open);
    assert!(!monitor.can_request("prov"));
}

#[tokio::test]
async fn status_callback_fires_once_per_flag_transition() {
    let monitor = HealthMonitor::new();
    monitor.configure("prov", breaker(2, 1, Duration::from_secs(0)));

    let transitions = Arc::new(AtomicUsize::new(0));
    let seen = transitions.clone();
    monitor.register_status_callback(move |_, _, _| {
        let seen = seen.clone();
        Box::pin(async move {
            seen.fetch_add(1, Ordering::SeqCst);
        })
    });

    // The first failure pushes the error rate past critical: one notification.
    monitor.record_failure("prov", Some("boom")).await;
    assert_eq!(transitions.load(Ordering::SeqCst), 1);

    // Further failures and the circuit opening keep the flag down without
    // re-notifying.
    monitor.record_failure("prov", Some("boom")).await;
    monitor.record_failure("prov", Some("boom")).await;
    assert_eq!(transitions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn two_clean_health_checks_leave_state_unchanged() {
    let monitor = HealthMonitor::new();
    monitor.configure("prov", HealthConfig::default());

    monitor.record_success("prov", 25.0).await;
    let first = monitor.health("prov");
    monitor.record_success("prov", 25.0).await;
    let second = monitor.health("prov");

    assert_eq!(first.circuit_state, second.circuit_state);
    assert_eq!(first.is_healthy, second.is_healthy);
    assert_eq!(first.status_message, second.status_message);
}

#[tokio::test]
async fn critical_error_rate_clears_the_health_flag() {
    let monitor = HealthMonitor::new();
    // High failure threshold so the circuit stays closed; the error-rate
    // check alone must flip the flag.
    monitor.configure("prov", breaker(100, 3, Duration::from_secs(60)));

    for _ in 0..7 {
        monitor.record_success("prov", 30.0).await;
    }
    for _ in 0..3 {
        monitor.record_failure("prov", Some("boom")).await;
    }

    let report = monitor.health("prov");
    assert_eq!(report.circuit_state, CircuitState::Closed);
    assert!(!report.is_healthy);
    assert!(report.status_message.contains("error rate"));
    // Circuit closed, so requests are still admitted.
    assert!(monitor.can_request("prov"));
}

#[tokio::test]
async fn reset_returns_the_provider_to_a_clean_slate() {
    let monitor = HealthMonitor::new();
    monitor.configure("prov", breaker(1, 1, Duration::from_secs(600)));

    monitor.record_failure("prov", Some("boom")).await;
    assert!(!monitor.can_request("prov"));

    monitor.reset("prov");
    let report = monitor.health("prov");
    assert_eq!(report.circuit_state, CircuitState::Closed);
    assert!(report.is_healthy);
    assert_eq!(report.total_requests, 0);
    assert!(monitor.can_request("prov"));
}

#[tokio::test]
async fn healthy_provider_listing_tracks_the_flag() {
    let monitor = HealthMonitor::new();
    monitor.configure("good", breaker(1, 1, Duration::from_secs(600)));
    monitor.configure("bad", breaker(1, 1, Duration::from_secs(600)));

    monitor.record_success("good", 20.0).await;
    monitor.record_failure("bad", Some("boom")).await;

    let healthy = monitor.healthy_providers();
    assert!(healthy.contains(&"good".to_string()));
    assert!(!healthy.contains(&"bad".to_string()));
}
