use std::time::Duration;

use marea_limits::RateLimiter;
use marea_types::RateLimitConfig;
use tokio::time::Instant;

fn per_minute(limit: u32, burst: u32) -> RateLimitConfig {
    RateLimitConfig {
        requests_per_minute: Some(limit),
        burst_size: burst,
        ..RateLimitConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn burst_passes_then_pacing_kicks_in() {
    let limiter = RateLimiter::new();
    limiter.configure("prov", per_minute(5, 5));

    let start = Instant::now();
    for _ in 0..5 {
        limiter.acquire("prov").await;
    }
    // The burst of five is admitted without waiting.
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert!(!limiter.can_proceed("prov"));

    // The sixth call must wait at least one refill interval (12s at 5/min).
    let before_sixth = Instant::now();
    limiter.acquire("prov").await;
    assert!(before_sixth.elapsed() >= Duration::from_secs(12));

    // Calls seven through ten are admitted without violating the window.
    for _ in 0..4 {
        limiter.acquire("prov").await;
    }
    assert!(start.elapsed() >= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn window_boundary_frees_up_after_one_minute() {
    let limiter = RateLimiter::new();
    limiter.configure("prov", per_minute(3, 10));

    for _ in 0..3 {
        limiter.acquire("prov").await;
    }
    assert!(!limiter.can_proceed("prov"));
    assert!(limiter.wait_time("prov") > Duration::ZERO);

    tokio::time::advance(Duration::from_secs(60)).await;
    assert!(limiter.can_proceed("prov"));
    let before = Instant::now();
    limiter.acquire("prov").await;
    assert_eq!(before.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn zero_burst_paces_every_call() {
    let limiter = RateLimiter::new();
    limiter.configure("prov", per_minute(5, 0));

    // With no burst capacity every call pays the refill interval.
    let start = Instant::now();
    limiter.acquire("prov").await;
    assert!(start.elapsed() >= Duration::from_secs(12));
}

#[tokio::test]
async fn unconfigured_provider_is_unlimited() {
    let limiter = RateLimiter::new();
    assert!(limiter.can_proceed("anything"));
    limiter.acquire("anything").await;
    assert!(limiter.remaining("anything").is_empty());
    assert!(!limiter.stats("anything").configured);
}

#[tokio::test(start_paused = true)]
async fn zero_limit_disables_that_window() {
    let limiter = RateLimiter::new();
    limiter.configure(
        "prov",
        RateLimitConfig {
            requests_per_minute: Some(0),
            requests_per_hour: Some(2),
            burst_size: 10,
            ..RateLimitConfig::default()
        },
    );

    // The minute window is disabled; only the hourly cap applies.
    limiter.acquire("prov").await;
    limiter.acquire("prov").await;
    let remaining = limiter.remaining("prov");
    assert!(!remaining.contains_key("per_minute"));
    assert_eq!(remaining.get("per_hour"), Some(&0));
    assert!(!limiter.can_proceed("prov"));
}

#[tokio::test(start_paused = true)]
async fn daily_reset_clears_the_day_window() {
    let limiter = RateLimiter::new();
    limiter.configure(
        "prov",
        RateLimitConfig {
            requests_per_day: Some(2),
            burst_size: 10,
            ..RateLimitConfig::default()
        },
    );

    limiter.acquire("prov").await;
    limiter.acquire("prov").await;
    assert!(!limiter.can_proceed("prov"));

    limiter.reset_daily("prov");
    assert!(limiter.can_proceed("prov"));
}

#[tokio::test(start_paused = true)]
async fn stats_reflect_window_positions() {
    let limiter = RateLimiter::new();
    limiter.configure(
        "prov",
        RateLimitConfig {
            requests_per_minute: Some(10),
            requests_per_day: Some(100),
            burst_size: 10,
            ..RateLimitConfig::default()
        },
    );

    limiter.acquire("prov").await;
    let stats = limiter.stats("prov");
    assert!(stats.configured);
    assert_eq!(stats.remaining_per_minute, Some(9));
    assert_eq!(stats.remaining_per_hour, None);
    assert_eq!(stats.remaining_per_day, Some(99));
    assert!(stats.can_proceed);
}
