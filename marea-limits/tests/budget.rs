use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use marea_limits::{BudgetAlert, BudgetTracker};
use marea_types::{BudgetConfig, BudgetScope, MareaError};
use rust_decimal::Decimal;

fn dollars(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

fn daily_capped(cap_cents: i64, cost_cents: i64) -> BudgetConfig {
    BudgetConfig {
        daily_limit: dollars(cap_cents),
        cost_per_request: dollars(cost_cents),
        ..BudgetConfig::default()
    }
}

#[tokio::test]
async fn fourth_call_crosses_a_one_dollar_daily_cap() {
    let tracker = BudgetTracker::new();
    tracker.configure("prov", daily_capped(100, 30));

    for _ in 0..3 {
        tracker
            .check_and_record("prov", None, 1, None)
            .await
            .expect("within budget");
    }

    let err = tracker
        .check_and_record("prov", None, 1, None)
        .await
        .expect_err("fourth call must exceed the cap");
    match err {
        MareaError::BudgetExceeded {
            provider,
            scope,
            limit,
            spent,
        } => {
            assert_eq!(provider, "prov");
            assert_eq!(scope, BudgetScope::Daily);
            assert_eq!(limit, dollars(100));
            assert_eq!(spent, dollars(90));
        }
        other => panic!("expected BudgetExceeded, got {other:?}"),
    }

    // The rejected call must not have been recorded.
    let usage = tracker.usage("prov").expect("usage exists");
    assert_eq!(usage.daily_spent, dollars(90));
    assert_eq!(usage.request_count, 3);
}

#[tokio::test]
async fn can_afford_never_mutates_state() {
    let tracker = BudgetTracker::new();
    tracker.configure("prov", daily_capped(100, 60));

    assert!(tracker.can_afford("prov", None, 1, None));
    assert!(tracker.can_afford("prov", None, 1, None));
    let usage = tracker.usage("prov").expect("usage exists");
    assert_eq!(usage.daily_spent, Decimal::ZERO);
    assert_eq!(usage.request_count, 0);

    tracker
        .check_and_record("prov", None, 1, None)
        .await
        .expect("first call fits");
    // 0.60 spent; another 0.60 would cross the cap.
    assert!(!tracker.can_afford("prov", None, 1, None));
}

#[tokio::test]
async fn endpoint_override_and_symbol_cost_price_the_request() {
    let tracker = BudgetTracker::new();
    let mut config = daily_capped(0, 10);
    config.cost_per_symbol = dollars(2);
    config
        .endpoint_costs
        .insert("historical".to_string(), dollars(50));
    tracker.configure("prov", config);

    tracker
        .check_and_record("prov", Some("historical"), 5, None)
        .await
        .expect("no cap set");
    let usage = tracker.usage("prov").expect("usage exists");
    // 0.50 endpoint cost + 5 symbols * 0.02.
    assert_eq!(usage.daily_spent, dollars(60));
    assert_eq!(usage.endpoint_usage.get("historical"), Some(&dollars(60)));

    // An explicit cost bypasses the configured pricing entirely.
    tracker
        .check_and_record("prov", None, 1, Some(dollars(25)))
        .await
        .expect("no cap set");
    assert_eq!(
        tracker.usage("prov").expect("usage exists").daily_spent,
        dollars(85)
    );
}

#[tokio::test]
async fn warning_callback_fires_past_the_threshold() {
    let tracker = BudgetTracker::new();
    tracker.configure("prov", daily_capped(100, 40));

    let alerts = Arc::new(AtomicUsize::new(0));
    let seen = alerts.clone();
    tracker.register_alert_callback(move |provider, alert, pct| {
        let seen = seen.clone();
        Box::pin(async move {
            assert_eq!(provider, "prov");
            assert_eq!(alert, BudgetAlert::DailyWarning);
            assert!(pct >= 0.8);
            seen.fetch_add(1, Ordering::SeqCst);
        })
    });

    tracker
        .check_and_record("prov", None, 1, None)
        .await
        .expect("0.40 fits");
    assert_eq!(alerts.load(Ordering::SeqCst), 0);

    tracker
        .check_and_record("prov", None, 1, None)
        .await
        .expect("0.80 fits");
    assert_eq!(alerts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn callback_panic_does_not_fail_the_acquire() {
    let tracker = BudgetTracker::new();
    tracker.configure("prov", daily_capped(100, 90));
    tracker.register_alert_callback(|_, _, _| Box::pin(async { panic!("listener bug") }));

    tracker
        .check_and_record("prov", None, 1, None)
        .await
        .expect("alert failure must not surface");
}

#[tokio::test]
async fn admin_resets_roll_the_windows() {
    let tracker = BudgetTracker::new();
    let mut config = daily_capped(100, 60);
    config.monthly_limit = dollars(500);
    tracker.configure("prov", config);

    tracker
        .check_and_record("prov", None, 1, None)
        .await
        .expect("fits");
    assert!(!tracker.can_afford("prov", None, 1, None));

    tracker.reset_daily("prov");
    let usage = tracker.usage("prov").expect("usage exists");
    assert_eq!(usage.daily_spent, Decimal::ZERO);
    // Monthly spend survives a daily reset.
    assert_eq!(usage.monthly_spent, dollars(60));

    tracker.reset_monthly("prov");
    let usage = tracker.usage("prov").expect("usage exists");
    assert_eq!(usage.monthly_spent, Decimal::ZERO);
}

#[tokio::test]
async fn monthly_cap_is_enforced_independently() {
    let tracker = BudgetTracker::new();
    let config = BudgetConfig {
        monthly_limit: dollars(100),
        cost_per_request: dollars(60),
        ..BudgetConfig::default()
    };
    tracker.configure("prov", config);

    tracker
        .check_and_record("prov", None, 1, None)
        .await
        .expect("fits");
    let err = tracker
        .check_and_record("prov", None, 1, None)
        .await
        .expect_err("second call crosses the monthly cap");
    assert!(matches!(
        err,
        MareaError::BudgetExceeded {
            scope: BudgetScope::Monthly,
            ..
        }
    ));
}

#[tokio::test]
async fn unconfigured_provider_is_unlimited() {
    let tracker = BudgetTracker::new();
    tracker
        .check_and_record("anything", None, 1, None)
        .await
        .expect("no budget configured");
    assert!(tracker.can_afford("anything", None, 1, None));
    assert!(!tracker.stats("anything").configured);
}
