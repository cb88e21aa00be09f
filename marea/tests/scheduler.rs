use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::NaiveTime;
use marea::scheduler::{Scheduler, SchedulerConfig};
use marea::{StartupOrchestrator, TaskPriority};
use marea_core::calendar::{MarketClock, MarketHours, TradingCalendar};
use marea_types::{MareaError, MarketKind};

fn counter_job(counter: Arc<AtomicUsize>) -> impl Fn() -> futures::future::BoxFuture<'static, ()> {
    move || {
        let counter = counter.clone();
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }
}

/// A clock where no session-bound market can ever be open.
fn closed_world_clock() -> MarketClock {
    let mut clock = MarketClock::default();
    for market in [
        MarketKind::UsStock,
        MarketKind::EuStock,
        MarketKind::AsiaStock,
        MarketKind::Etf,
        MarketKind::Index,
        MarketKind::UsOption,
        MarketKind::Commodity,
    ] {
        // Zero-length session: `open <= t < close` never holds.
        clock.set_hours(
            market,
            MarketHours {
                open: NaiveTime::MIN,
                close: NaiveTime::MIN,
                tz: chrono_tz::UTC,
                calendar: TradingCalendar::weekends_closed(),
                always_open: false,
            },
        );
    }
    clock
}

#[tokio::test(start_paused = true)]
async fn interval_job_fires_on_every_period() {
    let scheduler = Scheduler::with_defaults();
    let count = Arc::new(AtomicUsize::new(0));
    scheduler.add_interval_job("tick", Duration::from_secs(30), counter_job(count.clone()));
    scheduler.start();

    // 95 virtual seconds cover the fires at t=30, 60, and 90 exactly; a
    // drifting trigger clock would miss the later ones.
    tokio::time::sleep(Duration::from_secs(95)).await;
    scheduler.shutdown().await;

    assert_eq!(count.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn second_instance_of_a_running_job_is_dropped() {
    let scheduler = Scheduler::with_defaults();
    let starts = Arc::new(AtomicUsize::new(0));
    let starts_probe = starts.clone();
    scheduler.add_interval_job("slow", Duration::from_secs(1), move || {
        let starts = starts_probe.clone();
        Box::pin(async move {
            starts.fetch_add(1, Ordering::SeqCst);
            // Far longer than the firing interval.
            tokio::time::sleep(Duration::from_secs(60)).await;
        })
    });
    scheduler.start();

    tokio::time::sleep(Duration::from_secs(5)).await;
    // Several fire instants passed, but only one instance ever started.
    assert_eq!(starts.load(Ordering::SeqCst), 1);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn readding_an_unchanged_trigger_keeps_the_next_fire_instant() {
    let scheduler = Scheduler::with_defaults();
    let noop = || -> futures::future::BoxFuture<'static, ()> { Box::pin(async {}) };

    scheduler.add_cron_job("eod", 23, 0, &[], Some(chrono_tz::UTC), noop);
    let first = scheduler.jobs_status()[0].next_fire.clone().expect("scheduled");

    assert!(scheduler.remove_job("eod"));
    assert!(scheduler.jobs_status().is_empty());

    scheduler.add_cron_job("eod", 23, 0, &[], Some(chrono_tz::UTC), noop);
    let second = scheduler.jobs_status()[0].next_fire.clone().expect("scheduled");

    assert_eq!(first, second);
}

#[tokio::test]
async fn removing_a_missing_job_reports_false() {
    let scheduler = Scheduler::with_defaults();
    assert!(!scheduler.remove_job("ghost"));
}

#[tokio::test(start_paused = true)]
async fn market_hours_gate_skips_closed_sessions() {
    let open_count = Arc::new(AtomicUsize::new(0));
    let closed_count = Arc::new(AtomicUsize::new(0));

    let scheduler = Scheduler::new(
        SchedulerConfig::default(),
        Arc::new(closed_world_clock()),
    );
    // Crypto is always open; the rigged US session never is.
    scheduler.add_market_hours_job(
        "crypto_tick",
        Duration::from_secs(10),
        MarketKind::Crypto,
        counter_job(open_count.clone()),
    );
    scheduler.add_market_hours_job(
        "us_tick",
        Duration::from_secs(10),
        MarketKind::UsStock,
        counter_job(closed_count.clone()),
    );
    scheduler.start();

    tokio::time::sleep(Duration::from_secs(35)).await;
    scheduler.shutdown().await;

    assert!(open_count.load(Ordering::SeqCst) >= 2);
    assert_eq!(closed_count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn default_schedules_cover_the_recognized_job_ids() {
    let scheduler = Scheduler::with_defaults();
    let noop = || -> futures::future::BoxFuture<'static, ()> { Box::pin(async {}) };

    for id in [
        "global_price_update",
        "position_monitor",
        "pre_market_analysis",
        "daily_summary",
        "weekly_report",
        "signal_cleanup",
        "fx_rate_update",
        "universe_quote_update",
        "universe_eod_collection",
        "symbol_enrichment",
    ] {
        scheduler
            .register_default_schedule(id, noop)
            .expect("recognized id");
    }
    assert_eq!(scheduler.jobs_status().len(), 10);

    let err = scheduler
        .register_default_schedule("mystery_job", noop)
        .expect_err("unknown id is rejected");
    assert!(matches!(err, MareaError::InvalidArg(_)));
}

#[tokio::test(start_paused = true)]
async fn startup_tasks_run_in_priority_then_registration_order() {
    let orchestrator = StartupOrchestrator::new(Arc::new(MarketClock::default()));
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));

    let push = |label: &'static str| {
        let order = order.clone();
        move || -> futures::future::BoxFuture<'static, Result<(), MareaError>> {
            let order = order.clone();
            Box::pin(async move {
                order.lock().expect("order lock").push(label);
                Ok(())
            })
        }
    };

    // Registered out of priority order; "warmup" and "enrich" share NORMAL.
    orchestrator.register_task(
        "warmup",
        TaskPriority::Normal,
        false,
        Duration::from_secs(5),
        Duration::ZERO,
        push("warmup"),
    );
    orchestrator.register_task(
        "fx",
        TaskPriority::Critical,
        false,
        Duration::from_secs(5),
        Duration::ZERO,
        push("fx"),
    );
    orchestrator.register_task(
        "enrich",
        TaskPriority::Normal,
        false,
        Duration::from_secs(5),
        Duration::ZERO,
        push("enrich"),
    );
    orchestrator.register_task(
        "eod",
        TaskPriority::High,
        false,
        Duration::from_secs(5),
        Duration::ZERO,
        push("eod"),
    );

    let report = orchestrator
        .run_startup_sequence()
        .await
        .expect("sequence runs");
    assert_eq!(report.tasks.len(), 4);
    assert_eq!(
        *order.lock().expect("order lock"),
        vec!["fx", "eod", "warmup", "enrich"]
    );
}

#[tokio::test(start_paused = true)]
async fn startup_failures_and_timeouts_do_not_stop_the_sequence() {
    let orchestrator = StartupOrchestrator::new(Arc::new(MarketClock::default()));
    let ran_last = Arc::new(AtomicUsize::new(0));

    orchestrator.register_task(
        "fails",
        TaskPriority::Critical,
        false,
        Duration::from_secs(5),
        Duration::ZERO,
        || Box::pin(async { Err(MareaError::provider("x", "boom")) }),
    );
    orchestrator.register_task(
        "hangs",
        TaskPriority::High,
        false,
        Duration::from_secs(1),
        Duration::ZERO,
        || {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
        },
    );
    let probe = ran_last.clone();
    orchestrator.register_task(
        "still_runs",
        TaskPriority::Normal,
        false,
        Duration::from_secs(5),
        Duration::ZERO,
        move || {
            let probe = probe.clone();
            Box::pin(async move {
                probe.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        },
    );

    let report = orchestrator
        .run_startup_sequence()
        .await
        .expect("sequence completes");
    assert_eq!(ran_last.load(Ordering::SeqCst), 1);

    use marea::scheduler::startup::TaskOutcome;
    let outcomes: Vec<&TaskOutcome> = report.tasks.iter().map(|t| &t.outcome).collect();
    assert!(matches!(outcomes[0], TaskOutcome::Failed { .. }));
    assert!(matches!(outcomes[1], TaskOutcome::TimedOut { .. }));
    assert!(matches!(outcomes[2], TaskOutcome::Success { .. }));
}

#[tokio::test]
async fn startup_sequence_rejects_reentry() {
    let orchestrator = Arc::new(StartupOrchestrator::new(Arc::new(MarketClock::default())));
    let gate = Arc::new(tokio::sync::Notify::new());

    let hold = gate.clone();
    orchestrator.register_task(
        "holds",
        TaskPriority::Critical,
        false,
        Duration::from_secs(60),
        Duration::ZERO,
        move || {
            let hold = hold.clone();
            Box::pin(async move {
                hold.notified().await;
                Ok(())
            })
        },
    );

    let runner = orchestrator.clone();
    let first = tokio::spawn(async move { runner.run_startup_sequence().await });
    // Let the first sequence claim the guard.
    tokio::task::yield_now().await;
    while !orchestrator.is_running() {
        tokio::task::yield_now().await;
    }

    let err = orchestrator
        .run_startup_sequence()
        .await
        .expect_err("second concurrent invocation is rejected");
    assert!(matches!(err, MareaError::AlreadyRunning { .. }));

    gate.notify_one();
    first.await.expect("join").expect("first sequence completes");
}

#[tokio::test(start_paused = true)]
async fn startup_skip_check_honors_market_state() {
    let orchestrator = StartupOrchestrator::new(Arc::new(closed_world_clock()));
    let ran = Arc::new(AtomicUsize::new(0));
    let probe = ran.clone();
    orchestrator.register_task(
        "session_only",
        TaskPriority::Normal,
        true,
        Duration::from_secs(5),
        Duration::ZERO,
        move || {
            let probe = probe.clone();
            Box::pin(async move {
                probe.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        },
    );

    let report = orchestrator
        .run_startup_sequence()
        .await
        .expect("sequence runs");
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    use marea::scheduler::startup::TaskOutcome;
    assert!(matches!(
        report.tasks[0].outcome,
        TaskOutcome::Skipped { .. }
    ));
}
