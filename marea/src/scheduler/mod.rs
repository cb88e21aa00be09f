//! Single-process job scheduler pinned to one named timezone.
//!
//! Jobs are injected async callables; the scheduler knows nothing about the
//! collectors it drives. Each job runs on its own tokio task that sleeps
//! until the next fire instant computed from its trigger. Per-job defaults
//! follow the platform conventions: missed fires are coalesced into at most
//! one run, a second concurrent instance of the same job id is dropped with
//! a log entry, and fires older than the misfire grace are skipped.

pub mod startup;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc, Weekday};
use chrono_tz::Tz;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use marea_core::calendar::MarketClock;
use marea_types::{MareaError, MarketKind};

/// Async job callable registered with the scheduler.
pub type JobFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// What causes a job to fire.
#[derive(Debug, Clone)]
pub enum JobTrigger {
    /// Fixed period between fires.
    Interval(Duration),
    /// Daily at `hour:minute` in `tz` (or the scheduler timezone when
    /// `None`), restricted to the given weekdays.
    Cron {
        /// Hour of day, 0-23.
        hour: u32,
        /// Minute of hour, 0-59.
        minute: u32,
        /// Weekdays on which the job fires; empty means every day.
        weekdays: Vec<Weekday>,
        /// Timezone override; `None` uses the scheduler timezone.
        tz: Option<Tz>,
    },
}

const WEEKDAYS_MON_FRI: [Weekday; 5] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
];

/// Scheduler-wide configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Home timezone for cron triggers (default America/New_York).
    pub tz: Tz,
    /// Merge multiple missed fires into at most one run.
    pub coalesce: bool,
    /// Fires older than this are skipped.
    pub misfire_grace: Duration,
    /// How long shutdown waits for in-flight jobs to drain.
    pub drain: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tz: chrono_tz::America::New_York,
            coalesce: true,
            misfire_grace: Duration::from_secs(300),
            drain: Duration::from_secs(5),
        }
    }
}

/// One pending fire instant, tracked on both clocks: the monotonic tokio
/// instant drives the trigger loop (and honors `tokio::time::pause` in
/// tests), the wall-clock twin exists for cron recomputation and status
/// rendering only.
#[derive(Debug, Clone, Copy)]
struct NextFire {
    wall: DateTime<Utc>,
    at: Instant,
}

impl NextFire {
    /// Pair a wall-clock fire instant with its monotonic deadline.
    fn from_wall(wall: DateTime<Utc>, now_wall: DateTime<Utc>) -> Self {
        Self {
            wall,
            at: Instant::now() + (wall - now_wall).to_std().unwrap_or_default(),
        }
    }
}

struct JobState {
    id: String,
    kind: &'static str,
    schedule: String,
    trigger: JobTrigger,
    func: JobFn,
    coalesce: bool,
    misfire_grace: Duration,
    tz: Tz,
    running: AtomicBool,
    next_fire: Mutex<Option<NextFire>>,
}

struct Job {
    state: Arc<JobState>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

/// Status of one registered job.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    /// Job id.
    pub id: String,
    /// Trigger kind label (interval, cron, pre_market, ...).
    pub kind: String,
    /// Human-readable schedule description.
    pub schedule: String,
    /// Next fire instant rendered in the scheduler timezone.
    pub next_fire: Option<String>,
    /// Whether an instance is currently executing.
    pub running: bool,
}

/// Single-process job scheduler.
pub struct Scheduler {
    cfg: SchedulerConfig,
    clock: Arc<MarketClock>,
    jobs: Mutex<HashMap<String, Job>>,
    started: AtomicBool,
}

impl Scheduler {
    /// Create a scheduler with the given configuration and market clock.
    #[must_use]
    pub fn new(cfg: SchedulerConfig, clock: Arc<MarketClock>) -> Self {
        Self {
            cfg,
            clock,
            jobs: Mutex::new(HashMap::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Scheduler with defaults: America/New_York, coalescing, 300 s grace.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(SchedulerConfig::default(), Arc::new(MarketClock::default()))
    }

    /// Whether `start` has been called.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn add_job(&self, id: &str, kind: &'static str, schedule: String, trigger: JobTrigger, func: JobFn) {
        let now_wall = Utc::now();
        let first_wall = next_fire_after(&trigger, now_wall, self.cfg.tz);
        let state = Arc::new(JobState {
            id: id.to_string(),
            kind,
            schedule: schedule.clone(),
            next_fire: Mutex::new(Some(NextFire::from_wall(first_wall, now_wall))),
            trigger,
            func,
            coalesce: self.cfg.coalesce,
            misfire_grace: self.cfg.misfire_grace,
            tz: self.cfg.tz,
            running: AtomicBool::new(false),
        });

        let handle = self
            .is_running()
            .then(|| tokio::spawn(run_job_loop(state.clone())));

        let mut jobs = self.jobs.lock().expect("scheduler job table lock poisoned");
        if let Some(previous) = jobs.insert(id.to_string(), Job { state, handle }) {
            // replace_existing semantics: the old loop dies with its handle.
            if let Some(h) = previous.handle {
                h.abort();
            }
        }
        info!(job_id = id, kind, schedule = %schedule, "registered job");
    }

    /// Register a fixed-interval job.
    pub fn add_interval_job<F>(&self, id: &str, period: Duration, func: F)
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let schedule = format!("every {}s", period.as_secs());
        self.add_job(id, "interval", schedule, JobTrigger::Interval(period), Arc::new(func));
    }

    /// Register a daily cron job at `hour:minute` in the scheduler timezone
    /// (or an explicit `tz`), on the given weekdays (empty = every day).
    pub fn add_cron_job<F>(
        &self,
        id: &str,
        hour: u32,
        minute: u32,
        weekdays: &[Weekday],
        tz: Option<Tz>,
        func: F,
    ) where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let zone = tz.unwrap_or(self.cfg.tz);
        let schedule = format!("{hour:02}:{minute:02} {zone}");
        self.add_job(
            id,
            "cron",
            schedule,
            JobTrigger::Cron {
                hour,
                minute,
                weekdays: weekdays.to_vec(),
                tz,
            },
            Arc::new(func),
        );
    }

    /// Register a pre-market job (default 06:00 scheduler-local, Mon-Fri).
    pub fn add_pre_market_job<F>(&self, id: &str, hour: u32, minute: u32, func: F)
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let schedule = format!("{hour:02}:{minute:02} {} Mon-Fri", self.cfg.tz);
        self.add_job(
            id,
            "pre_market",
            schedule,
            JobTrigger::Cron {
                hour,
                minute,
                weekdays: WEEKDAYS_MON_FRI.to_vec(),
                tz: None,
            },
            Arc::new(func),
        );
    }

    /// Register a post-market job (default 16:30 scheduler-local, Mon-Fri).
    pub fn add_post_market_job<F>(&self, id: &str, hour: u32, minute: u32, func: F)
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let schedule = format!("{hour:02}:{minute:02} {} Mon-Fri", self.cfg.tz);
        self.add_job(
            id,
            "post_market",
            schedule,
            JobTrigger::Cron {
                hour,
                minute,
                weekdays: WEEKDAYS_MON_FRI.to_vec(),
                tz: None,
            },
            Arc::new(func),
        );
    }

    /// Register a weekly job on one weekday at `hour:minute` scheduler-local.
    pub fn add_weekly_job<F>(&self, id: &str, weekday: Weekday, hour: u32, minute: u32, func: F)
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let schedule = format!("{weekday} {hour:02}:{minute:02} {}", self.cfg.tz);
        self.add_job(
            id,
            "weekly",
            schedule,
            JobTrigger::Cron {
                hour,
                minute,
                weekdays: vec![weekday],
                tz: None,
            },
            Arc::new(func),
        );
    }

    /// Register an interval job that only executes while the given market's
    /// session is open; closed-market fires are skipped with a debug log.
    pub fn add_market_hours_job<F>(&self, id: &str, period: Duration, market: MarketKind, func: F)
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let clock = self.clock.clone();
        let inner: JobFn = Arc::new(func);
        let job_id = id.to_string();
        let gated = move || -> BoxFuture<'static, ()> {
            let clock = clock.clone();
            let inner = inner.clone();
            let job_id = job_id.clone();
            Box::pin(async move {
                if clock.is_open(market, Utc::now()) {
                    inner().await;
                } else {
                    debug!(job_id = %job_id, %market, "skipping job - market closed");
                }
            })
        };
        let schedule = format!("every {}s while {market} open", period.as_secs());
        self.add_job(id, "market_hours", schedule, JobTrigger::Interval(period), Arc::new(gated));
    }

    /// Register one of the platform's recognized job ids with its default
    /// schedule.
    ///
    /// # Errors
    /// `InvalidArg` for an unrecognized id.
    pub fn register_default_schedule<F>(&self, id: &str, func: F) -> Result<(), MareaError>
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        const FIVE_MIN: Duration = Duration::from_secs(5 * 60);
        const HOURLY: Duration = Duration::from_secs(3600);
        match id {
            "global_price_update" | "position_monitor" | "universe_quote_update" => {
                self.add_interval_job(id, FIVE_MIN, func);
            }
            "signal_cleanup" | "fx_rate_update" => {
                self.add_interval_job(id, HOURLY, func);
            }
            "pre_market_analysis" => self.add_pre_market_job(id, 6, 0, func),
            "daily_summary" => self.add_post_market_job(id, 16, 30, func),
            "weekly_report" => self.add_weekly_job(id, Weekday::Fri, 18, 0, func),
            "universe_eod_collection" => {
                self.add_cron_job(id, 23, 0, &[], Some(chrono_tz::UTC), func);
            }
            "symbol_enrichment" => {
                self.add_cron_job(id, 1, 0, &[], Some(chrono_tz::UTC), func);
            }
            other => {
                return Err(MareaError::InvalidArg(format!(
                    "unrecognized job id: {other}"
                )));
            }
        }
        Ok(())
    }

    /// Deregister a job, stopping its trigger loop.
    pub fn remove_job(&self, id: &str) -> bool {
        let mut jobs = self.jobs.lock().expect("scheduler job table lock poisoned");
        match jobs.remove(id) {
            Some(job) => {
                if let Some(handle) = job.handle {
                    handle.abort();
                }
                info!(job_id = id, "removed job");
                true
            }
            None => {
                warn!(job_id = id, "remove_job: no such job");
                false
            }
        }
    }

    /// Start firing triggers. Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut jobs = self.jobs.lock().expect("scheduler job table lock poisoned");
        for job in jobs.values_mut() {
            if job.handle.is_none() {
                job.handle = Some(tokio::spawn(run_job_loop(job.state.clone())));
            }
        }
        info!(jobs = jobs.len(), tz = %self.cfg.tz, "scheduler started");
    }

    /// Stop firing triggers and wait at most one drain interval for
    /// in-flight job instances to finish.
    pub async fn shutdown(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        let states: Vec<Arc<JobState>> = {
            let mut jobs = self.jobs.lock().expect("scheduler job table lock poisoned");
            for job in jobs.values_mut() {
                if let Some(handle) = job.handle.take() {
                    handle.abort();
                }
            }
            jobs.values().map(|j| j.state.clone()).collect()
        };

        let drain_deadline = tokio::time::Instant::now() + self.cfg.drain;
        while states.iter().any(|s| s.running.load(Ordering::SeqCst)) {
            if tokio::time::Instant::now() >= drain_deadline {
                warn!("scheduler drain interval elapsed with jobs still running");
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        info!("scheduler stopped");
    }

    /// Snapshot of every registered job, next fire rendered in the
    /// scheduler timezone.
    #[must_use]
    pub fn jobs_status(&self) -> Vec<JobStatus> {
        let jobs = self.jobs.lock().expect("scheduler job table lock poisoned");
        let mut out: Vec<JobStatus> = jobs
            .values()
            .map(|job| {
                let next = job
                    .state
                    .next_fire
                    .lock()
                    .expect("job next-fire lock poisoned")
                    .map(|fire| fire.wall.with_timezone(&self.cfg.tz).to_rfc3339());
                JobStatus {
                    id: job.state.id.clone(),
                    kind: job.state.kind.to_string(),
                    schedule: job.state.schedule.clone(),
                    next_fire: next,
                    running: job.state.running.load(Ordering::SeqCst),
                }
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}

async fn run_job_loop(state: Arc<JobState>) {
    loop {
        let fire = {
            let next = state
                .next_fire
                .lock()
                .expect("job next-fire lock poisoned");
            match *next {
                Some(fire) => fire,
                None => return,
            }
        };

        tokio::time::sleep_until(fire.at).await;

        let late = Instant::now().saturating_duration_since(fire.at);
        if late > state.misfire_grace && state.coalesce {
            warn!(job_id = %state.id, late_s = late.as_secs(), "misfired beyond grace, skipping run");
        } else if state.running.swap(true, Ordering::SeqCst) {
            warn!(job_id = %state.id, "previous instance still running, dropping start");
        } else {
            debug!(job_id = %state.id, "firing job");
            let func = state.func.clone();
            let running = state.clone();
            tokio::spawn(async move {
                func().await;
                running.running.store(false, Ordering::SeqCst);
            });
        }

        let next = advance_next_fire(&state.trigger, fire, state.tz);
        *state
            .next_fire
            .lock()
            .expect("job next-fire lock poisoned") = Some(next);
    }
}

/// Next fire after the one that just elapsed.
///
/// Interval triggers advance on the monotonic clock alone, so a paused test
/// clock keeps the period exact; cron triggers recompute on the wall clock
/// and convert the remaining delta back to a monotonic deadline.
fn advance_next_fire(trigger: &JobTrigger, previous: NextFire, scheduler_tz: Tz) -> NextFire {
    match trigger {
        JobTrigger::Interval(period) => NextFire {
            wall: Utc::now().max(previous.wall)
                + chrono::Duration::from_std(*period).unwrap_or(chrono::Duration::seconds(60)),
            at: Instant::now().max(previous.at) + *period,
        },
        JobTrigger::Cron { .. } => {
            let now_wall = Utc::now();
            let wall = next_fire_after(trigger, now_wall.max(previous.wall), scheduler_tz);
            NextFire::from_wall(wall, now_wall)
        }
    }
}

/// Next fire instant strictly after `after` for a trigger.
fn next_fire_after(trigger: &JobTrigger, after: DateTime<Utc>, scheduler_tz: Tz) -> DateTime<Utc> {
    match trigger {
        JobTrigger::Interval(period) => {
            after + chrono::Duration::from_std(*period).unwrap_or(chrono::Duration::seconds(60))
        }
        JobTrigger::Cron {
            hour,
            minute,
            weekdays,
            tz,
        } => {
            use chrono::{Datelike, TimeZone};
            let zone = tz.unwrap_or(scheduler_tz);
            let local_after = after.with_timezone(&zone);
            let time = chrono::NaiveTime::from_hms_opt(*hour, *minute, 0)
                .unwrap_or(chrono::NaiveTime::MIN);
            let mut date = local_after.date_naive();
            loop {
                let allowed = weekdays.is_empty() || weekdays.contains(&date.weekday());
                if allowed {
                    // Ambiguous local instants take the earlier offset; an
                    // instant swallowed by a DST gap rolls to the next day.
                    if let Some(candidate) = zone
                        .from_local_datetime(&date.and_time(time))
                        .earliest()
                        .map(|dt| dt.with_timezone(&Utc))
                    {
                        if candidate > after {
                            return candidate;
                        }
                    }
                }
                date = match date.succ_opt() {
                    Some(next) => next,
                    None => return after + chrono::Duration::days(1),
                };
            }
        }
    }
}
