//! One-shot, priority-ordered bootstrap sequencer.
//!
//! Startup tasks run strictly sequentially so a cold boot cannot stampede
//! the providers: each task gets a timeout, failures are recorded without
//! aborting the sequence, and a staggered delay separates consecutive
//! tasks. Re-entry while a sequence is in flight is rejected.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use tracing::{debug, error, info};

use marea_core::calendar::MarketClock;
use marea_types::MareaError;

/// Execution priority for startup tasks. Lower runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum TaskPriority {
    /// Must run immediately (e.g. FX rates for portfolio valuation).
    Critical = 1,
    /// Should run soon (e.g. EOD backfill when stale).
    High = 2,
    /// Can wait (e.g. universe warm-up).
    Normal = 3,
    /// Run only if nothing else is pending.
    Low = 4,
}

type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), MareaError>> + Send + Sync>;

struct StartupTask {
    name: String,
    func: TaskFn,
    priority: TaskPriority,
    skip_if_markets_closed: bool,
    timeout: Duration,
    delay_after: Duration,
}

/// Outcome of one startup task.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum TaskOutcome {
    /// Completed within its timeout.
    Success {
        /// Wall-clock duration of the task.
        duration_s: f64,
    },
    /// Returned an error; the sequence continued.
    Failed {
        /// The rendered error.
        error: String,
    },
    /// Exceeded its timeout; the sequence continued.
    TimedOut {
        /// The configured timeout.
        timeout_s: u64,
    },
    /// Skipped before execution.
    Skipped {
        /// Why the task was skipped.
        reason: String,
    },
}

/// Result of one task in the startup report.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    /// Task name.
    pub name: String,
    /// Priority it ran at.
    pub priority: TaskPriority,
    /// What happened.
    pub outcome: TaskOutcome,
}

/// Summary of a full startup sequence.
#[derive(Debug, Clone, Serialize)]
pub struct StartupReport {
    /// When the sequence began.
    pub started_at: DateTime<Utc>,
    /// When the sequence finished.
    pub completed_at: DateTime<Utc>,
    /// Per-task results in execution order.
    pub tasks: Vec<TaskResult>,
}

/// Sequencer for bootstrap tasks, run before steady-state scheduling.
pub struct StartupOrchestrator {
    clock: Arc<MarketClock>,
    tasks: Mutex<Vec<StartupTask>>,
    running: AtomicBool,
}

impl StartupOrchestrator {
    /// Orchestrator using the given market clock for skip checks.
    #[must_use]
    pub fn new(clock: Arc<MarketClock>) -> Self {
        Self {
            clock,
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Register a task with explicit settings.
    ///
    /// Tasks execute in (priority, registration order). `skip_if_markets_closed`
    /// skips the task when no session-bound market is open at run time.
    pub fn register_task<F>(
        &self,
        name: &str,
        priority: TaskPriority,
        skip_if_markets_closed: bool,
        timeout: Duration,
        delay_after: Duration,
        func: F,
    ) where
        F: Fn() -> BoxFuture<'static, Result<(), MareaError>> + Send + Sync + 'static,
    {
        debug!(task = name, ?priority, "registered startup task");
        self.tasks
            .lock()
            .expect("startup task list lock poisoned")
            .push(StartupTask {
                name: name.to_string(),
                func: Arc::new(func),
                priority,
                skip_if_markets_closed,
                timeout,
                delay_after,
            });
    }

    /// Register a task with the default timeout (300 s) and delay (10 s).
    pub fn register<F>(&self, name: &str, priority: TaskPriority, func: F)
    where
        F: Fn() -> BoxFuture<'static, Result<(), MareaError>> + Send + Sync + 'static,
    {
        self.register_task(
            name,
            priority,
            false,
            Duration::from_secs(300),
            Duration::from_secs(10),
            func,
        );
    }

    /// Whether a sequence is currently executing.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run all registered tasks in priority order.
    ///
    /// # Errors
    /// [`MareaError::AlreadyRunning`] when a sequence is already in flight;
    /// individual task failures are recorded in the report, never raised.
    pub async fn run_startup_sequence(&self) -> Result<StartupReport, MareaError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(MareaError::AlreadyRunning {
                what: "startup sequence".to_string(),
            });
        }
        let report = self.run_sequence_inner().await;
        self.running.store(false, Ordering::SeqCst);
        Ok(report)
    }

    async fn run_sequence_inner(&self) -> StartupReport {
        let mut ordered: Vec<(usize, TaskPriority)> = {
            let tasks = self.tasks.lock().expect("startup task list lock poisoned");
            tasks.iter().enumerate().map(|(i, t)| (i, t.priority)).collect()
        };
        // Stable sort keeps registration order inside a priority class.
        ordered.sort_by_key(|&(_, priority)| priority);

        let started_at = Utc::now();
        info!(tasks = ordered.len(), "starting startup sequence");
        let mut results = Vec::with_capacity(ordered.len());
        let last_index = ordered.len().saturating_sub(1);

        for (position, (index, _)) in ordered.iter().enumerate() {
            let (name, func, priority, skip_check, timeout, delay_after) = {
                let tasks = self.tasks.lock().expect("startup task list lock poisoned");
                let t = &tasks[*index];
                (
                    t.name.clone(),
                    t.func.clone(),
                    t.priority,
                    t.skip_if_markets_closed,
                    t.timeout,
                    t.delay_after,
                )
            };

            if skip_check && !self.clock.any_session_market_open(Utc::now()) {
                info!(task = %name, "skipping startup task: all markets closed");
                results.push(TaskResult {
                    name,
                    priority,
                    outcome: TaskOutcome::Skipped {
                        reason: "all markets closed".to_string(),
                    },
                });
                continue;
            }

            info!(task = %name, ?priority, "executing startup task");
            let task_started = Utc::now();
            let outcome = match tokio::time::timeout(timeout, func()).await {
                Ok(Ok(())) => {
                    let duration = (Utc::now() - task_started).num_milliseconds() as f64 / 1000.0;
                    info!(task = %name, duration_s = duration, "startup task completed");
                    TaskOutcome::Success {
                        duration_s: duration,
                    }
                }
                Ok(Err(e)) => {
                    error!(task = %name, error = %e, "startup task failed");
                    TaskOutcome::Failed {
                        error: e.to_string(),
                    }
                }
                Err(_) => {
                    error!(task = %name, timeout_s = timeout.as_secs(), "startup task timed out");
                    TaskOutcome::TimedOut {
                        timeout_s: timeout.as_secs(),
                    }
                }
            };
            results.push(TaskResult {
                name,
                priority,
                outcome,
            });

            if position < last_index && delay_after > Duration::ZERO {
                debug!(delay_s = delay_after.as_secs(), "staggering before next startup task");
                tokio::time::sleep(delay_after).await;
            }
        }

        let completed_at = Utc::now();
        info!(tasks = results.len(), "startup sequence completed");
        StartupReport {
            started_at,
            completed_at,
            tasks: results,
        }
    }
}
