//! Multi-window request pacing: token bucket plus sliding-window counters.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

use marea_types::RateLimitConfig;

/// Token bucket for burst shaping.
///
/// Tokens accrue lazily at `fill_rate` per second up to `capacity`; each
/// request consumes whole tokens but the balance is fractional.
#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    fill_rate: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, fill_rate: f64, now: Instant) -> Self {
        Self {
            capacity,
            tokens: capacity,
            fill_rate,
            last_update: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.fill_rate).min(self.capacity);
        self.last_update = now;
    }

    fn consume(&mut self, tokens: u32, now: Instant) -> bool {
        self.refill(now);
        let needed = f64::from(tokens);
        if self.tokens >= needed {
            self.tokens -= needed;
            true
        } else {
            false
        }
    }

    fn time_until_available(&mut self, tokens: u32, now: Instant) -> Duration {
        self.refill(now);
        let needed = f64::from(tokens) - self.tokens;
        if needed <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(needed / self.fill_rate)
    }
}

/// Sliding-window counter holding the instants of recent requests.
#[derive(Debug)]
struct WindowCounter {
    limit: u32,
    window: Duration,
    requests: VecDeque<Instant>,
}

impl WindowCounter {
    fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            requests: VecDeque::new(),
        }
    }

    fn cleanup(&mut self, now: Instant) {
        while let Some(&oldest) = self.requests.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.requests.pop_front();
            } else {
                break;
            }
        }
    }

    fn record(&mut self, now: Instant) {
        self.cleanup(now);
        self.requests.push_back(now);
    }

    fn time_until_available(&mut self, now: Instant) -> Duration {
        self.cleanup(now);
        if (self.requests.len() as u32) < self.limit {
            return Duration::ZERO;
        }
        match self.requests.front() {
            Some(&oldest) => (oldest + self.window).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    fn remaining(&mut self, now: Instant) -> u32 {
        self.cleanup(now);
        self.limit.saturating_sub(self.requests.len() as u32)
    }
}

#[derive(Debug)]
struct LimiterState {
    bucket: TokenBucket,
    minute: Option<WindowCounter>,
    hour: Option<WindowCounter>,
    day: Option<WindowCounter>,
}

impl LimiterState {
    fn from_config(config: &RateLimitConfig, now: Instant) -> Self {
        // A window limit of zero means "disable this window"; the bucket
        // falls back to a 60/min refill when no per-minute cap is set.
        let rpm = config.requests_per_minute.filter(|&v| v > 0).unwrap_or(60);
        // Zero burst degenerates to pure pacing at the refill rate: the
        // bucket never holds a token, so every call waits 60/rpm seconds.
        let capacity = f64::from(config.burst_size.min(rpm));
        let bucket = TokenBucket::new(capacity, f64::from(rpm) / 60.0, now);

        let window = |limit: Option<u32>, secs: u64| {
            limit
                .filter(|&v| v > 0)
                .map(|v| WindowCounter::new(v, Duration::from_secs(secs)))
        };

        Self {
            bucket,
            minute: window(config.requests_per_minute, 60),
            hour: window(config.requests_per_hour, 3600),
            day: window(config.requests_per_day, 86_400),
        }
    }

    fn wait_time(&mut self, tokens: u32, now: Instant) -> Duration {
        let mut wait = self.bucket.time_until_available(tokens, now);
        for counter in [&mut self.minute, &mut self.hour, &mut self.day]
            .into_iter()
            .flatten()
        {
            wait = wait.max(counter.time_until_available(now));
        }
        wait
    }

    fn record(&mut self, tokens: u32, now: Instant) {
        self.bucket.consume(tokens, now);
        for counter in [&mut self.minute, &mut self.hour, &mut self.day]
            .into_iter()
            .flatten()
        {
            counter.record(now);
        }
    }
}

struct ProviderLimiter {
    config: RateLimitConfig,
    /// Serializes `acquire` callers so the wait computation and the
    /// recording step see a consistent ordering.
    acquire_lock: Arc<tokio::sync::Mutex<()>>,
    state: Arc<Mutex<LimiterState>>,
}

/// Snapshot of a provider's rate-limit position.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    /// Whether limits are configured for the provider.
    pub configured: bool,
    /// Remaining requests in the minute window, when active.
    pub remaining_per_minute: Option<u32>,
    /// Remaining requests in the hour window, when active.
    pub remaining_per_hour: Option<u32>,
    /// Remaining requests in the day window, when active.
    pub remaining_per_day: Option<u32>,
    /// Whether a request could proceed right now without waiting.
    pub can_proceed: bool,
    /// Wait a request arriving now would incur.
    pub wait_time: Duration,
}

/// Rate limiter enforcing up to four concurrent limits per provider.
///
/// A token bucket shapes bursts (capacity `min(burst, per-minute)`, refill
/// `per-minute / 60` tokens per second) while sliding-window counters apply
/// hard per-minute, per-hour, and per-day caps. Unconfigured providers are
/// unlimited.
pub struct RateLimiter {
    providers: Mutex<HashMap<String, Arc<ProviderLimiter>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    /// Create an empty limiter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            providers: Mutex::new(HashMap::new()),
        }
    }

    /// Configure (or reconfigure) limits for a provider.
    pub fn configure(&self, provider: &str, config: RateLimitConfig) {
        let now = Instant::now();
        let limiter = Arc::new(ProviderLimiter {
            state: Arc::new(Mutex::new(LimiterState::from_config(&config, now))),
            acquire_lock: Arc::new(tokio::sync::Mutex::new(())),
            config,
        });
        info!(provider, config = ?limiter.config, "rate limiter configured");
        self.providers
            .lock()
            .expect("rate limiter registry lock poisoned")
            .insert(provider.to_string(), limiter);
    }

    fn limiter(&self, provider: &str) -> Option<Arc<ProviderLimiter>> {
        self.providers
            .lock()
            .expect("rate limiter registry lock poisoned")
            .get(provider)
            .cloned()
    }

    /// Acquire one token for a request, waiting cooperatively if necessary.
    pub async fn acquire(&self, provider: &str) {
        self.acquire_n(provider, 1).await;
    }

    /// Acquire `tokens` for a request, waiting cooperatively if necessary.
    ///
    /// Callers are serialized per provider so counters reflect true serial
    /// order. Dropping the returned future mid-wait records nothing, so a
    /// cancelled caller never consumes tokens.
    pub async fn acquire_n(&self, provider: &str, tokens: u32) {
        let Some(limiter) = self.limiter(provider) else {
            // No rate limit configured, allow all.
            return;
        };

        let _serialized = limiter.acquire_lock.lock().await;
        let wait = limiter
            .state
            .lock()
            .expect("rate limiter state lock poisoned")
            .wait_time(tokens, Instant::now());
        if wait > Duration::ZERO {
            debug!(provider, wait_s = wait.as_secs_f64(), "rate limit: waiting");
            tokio::time::sleep(wait).await;
        }
        limiter
            .state
            .lock()
            .expect("rate limiter state lock poisoned")
            .record(tokens, Instant::now());
    }

    /// Non-blocking peek: whether a request could proceed right now.
    #[must_use]
    pub fn can_proceed(&self, provider: &str) -> bool {
        self.limiter(provider).is_none_or(|limiter| {
            limiter
                .state
                .lock()
                .expect("rate limiter state lock poisoned")
                .wait_time(1, Instant::now())
                .is_zero()
        })
    }

    /// Wait a request arriving now would incur across all active limits.
    #[must_use]
    pub fn wait_time(&self, provider: &str) -> Duration {
        self.limiter(provider).map_or(Duration::ZERO, |limiter| {
            limiter
                .state
                .lock()
                .expect("rate limiter state lock poisoned")
                .wait_time(1, Instant::now())
        })
    }

    /// Remaining requests per active window.
    #[must_use]
    pub fn remaining(&self, provider: &str) -> HashMap<&'static str, u32> {
        let mut out = HashMap::new();
        if let Some(limiter) = self.limiter(provider) {
            let mut state = limiter
                .state
                .lock()
                .expect("rate limiter state lock poisoned");
            let now = Instant::now();
            if let Some(c) = state.minute.as_mut() {
                out.insert("per_minute", c.remaining(now));
            }
            if let Some(c) = state.hour.as_mut() {
                out.insert("per_hour", c.remaining(now));
            }
            if let Some(c) = state.day.as_mut() {
                out.insert("per_day", c.remaining(now));
            }
        }
        out
    }

    /// Snapshot of the provider's rate-limit position.
    #[must_use]
    pub fn stats(&self, provider: &str) -> RateLimiterStats {
        let Some(limiter) = self.limiter(provider) else {
            return RateLimiterStats {
                configured: false,
                remaining_per_minute: None,
                remaining_per_hour: None,
                remaining_per_day: None,
                can_proceed: true,
                wait_time: Duration::ZERO,
            };
        };
        let mut state = limiter
            .state
            .lock()
            .expect("rate limiter state lock poisoned");
        let now = Instant::now();
        let wait = state.wait_time(1, now);
        RateLimiterStats {
            configured: true,
            remaining_per_minute: state.minute.as_mut().map(|c| c.remaining(now)),
            remaining_per_hour: state.hour.as_mut().map(|c| c.remaining(now)),
            remaining_per_day: state.day.as_mut().map(|c| c.remaining(now)),
            can_proceed: wait.is_zero(),
            wait_time: wait,
        }
    }

    /// Admin reset of the daily window for a provider.
    pub fn reset_daily(&self, provider: &str) {
        if let Some(limiter) = self.limiter(provider) {
            let mut state = limiter
                .state
                .lock()
                .expect("rate limiter state lock poisoned");
            if let Some(day) = state.day.as_mut() {
                *day = WindowCounter::new(day.limit, day.window);
                info!(provider, "daily rate limit reset");
            }
        }
    }
}
