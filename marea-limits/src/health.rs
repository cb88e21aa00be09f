//! Provider health scoring and the three-state circuit breaker.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{error, info, warn};

use marea_types::HealthConfig;

/// Circuit breaker states.
///
/// Legal transitions: CLOSED→OPEN, OPEN→HALF_OPEN, HALF_OPEN→CLOSED,
/// HALF_OPEN→OPEN. The OPEN transition is idempotent under concurrent
/// failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, requests allowed.
    Closed,
    /// Failures exceeded the threshold, requests blocked.
    Open,
    /// Probing whether the provider recovered.
    HalfOpen,
}

const LATENCY_WINDOW: usize = 100;

#[derive(Debug)]
struct HealthMetrics {
    latencies: VecDeque<f64>,
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    consecutive_failures: u32,
    consecutive_successes: u32,
    circuit_state: CircuitState,
    circuit_opened_at: Option<Instant>,
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    is_healthy: bool,
    is_available: bool,
    status_message: String,
}

impl HealthMetrics {
    fn new() -> Self {
        Self {
            latencies: VecDeque::with_capacity(LATENCY_WINDOW),
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            consecutive_failures: 0,
            consecutive_successes: 0,
            circuit_state: CircuitState::Closed,
            circuit_opened_at: None,
            last_success: None,
            last_failure: None,
            is_healthy: true,
            is_available: true,
            status_message: "OK".to_string(),
        }
    }

    fn push_latency(&mut self, latency_ms: f64) {
        if self.latencies.len() == LATENCY_WINDOW {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency_ms);
    }

    fn avg_latency_ms(&self) -> f64 {
        if self.latencies.is_empty() {
            return 0.0;
        }
        self.latencies.iter().sum::<f64>() / self.latencies.len() as f64
    }

    fn p95_latency_ms(&self) -> f64 {
        if self.latencies.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.latencies.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let idx = (sorted.len() as f64 * 0.95) as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.failed_requests as f64 / self.total_requests as f64
    }

    fn open_circuit(&mut self) {
        self.circuit_state = CircuitState::Open;
        self.circuit_opened_at = Some(Instant::now());
        self.is_available = false;
    }

    fn close_circuit(&mut self) {
        self.circuit_state = CircuitState::Closed;
        self.circuit_opened_at = None;
        self.is_available = true;
        self.consecutive_failures = 0;
    }

    /// Re-derive the overall health flag and status string.
    ///
    /// Returns `Some((is_healthy, message))` when the flag flipped.
    fn update_status(&mut self, config: &HealthConfig) -> Option<(bool, String)> {
        let was_healthy = self.is_healthy;
        let error_rate = self.error_rate();
        let avg_latency = self.avg_latency_ms();

        let mut issues: Vec<String> = Vec::new();
        if error_rate >= config.critical_error_rate {
            issues.push(format!("Critical error rate: {:.1}%", error_rate * 100.0));
        } else if error_rate >= config.warning_error_rate {
            issues.push(format!("High error rate: {:.1}%", error_rate * 100.0));
        }
        if avg_latency > config.max_latency_ms {
            issues.push(format!("Excessive latency: {avg_latency:.0}ms"));
        } else if avg_latency > config.warning_latency_ms {
            issues.push(format!("High latency: {avg_latency:.0}ms"));
        }
        if self.circuit_state == CircuitState::Open {
            issues.push("Circuit breaker OPEN".to_string());
        }

        self.is_healthy = self.circuit_state != CircuitState::Open
            && error_rate < config.critical_error_rate
            && avg_latency <= config.max_latency_ms;
        self.status_message = if issues.is_empty() {
            "OK".to_string()
        } else {
            issues.join("; ")
        };

        (was_healthy != self.is_healthy).then(|| (self.is_healthy, self.status_message.clone()))
    }
}

/// Health report for one provider.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Provider name.
    pub provider: String,
    /// Whether the monitor has seen this provider.
    pub configured: bool,
    /// Overall health flag.
    pub is_healthy: bool,
    /// Whether the circuit currently admits requests.
    pub is_available: bool,
    /// Circuit breaker state.
    pub circuit_state: CircuitState,
    /// Human-readable status string listing detected issues.
    pub status_message: String,
    /// Total requests observed.
    pub total_requests: u64,
    /// Successful requests observed.
    pub successful_requests: u64,
    /// Failed requests observed.
    pub failed_requests: u64,
    /// failed / total.
    pub error_rate: f64,
    /// Windowed mean latency over the last 100 samples.
    pub avg_latency_ms: f64,
    /// 95th-percentile latency over the last 100 samples.
    pub p95_latency_ms: f64,
    /// Consecutive failures since the last success.
    pub consecutive_failures: u32,
    /// Instant of the last success.
    pub last_success: Option<DateTime<Utc>>,
    /// Instant of the last failure.
    pub last_failure: Option<DateTime<Utc>>,
}

impl HealthReport {
    fn unconfigured(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            configured: false,
            is_healthy: true,
            is_available: true,
            circuit_state: CircuitState::Closed,
            status_message: "OK".to_string(),
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            error_rate: 0.0,
            avg_latency_ms: 0.0,
            p95_latency_ms: 0.0,
            consecutive_failures: 0,
            last_success: None,
            last_failure: None,
        }
    }
}

type StatusCallback = Arc<dyn Fn(String, bool, String) -> BoxFuture<'static, ()> + Send + Sync>;

struct ProviderHealth {
    config: HealthConfig,
    metrics: Arc<Mutex<HealthMetrics>>,
}

/// Monitors provider health and drives the per-provider circuit breaker.
///
/// Latency samples are a bounded window of the last 100 request durations;
/// `avg_latency_ms` is the windowed arithmetic mean (adapters keep their own
/// EMA), `p95_latency_ms` the value at index ⌊0.95·n⌋ of the sorted window.
pub struct HealthMonitor {
    providers: Mutex<HashMap<String, Arc<ProviderHealth>>>,
    callbacks: Mutex<Vec<StatusCallback>>,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    /// Create an empty monitor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            providers: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Configure health monitoring for a provider.
    pub fn configure(&self, provider: &str, config: HealthConfig) {
        let entry = Arc::new(ProviderHealth {
            config,
            metrics: Arc::new(Mutex::new(HealthMetrics::new())),
        });
        info!(provider, "health monitor configured");
        self.providers
            .lock()
            .expect("health registry lock poisoned")
            .insert(provider.to_string(), entry);
    }

    /// Register an async callback fired exactly once per transition of the
    /// overall health flag.
    ///
    /// The callback receives the provider name, the new flag, and the status
    /// message. Panics inside callbacks are logged and swallowed.
    pub fn register_status_callback<F>(&self, callback: F)
    where
        F: Fn(String, bool, String) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.callbacks
            .lock()
            .expect("health callback lock poisoned")
            .push(Arc::new(callback));
    }

    fn entry(&self, provider: &str) -> Option<Arc<ProviderHealth>> {
        self.providers
            .lock()
            .expect("health registry lock poisoned")
            .get(provider)
            .cloned()
    }

    fn entry_or_default(&self, provider: &str) -> Arc<ProviderHealth> {
        let mut providers = self
            .providers
            .lock()
            .expect("health registry lock poisoned");
        providers
            .entry(provider.to_string())
            .or_insert_with(|| {
                Arc::new(ProviderHealth {
                    config: HealthConfig::default(),
                    metrics: Arc::new(Mutex::new(HealthMetrics::new())),
                })
            })
            .clone()
    }

    /// Record a successful request and its measured latency.
    pub async fn record_success(&self, provider: &str, latency_ms: f64) {
        let entry = self.entry_or_default(provider);
        let change = {
            let mut m = entry.metrics.lock().expect("health metrics lock poisoned");
            m.total_requests += 1;
            m.successful_requests += 1;
            m.consecutive_successes += 1;
            m.consecutive_failures = 0;
            m.last_success = Some(Utc::now());
            m.push_latency(latency_ms);

            if m.circuit_state == CircuitState::HalfOpen
                && m.consecutive_successes >= entry.config.success_threshold
            {
                m.close_circuit();
                info!(provider, "circuit breaker CLOSED - recovered");
            }

            if latency_ms > entry.config.warning_latency_ms {
                warn!(provider, latency_ms, "high latency");
            }

            m.update_status(&entry.config)
        };
        if let Some((is_healthy, message)) = change {
            self.notify_status_change(provider, is_healthy, message).await;
        }
    }

    /// Record a failed request.
    pub async fn record_failure(&self, provider: &str, error: Option<&str>) {
        let entry = self.entry_or_default(provider);
        let change = {
            let mut m = entry.metrics.lock().expect("health metrics lock poisoned");
            m.total_requests += 1;
            m.failed_requests += 1;
            m.consecutive_failures += 1;
            m.consecutive_successes = 0;
            m.last_failure = Some(Utc::now());
            warn!(provider, error = error.unwrap_or("unknown"), "request failed");

            match m.circuit_state {
                CircuitState::Closed => {
                    if m.consecutive_failures >= entry.config.failure_threshold {
                        m.open_circuit();
                        error!(provider, "circuit breaker OPENED");
                    }
                }
                // Any failure while probing reopens the circuit.
                CircuitState::HalfOpen => {
                    m.open_circuit();
                    error!(provider, "circuit breaker re-OPENED from half-open");
                }
                CircuitState::Open => {}
            }

            m.update_status(&entry.config)
        };
        if let Some((is_healthy, message)) = change {
            self.notify_status_change(provider, is_healthy, message).await;
        }
    }

    /// Whether the circuit admits a request to the provider.
    ///
    /// An open circuit transitions lazily to half-open here once the open
    /// timeout has elapsed.
    #[must_use]
    pub fn can_request(&self, provider: &str) -> bool {
        let Some(entry) = self.entry(provider) else {
            return true;
        };
        let mut m = entry.metrics.lock().expect("health metrics lock poisoned");
        if m.circuit_state != CircuitState::Open {
            return true;
        }
        if let Some(opened_at) = m.circuit_opened_at {
            if opened_at.elapsed() >= entry.config.open_timeout {
                m.circuit_state = CircuitState::HalfOpen;
                m.consecutive_successes = 0;
                info!(provider, "circuit breaker transitioning to half-open");
                return true;
            }
        }
        false
    }

    async fn notify_status_change(&self, provider: &str, is_healthy: bool, message: String) {
        let callbacks: Vec<StatusCallback> = self
            .callbacks
            .lock()
            .expect("health callback lock poisoned")
            .clone();
        for callback in callbacks {
            let fut = std::panic::AssertUnwindSafe(callback(
                provider.to_string(),
                is_healthy,
                message.clone(),
            ));
            if futures::FutureExt::catch_unwind(fut).await.is_err() {
                error!(provider, is_healthy, "health status callback panicked");
            }
        }
    }

    /// Health report for one provider.
    #[must_use]
    pub fn health(&self, provider: &str) -> HealthReport {
        let Some(entry) = self.entry(provider) else {
            return HealthReport::unconfigured(provider);
        };
        let m = entry.metrics.lock().expect("health metrics lock poisoned");
        HealthReport {
            provider: provider.to_string(),
            configured: true,
            is_healthy: m.is_healthy,
            is_available: m.is_available,
            circuit_state: m.circuit_state,
            status_message: m.status_message.clone(),
            total_requests: m.total_requests,
            successful_requests: m.successful_requests,
            failed_requests: m.failed_requests,
            error_rate: m.error_rate(),
            avg_latency_ms: m.avg_latency_ms(),
            p95_latency_ms: m.p95_latency_ms(),
            consecutive_failures: m.consecutive_failures,
            last_success: m.last_success,
            last_failure: m.last_failure,
        }
    }

    /// Reports for every known provider.
    #[must_use]
    pub fn all_health(&self) -> HashMap<String, HealthReport> {
        let names: Vec<String> = self
            .providers
            .lock()
            .expect("health registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names
            .into_iter()
            .map(|name| {
                let report = self.health(&name);
                (name, report)
            })
            .collect()
    }

    /// Names of providers that are currently healthy and available.
    #[must_use]
    pub fn healthy_providers(&self) -> Vec<String> {
        self.all_health()
            .into_iter()
            .filter(|(_, r)| r.is_healthy && r.is_available)
            .map(|(name, _)| name)
            .collect()
    }

    /// Admin reset of the metrics and circuit for a provider.
    pub fn reset(&self, provider: &str) {
        if let Some(entry) = self.entry(provider) {
            let mut m = entry.metrics.lock().expect("health metrics lock poisoned");
            *m = HealthMetrics::new();
            info!(provider, "health metrics reset");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p95_is_sorted_index() {
        let mut m = HealthMetrics::new();
        for v in [10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0] {
            m.push_latency(v);
        }
        // ⌊10 * 0.95⌋ = index 9 → 100ms.
        assert!((m.p95_latency_ms() - 100.0).abs() < f64::EPSILON);
        assert!((m.avg_latency_ms() - 55.0).abs() < f64::EPSILON);
    }

    #[test]
    fn latency_window_is_bounded() {
        let mut m = HealthMetrics::new();
        for i in 0..250 {
            m.push_latency(f64::from(i));
        }
        assert_eq!(m.latencies.len(), LATENCY_WINDOW);
        assert!((m.latencies.front().copied().unwrap() - 150.0).abs() < f64::EPSILON);
    }
}
