use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use marea_types::{Bar, MareaError, ProviderConfig, Quote, Timeframe};

/// Focused role trait for adapters that serve snapshot quotes.
#[async_trait]
pub trait QuoteFeed: Send + Sync {
    /// Fetch a point-in-time quote for a single symbol.
    async fn quote(&self, symbol: &str) -> Result<Quote, MareaError>;

    /// Fetch quotes for multiple symbols.
    ///
    /// Partial results are permitted: a symbol missing from the returned map
    /// signals per-symbol unavailability without failing the whole batch.
    async fn quotes(&self, symbols: &[String]) -> Result<HashMap<String, Quote>, MareaError>;
}

/// Focused role trait for adapters that serve historical OHLCV bars.
#[async_trait]
pub trait HistoryFeed: Send + Sync {
    /// Fetch bars over `[start, end]` at the given cadence.
    ///
    /// The returned sequence is ascending by timestamp and deduplicated on
    /// `(symbol, timeframe, timestamp)`. An empty sequence is a valid success.
    async fn history(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timeframe: Timeframe,
    ) -> Result<Vec<Bar>, MareaError>;
}

/// Focused role trait for adapters that stream live quotes.
#[async_trait]
pub trait StreamFeed: Send + Sync {
    /// Add symbols to the live subscription set.
    async fn subscribe(&self, symbols: &[String]) -> Result<(), MareaError>;

    /// Remove symbols from the live subscription set.
    async fn unsubscribe(&self, symbols: &[String]) -> Result<(), MareaError>;

    /// Start a streaming session delivering quotes for the subscribed symbols.
    async fn stream_quotes(
        &self,
    ) -> Result<(crate::StreamHandle, tokio::sync::mpsc::Receiver<Quote>), MareaError>;
}

/// Main adapter trait implemented by provider crates.
///
/// Capability discovery follows the accessor pattern: an adapter advertises a
/// feed by returning a usable trait object from the matching `as_*` method.
/// The default `None` means "not supported" and keeps the adapter out of the
/// corresponding failover groups.
#[async_trait]
pub trait MareaConnector: Send + Sync {
    /// Stable provider name; the key used by every per-provider gate.
    fn name(&self) -> &str;

    /// Human-friendly vendor string.
    fn vendor(&self) -> &str {
        "unknown"
    }

    /// Static descriptor: credentials, limits, coverage, priority, flags.
    fn config(&self) -> &ProviderConfig;

    /// Acquire connections and validate credentials.
    ///
    /// # Errors
    /// Fails with [`MareaError::Auth`] when credentials are rejected.
    async fn initialize(&self) -> Result<(), MareaError> {
        Ok(())
    }

    /// Release resources. Must be idempotent.
    async fn close(&self) -> Result<(), MareaError> {
        Ok(())
    }

    /// Cheap connectivity probe (single known symbol or reference endpoint).
    async fn health_check(&self) -> Result<bool, MareaError>;

    /// Snapshot of the adapter's own outcome bookkeeping.
    fn status(&self) -> AdapterStatusSnapshot {
        AdapterStatusSnapshot::default()
    }

    /// Advertise quote capability.
    fn as_quote_feed(&self) -> Option<&dyn QuoteFeed> {
        None
    }

    /// Advertise history capability.
    fn as_history_feed(&self) -> Option<&dyn HistoryFeed> {
        None
    }

    /// Advertise streaming capability.
    fn as_stream_feed(&self) -> Option<&dyn StreamFeed> {
        None
    }
}

#[derive(Debug, Default, Clone)]
struct StatusInner {
    success_count: u64,
    error_count: u64,
    avg_latency_ms: f64,
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    last_error_message: Option<String>,
    requests_today: u64,
    cost_today: Decimal,
    is_healthy: bool,
}

/// Per-adapter outcome recorder.
///
/// Every adapter owns one and records each call outcome into it, independent
/// of the orchestrator's health monitor. Latency is a rolling exponential
/// moving average with alpha 0.1; the health monitor keeps a windowed mean
/// instead, so the two metrics intentionally differ.
#[derive(Debug)]
pub struct AdapterStatus {
    inner: Mutex<StatusInner>,
}

impl Default for AdapterStatus {
    fn default() -> Self {
        Self::new()
    }
}

const LATENCY_EMA_ALPHA: f64 = 0.1;

impl AdapterStatus {
    /// Create an empty, healthy recorder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StatusInner {
                is_healthy: true,
                ..StatusInner::default()
            }),
        }
    }

    /// Record a successful call and its measured latency.
    ///
    /// Resets the consecutive error count and restores the healthy flag.
    pub fn record_success(&self, latency_ms: f64) {
        let mut s = self.inner.lock().expect("adapter status lock poisoned");
        s.success_count += 1;
        s.requests_today += 1;
        s.last_success = Some(Utc::now());
        s.avg_latency_ms = LATENCY_EMA_ALPHA * latency_ms + (1.0 - LATENCY_EMA_ALPHA) * s.avg_latency_ms;
        s.error_count = 0;
        s.is_healthy = true;
    }

    /// Record a failed call with its message.
    pub fn record_failure(&self, error: &str) {
        let mut s = self.inner.lock().expect("adapter status lock poisoned");
        s.error_count += 1;
        s.last_failure = Some(Utc::now());
        s.last_error_message = Some(error.to_string());
        if s.error_count >= 5 {
            s.is_healthy = false;
        }
    }

    /// Add to the running daily cost.
    pub fn record_cost(&self, cost: Decimal) {
        let mut s = self.inner.lock().expect("adapter status lock poisoned");
        s.cost_today += cost;
    }

    /// Take a point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> AdapterStatusSnapshot {
        let s = self.inner.lock().expect("adapter status lock poisoned");
        AdapterStatusSnapshot {
            success_count: s.success_count,
            error_count: s.error_count,
            avg_latency_ms: s.avg_latency_ms,
            last_success: s.last_success,
            last_failure: s.last_failure,
            last_error_message: s.last_error_message.clone(),
            requests_today: s.requests_today,
            cost_today: s.cost_today,
            is_healthy: s.is_healthy,
        }
    }
}

/// Point-in-time copy of an adapter's [`AdapterStatus`] counters.
#[derive(Debug, Clone, Default)]
pub struct AdapterStatusSnapshot {
    /// Calls that completed successfully.
    pub success_count: u64,
    /// Consecutive failures since the last success.
    pub error_count: u64,
    /// Rolling EMA of call latency in milliseconds (alpha 0.1).
    pub avg_latency_ms: f64,
    /// Instant of the last success.
    pub last_success: Option<DateTime<Utc>>,
    /// Instant of the last failure.
    pub last_failure: Option<DateTime<Utc>>,
    /// Message of the last failure.
    pub last_error_message: Option<String>,
    /// Calls made since the adapter started counting today.
    pub requests_today: u64,
    /// Cost accumulated today.
    pub cost_today: Decimal,
    /// Adapter-local health flag (five consecutive failures clear it).
    pub is_healthy: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_latency_converges_toward_samples() {
        let status = AdapterStatus::new();
        for _ in 0..100 {
            status.record_success(200.0);
        }
        let snap = status.snapshot();
        assert!((snap.avg_latency_ms - 200.0).abs() < 1.0);
        assert!(snap.is_healthy);
    }

    #[test]
    fn five_consecutive_failures_clear_health_flag() {
        let status = AdapterStatus::new();
        for _ in 0..4 {
            status.record_failure("boom");
        }
        assert!(status.snapshot().is_healthy);
        status.record_failure("boom");
        assert!(!status.snapshot().is_healthy);

        status.record_success(10.0);
        let snap = status.snapshot();
        assert!(snap.is_healthy);
        assert_eq!(snap.error_count, 0);
    }
}
