//! Mock connector and in-memory stores for CI-safe tests and examples.
//!
//! The [`MockConnector`] serves deterministic quotes and daily bars by
//! default; tests tailor behaviour per capability with closure hooks or
//! scripted outcome queues (consumed one result per call).

mod stores;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc, Weekday};
use rust_decimal::Decimal;

use marea_core::connector::{HistoryFeed, QuoteFeed};
use marea_core::{AdapterStatus, AdapterStatusSnapshot, MareaConnector};
use marea_types::{
    Bar, DataType, MareaError, MarketKind, ProviderConfig, Quote, Timeframe,
};

pub use stores::{MemoryBarStore, MemoryFxStore, MemoryUniverseStore, StaticRateSource};

type QuoteFn = Arc<dyn Fn(&str) -> Result<Quote, MareaError> + Send + Sync>;
type QuotesFn =
    Arc<dyn Fn(&[String]) -> Result<HashMap<String, Quote>, MareaError> + Send + Sync>;
type HistoryFn = Arc<
    dyn Fn(&str, DateTime<Utc>, DateTime<Utc>, Timeframe) -> Result<Vec<Bar>, MareaError>
        + Send
        + Sync,
>;

/// Configurable in-memory connector used by integration tests.
pub struct MockConnector {
    config: ProviderConfig,
    status: AdapterStatus,
    delay: Option<Duration>,
    healthy: AtomicBool,
    calls: AtomicUsize,

    quote_fn: Option<QuoteFn>,
    quotes_fn: Option<QuotesFn>,
    history_fn: Option<HistoryFn>,
    scripted_quotes: Mutex<VecDeque<Result<Quote, MareaError>>>,
}

impl MockConnector {
    /// Connector covering the given markets and data types.
    #[must_use]
    pub fn new(name: &str, markets: &[MarketKind], data_types: &[DataType]) -> Self {
        Self {
            config: ProviderConfig::new(name)
                .markets(markets)
                .data_types(data_types),
            status: AdapterStatus::new(),
            delay: None,
            healthy: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            quote_fn: None,
            quotes_fn: None,
            history_fn: None,
            scripted_quotes: Mutex::new(VecDeque::new()),
        }
    }

    /// Replace the descriptor entirely (limits, budget, priority, ...).
    #[must_use]
    pub fn with_provider_config(mut self, config: ProviderConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the static priority.
    #[must_use]
    pub fn priority(mut self, priority: u32) -> Self {
        self.config.priority = priority;
        self
    }

    /// Simulate network latency on every call.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Custom single-quote behaviour.
    #[must_use]
    pub fn with_quote_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Result<Quote, MareaError> + Send + Sync + 'static,
    {
        self.quote_fn = Some(Arc::new(f));
        self
    }

    /// Custom batch-quote behaviour (partial results included).
    #[must_use]
    pub fn with_quotes_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&[String]) -> Result<HashMap<String, Quote>, MareaError> + Send + Sync + 'static,
    {
        self.quotes_fn = Some(Arc::new(f));
        self
    }

    /// Custom history behaviour.
    #[must_use]
    pub fn with_history_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, DateTime<Utc>, DateTime<Utc>, Timeframe) -> Result<Vec<Bar>, MareaError>
            + Send
            + Sync
            + 'static,
    {
        self.history_fn = Some(Arc::new(f));
        self
    }

    /// Queue scripted outcomes consumed one per `quote` call; once drained,
    /// the default deterministic quote applies again.
    #[must_use]
    pub fn with_scripted_quotes(
        self,
        outcomes: Vec<Result<Quote, MareaError>>,
    ) -> Self {
        *self
            .scripted_quotes
            .lock()
            .expect("scripted quote lock poisoned") = outcomes.into();
        self
    }

    /// Control what `health_check` reports.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Calls observed across all feeds.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Deterministic quote fixture for a symbol.
    #[must_use]
    pub fn fixture_quote(&self, symbol: &str) -> Quote {
        let mut quote = Quote::new(
            symbol,
            self.config
                .supported_markets
                .first()
                .copied()
                .unwrap_or(MarketKind::UsStock),
            Decimal::new(10_000, 2),
            self.config.name.as_str(),
            Utc::now(),
        );
        quote.volume = Some(1_000_000);
        quote.prev_close = Some(Decimal::new(9_900, 2));
        quote
    }

    /// Deterministic daily-bar fixture covering weekday dates in range.
    #[must_use]
    pub fn fixture_history(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timeframe: Timeframe,
    ) -> Vec<Bar> {
        let mut bars = Vec::new();
        let mut date = start.date_naive();
        while date <= end.date_naive() {
            if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
                if let Some(ts) = date.and_hms_opt(0, 0, 0) {
                    bars.push(Bar::new(
                        symbol,
                        timeframe,
                        ts.and_utc(),
                        Decimal::new(1_000, 2),
                        Decimal::new(1_200, 2),
                        Decimal::new(900, 2),
                        Decimal::new(1_100, 2),
                        1_000,
                        self.config.name.as_str(),
                    ));
                }
            }
            date = match date.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }
        bars
    }

    async fn simulate_latency(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl MareaConnector for MockConnector {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn vendor(&self) -> &str {
        "Mock"
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn health_check(&self) -> Result<bool, MareaError> {
        Ok(self.healthy.load(Ordering::SeqCst))
    }

    fn status(&self) -> AdapterStatusSnapshot {
        self.status.snapshot()
    }

    fn as_quote_feed(&self) -> Option<&dyn QuoteFeed> {
        Some(self as &dyn QuoteFeed)
    }

    fn as_history_feed(&self) -> Option<&dyn HistoryFeed> {
        Some(self as &dyn HistoryFeed)
    }
}

#[async_trait]
impl QuoteFeed for MockConnector {
    async fn quote(&self, symbol: &str) -> Result<Quote, MareaError> {
        self.simulate_latency().await;

        let scripted = self
            .scripted_quotes
            .lock()
            .expect("scripted quote lock poisoned")
            .pop_front();
        let outcome = match scripted {
            Some(outcome) => outcome,
            None => match &self.quote_fn {
                Some(f) => f(symbol),
                None => Ok(self.fixture_quote(symbol)),
            },
        };

        match &outcome {
            Ok(_) => self.status.record_success(1.0),
            Err(e) => self.status.record_failure(&e.to_string()),
        }
        outcome
    }

    async fn quotes(&self, symbols: &[String]) -> Result<HashMap<String, Quote>, MareaError> {
        self.simulate_latency().await;
        if let Some(f) = &self.quotes_fn {
            return f(symbols);
        }
        Ok(symbols
            .iter()
            .map(|s| (s.clone(), self.fixture_quote(s)))
            .collect())
    }
}

#[async_trait]
impl HistoryFeed for MockConnector {
    async fn history(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timeframe: Timeframe,
    ) -> Result<Vec<Bar>, MareaError> {
        self.simulate_latency().await;
        if let Some(f) = &self.history_fn {
            return f(symbol, start, end, timeframe);
        }
        Ok(self.fixture_history(symbol, start, end, timeframe))
    }
}
