//! Durable store abstractions for bars, the symbol universe, and FX rates,
//! plus the upstream FX rate source boundary.
//!
//! Persistence is modelled behind traits so job code can be exercised against
//! in-memory implementations in tests and a relational store in production.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use marea_types::{Bar, FxRate, MareaError, Timeframe, UniverseEntry};

/// Append-only store for price bars, keyed by `(symbol, timeframe, timestamp)`.
///
/// Writers use insert-or-ignore semantics: re-upserting an existing key
/// leaves the row count unchanged.
#[async_trait]
pub trait BarStore: Send + Sync {
    /// Insert bars, ignoring keys already present. Returns the number of
    /// rows actually inserted.
    async fn upsert_bars(&self, bars: &[Bar]) -> Result<usize, MareaError>;

    /// Read bars for one series over `[start, end]`, ascending by timestamp.
    async fn bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, MareaError>;

    /// Newest bar timestamp stored for a timeframe across all symbols.
    ///
    /// Drives the EOD staleness check at startup.
    async fn latest_timestamp(
        &self,
        timeframe: Timeframe,
    ) -> Result<Option<DateTime<Utc>>, MareaError>;
}

/// Store for the curated symbol universe.
#[async_trait]
pub trait UniverseStore: Send + Sync {
    /// Insert or replace a universe entry.
    async fn upsert_entry(&self, entry: UniverseEntry) -> Result<(), MareaError>;

    /// Active entries ordered by `last_quote_update` ascending with nulls
    /// first (oldest-first fairness), capped at `limit`.
    async fn due_for_quotes(&self, limit: usize) -> Result<Vec<UniverseEntry>, MareaError>;

    /// Active entries whose `last_ohlcv_update` is older than `staleness`
    /// (or has never happened).
    async fn due_for_eod(&self, staleness: Duration) -> Result<Vec<UniverseEntry>, MareaError>;

    /// Record a successful quote refresh: stamps the entry and clears its
    /// failure counter.
    async fn mark_quote_success(&self, symbol: &str, at: DateTime<Utc>) -> Result<(), MareaError>;

    /// Record a successful EOD collection for a symbol.
    async fn mark_ohlcv_success(&self, symbol: &str, at: DateTime<Utc>) -> Result<(), MareaError>;

    /// Record a failed collection attempt; increments the failure counter
    /// and stores a truncated error message.
    async fn mark_failure(&self, symbol: &str, error: Option<&str>) -> Result<(), MareaError>;

    /// All entries, for reporting.
    async fn all_entries(&self) -> Result<Vec<UniverseEntry>, MareaError>;
}

/// Durable store for cross rates, keyed by `(base, quote)`.
///
/// Written through by the FX rate maintainer only.
#[async_trait]
pub trait FxStore: Send + Sync {
    /// Insert or replace rates. Returns the number of pairs written.
    async fn upsert_rates(&self, rates: &[FxRate]) -> Result<usize, MareaError>;

    /// Look up a single pair.
    async fn rate(&self, base: &str, quote: &str) -> Result<Option<FxRate>, MareaError>;

    /// All stored pairs.
    async fn all_rates(&self) -> Result<HashMap<(String, String), FxRate>, MareaError>;

    /// Newest `fetched_at` across the table, for the startup freshness check.
    async fn newest_fetched_at(&self) -> Result<Option<DateTime<Utc>>, MareaError>;
}

/// Upstream source of EUR-basis exchange rates.
///
/// One implementation per vendor; the reference deployment uses the ECB
/// feed. Rates map currency code to units per EUR; EUR itself may be
/// omitted by the vendor and is treated as 1 downstream.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Source tag recorded on every stored rate.
    fn name(&self) -> &str;

    /// Fetch EUR-based rates for the requested quote currencies.
    async fn fetch_eur_rates(
        &self,
        currencies: &[String],
    ) -> Result<HashMap<String, Decimal>, MareaError>;
}
