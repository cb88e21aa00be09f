//! In-memory store implementations backing tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use marea_core::{BarStore, FxStore, RateSource, UniverseStore};
use marea_types::{Bar, FxRate, MareaError, Timeframe, UniverseEntry};

type BarKey = (String, Timeframe, DateTime<Utc>);

/// Append-only in-memory bar store with insert-or-ignore semantics.
#[derive(Debug, Default)]
pub struct MemoryBarStore {
    rows: Mutex<BTreeMap<BarKey, Bar>>,
}

impl MemoryBarStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total stored rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.lock().expect("bar store lock poisoned").len()
    }

    /// Whether the store holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BarStore for MemoryBarStore {
    async fn upsert_bars(&self, bars: &[Bar]) -> Result<usize, MareaError> {
        let mut rows = self.rows.lock().expect("bar store lock poisoned");
        let mut inserted = 0;
        for bar in bars {
            let key = (bar.symbol.clone(), bar.timeframe, bar.timestamp);
            if let std::collections::btree_map::Entry::Vacant(slot) = rows.entry(key) {
                slot.insert(bar.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, MareaError> {
        let rows = self.rows.lock().expect("bar store lock poisoned");
        Ok(rows
            .values()
            .filter(|b| {
                b.symbol == symbol
                    && b.timeframe == timeframe
                    && b.timestamp >= start
                    && b.timestamp <= end
            })
            .cloned()
            .collect())
    }

    async fn latest_timestamp(
        &self,
        timeframe: Timeframe,
    ) -> Result<Option<DateTime<Utc>>, MareaError> {
        let rows = self.rows.lock().expect("bar store lock poisoned");
        Ok(rows
            .values()
            .filter(|b| b.timeframe == timeframe)
            .map(|b| b.timestamp)
            .max())
    }
}

/// In-memory symbol universe.
#[derive(Debug, Default)]
pub struct MemoryUniverseStore {
    entries: Mutex<HashMap<String, UniverseEntry>>,
}

impl MemoryUniverseStore {
    /// Empty universe.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the universe from entries.
    #[must_use]
    pub fn seeded(entries: Vec<UniverseEntry>) -> Self {
        let store = Self::new();
        {
            let mut map = store.entries.lock().expect("universe lock poisoned");
            for entry in entries {
                map.insert(entry.symbol.clone(), entry);
            }
        }
        store
    }

    /// One entry by symbol.
    #[must_use]
    pub fn entry(&self, symbol: &str) -> Option<UniverseEntry> {
        self.entries
            .lock()
            .expect("universe lock poisoned")
            .get(symbol)
            .cloned()
    }
}

#[async_trait]
impl UniverseStore for MemoryUniverseStore {
    async fn upsert_entry(&self, entry: UniverseEntry) -> Result<(), MareaError> {
        self.entries
            .lock()
            .expect("universe lock poisoned")
            .insert(entry.symbol.clone(), entry);
        Ok(())
    }

    async fn due_for_quotes(&self, limit: usize) -> Result<Vec<UniverseEntry>, MareaError> {
        let entries = self.entries.lock().expect("universe lock poisoned");
        let mut due: Vec<UniverseEntry> =
            entries.values().filter(|e| e.is_active).cloned().collect();
        // Oldest first, never-updated first; symbol as a deterministic tiebreak.
        due.sort_by(|a, b| {
            a.last_quote_update
                .cmp(&b.last_quote_update)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        due.truncate(limit);
        Ok(due)
    }

    async fn due_for_eod(&self, staleness: Duration) -> Result<Vec<UniverseEntry>, MareaError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(staleness).unwrap_or_else(|_| chrono::Duration::hours(20));
        let entries = self.entries.lock().expect("universe lock poisoned");
        let mut due: Vec<UniverseEntry> = entries
            .values()
            .filter(|e| e.is_active && e.last_ohlcv_update.is_none_or(|at| at < cutoff))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(due)
    }

    async fn mark_quote_success(&self, symbol: &str, at: DateTime<Utc>) -> Result<(), MareaError> {
        let mut entries = self.entries.lock().expect("universe lock poisoned");
        if let Some(entry) = entries.get_mut(symbol) {
            entry.last_quote_update = Some(at);
            entry.consecutive_failures = 0;
            entry.last_error = None;
        }
        Ok(())
    }

    async fn mark_ohlcv_success(&self, symbol: &str, at: DateTime<Utc>) -> Result<(), MareaError> {
        let mut entries = self.entries.lock().expect("universe lock poisoned");
        if let Some(entry) = entries.get_mut(symbol) {
            entry.last_ohlcv_update = Some(at);
            entry.consecutive_failures = 0;
            entry.last_error = None;
        }
        Ok(())
    }

    async fn mark_failure(&self, symbol: &str, error: Option<&str>) -> Result<(), MareaError> {
        let mut entries = self.entries.lock().expect("universe lock poisoned");
        if let Some(entry) = entries.get_mut(symbol) {
            entry.consecutive_failures += 1;
            entry.last_error = error.map(|e| e.chars().take(500).collect());
        }
        Ok(())
    }

    async fn all_entries(&self) -> Result<Vec<UniverseEntry>, MareaError> {
        let entries = self.entries.lock().expect("universe lock poisoned");
        Ok(entries.values().cloned().collect())
    }
}

/// In-memory FX rate table.
#[derive(Debug, Default)]
pub struct MemoryFxStore {
    rates: Mutex<HashMap<(String, String), FxRate>>,
}

impl MemoryFxStore {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FxStore for MemoryFxStore {
    async fn upsert_rates(&self, rates: &[FxRate]) -> Result<usize, MareaError> {
        let mut table = self.rates.lock().expect("fx store lock poisoned");
        for rate in rates {
            table.insert((rate.base.clone(), rate.quote.clone()), rate.clone());
        }
        Ok(rates.len())
    }

    async fn rate(&self, base: &str, quote: &str) -> Result<Option<FxRate>, MareaError> {
        let table = self.rates.lock().expect("fx store lock poisoned");
        Ok(table.get(&(base.to_string(), quote.to_string())).cloned())
    }

    async fn all_rates(&self) -> Result<HashMap<(String, String), FxRate>, MareaError> {
        Ok(self.rates.lock().expect("fx store lock poisoned").clone())
    }

    async fn newest_fetched_at(&self) -> Result<Option<DateTime<Utc>>, MareaError> {
        let table = self.rates.lock().expect("fx store lock poisoned");
        Ok(table.values().map(|r| r.fetched_at).max())
    }
}

/// Rate source serving a fixed EUR-basis table.
pub struct StaticRateSource {
    rates: HashMap<String, Decimal>,
    fetches: AtomicUsize,
    fail: bool,
}

impl StaticRateSource {
    /// Source answering from the given EUR-basis rates.
    #[must_use]
    pub fn new(rates: HashMap<String, Decimal>) -> Self {
        Self {
            rates,
            fetches: AtomicUsize::new(0),
            fail: false,
        }
    }

    /// Source that fails every fetch.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            rates: HashMap::new(),
            fetches: AtomicUsize::new(0),
            fail: true,
        }
    }

    /// Fetches observed so far.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RateSource for StaticRateSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch_eur_rates(
        &self,
        currencies: &[String],
    ) -> Result<HashMap<String, Decimal>, MareaError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MareaError::provider("static", "rate source offline"));
        }
        Ok(currencies
            .iter()
            .filter_map(|c| self.rates.get(c).map(|r| (c.clone(), *r)))
            .collect())
    }
}
