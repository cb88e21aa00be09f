//! Periodic collection for the curated symbol universe.
//!
//! Two jobs: a quote refresh that fans batched snapshot requests out
//! through the failover manager and writes through to the quote cache, and
//! an EOD collection that upserts daily bars for stale symbols.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use marea_core::{BarStore, SharedCache, UniverseStore};
use marea_types::{MareaError, MarketKind, Timeframe, UniverseEntry, UniverseStats};

use crate::core::Marea;

/// Tuning knobs for the collector.
#[derive(Debug, Clone)]
pub struct UniverseCollectorConfig {
    /// Symbols per provider batch request.
    pub batch_size: usize,
    /// Pause between consecutive batches.
    pub rate_limit_delay: Duration,
    /// Cap on symbols refreshed per quote run.
    pub quote_limit: usize,
    /// TTL for cached quotes.
    pub quote_cache_ttl: Duration,
    /// Age past which a symbol's EOD data is due for collection.
    pub eod_staleness: Duration,
    /// Days of history requested per EOD fetch.
    pub days_back: i64,
    /// EOD age at startup past which a catch-up collection runs.
    pub startup_staleness: Duration,
}

impl Default for UniverseCollectorConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            rate_limit_delay: Duration::from_millis(500),
            quote_limit: 100,
            quote_cache_ttl: Duration::from_secs(30 * 60),
            eod_staleness: Duration::from_secs(20 * 3600),
            days_back: 1,
            // 36h so an idle weekend does not trigger a spurious backfill.
            startup_staleness: Duration::from_secs(36 * 3600),
        }
    }
}

/// Collects quotes and EOD bars for the symbol universe.
pub struct UniverseCollector {
    marea: Arc<Marea>,
    store: Arc<dyn UniverseStore>,
    bars: Arc<dyn BarStore>,
    cache: Arc<dyn SharedCache>,
    config: UniverseCollectorConfig,
}

impl UniverseCollector {
    /// Collector with default tuning.
    #[must_use]
    pub fn new(
        marea: Arc<Marea>,
        store: Arc<dyn UniverseStore>,
        bars: Arc<dyn BarStore>,
        cache: Arc<dyn SharedCache>,
    ) -> Self {
        Self::with_config(marea, store, bars, cache, UniverseCollectorConfig::default())
    }

    /// Collector with explicit tuning.
    #[must_use]
    pub fn with_config(
        marea: Arc<Marea>,
        store: Arc<dyn UniverseStore>,
        bars: Arc<dyn BarStore>,
        cache: Arc<dyn SharedCache>,
        config: UniverseCollectorConfig,
    ) -> Self {
        Self {
            marea,
            store,
            bars,
            cache,
            config,
        }
    }

    /// Refresh quotes for the stalest active symbols.
    ///
    /// Symbols are selected oldest-first (never-updated first), partitioned
    /// by routing market, and fetched in batches through the failover
    /// manager with a pacing delay between batches. Returned quotes are
    /// cached with a TTL; symbols missing from a response have their
    /// failure counter incremented.
    ///
    /// # Errors
    /// Store read failures abort the run; per-batch fetch failures are
    /// absorbed into the stats.
    pub async fn update_quotes(&self) -> Result<UniverseStats, MareaError> {
        let entries = self.store.due_for_quotes(self.config.quote_limit).await?;
        let mut stats = UniverseStats {
            total: entries.len(),
            ..UniverseStats::default()
        };
        if entries.is_empty() {
            return Ok(stats);
        }

        let mut by_market: HashMap<MarketKind, Vec<UniverseEntry>> = HashMap::new();
        for entry in entries {
            by_market.entry(entry.routing_market()).or_default().push(entry);
        }

        let batch_size = self.config.batch_size.max(1);
        for (market, group) in by_market {
            let chunk_count = group.len().div_ceil(batch_size);
            for (i, chunk) in group.chunks(batch_size).enumerate() {
                let symbols: Vec<String> = chunk.iter().map(|e| e.symbol.clone()).collect();
                match self.marea.get_quotes(&symbols, market).await {
                    Ok(quotes) => {
                        let now = Utc::now();
                        for entry in chunk {
                            if let Some(quote) = quotes.get(&entry.symbol) {
                                self.store.mark_quote_success(&entry.symbol, now).await?;
                                self.cache
                                    .set_quote(&entry.symbol, quote, self.config.quote_cache_ttl)
                                    .await;
                                stats.updated += 1;
                            } else {
                                debug!(symbol = %entry.symbol, "no quote in batch response");
                                self.store.mark_failure(&entry.symbol, None).await?;
                                stats.failed += 1;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(%market, error = %e, "batch quote fetch failed");
                        for entry in chunk {
                            self.store
                                .mark_failure(&entry.symbol, Some(&e.to_string()))
                                .await?;
                            stats.failed += 1;
                        }
                    }
                }
                if i + 1 < chunk_count {
                    tokio::time::sleep(self.config.rate_limit_delay).await;
                }
            }
        }

        info!(
            total = stats.total,
            updated = stats.updated,
            failed = stats.failed,
            "universe quote update complete"
        );
        Ok(stats)
    }

    /// Collect end-of-day bars for symbols whose EOD data has gone stale.
    ///
    /// Bars deduplicate in the store on `(symbol, timeframe, timestamp)`,
    /// so re-running the job never duplicates rows.
    ///
    /// # Errors
    /// Store read failures abort the run; per-symbol fetch failures are
    /// absorbed into the stats.
    pub async fn collect_eod(&self) -> Result<UniverseStats, MareaError> {
        let entries = self.store.due_for_eod(self.config.eod_staleness).await?;
        let mut stats = UniverseStats {
            total: entries.len(),
            ..UniverseStats::default()
        };
        info!(symbols = entries.len(), "collecting EOD data");

        let batch_count = entries.len().div_ceil(self.config.batch_size.max(1));
        for (i, batch) in entries.chunks(self.config.batch_size.max(1)).enumerate() {
            for entry in batch {
                let end = Utc::now();
                let start = end - chrono::Duration::days(self.config.days_back);
                match self
                    .marea
                    .get_historical(&entry.symbol, start, end, Timeframe::D1, entry.routing_market())
                    .await
                {
                    Ok(bars) if !bars.is_empty() => {
                        let inserted = self.bars.upsert_bars(&bars).await?;
                        stats.bars_inserted += inserted;
                        self.store.mark_ohlcv_success(&entry.symbol, Utc::now()).await?;
                        stats.updated += 1;
                    }
                    Ok(_) => {
                        self.store
                            .mark_failure(&entry.symbol, Some("empty EOD response"))
                            .await?;
                        stats.failed += 1;
                    }
                    Err(e) => {
                        debug!(symbol = %entry.symbol, error = %e, "EOD fetch failed");
                        self.store
                            .mark_failure(&entry.symbol, Some(&e.to_string()))
                            .await?;
                        stats.failed += 1;
                    }
                }
            }
            if i + 1 < batch_count {
                tokio::time::sleep(self.config.rate_limit_delay).await;
            }
        }

        info!(
            updated = stats.updated,
            bars_inserted = stats.bars_inserted,
            failed = stats.failed,
            "EOD collection complete"
        );
        Ok(stats)
    }

    /// Startup staleness gate: run a catch-up EOD collection when the
    /// newest stored daily bar is missing or older than the startup
    /// staleness threshold.
    ///
    /// Returns the collection stats when a catch-up ran.
    ///
    /// # Errors
    /// Propagates store failures and, when a catch-up runs, its failure.
    pub async fn eod_startup_check(&self) -> Result<Option<UniverseStats>, MareaError> {
        let newest = self.bars.latest_timestamp(Timeframe::D1).await?;
        let stale = match newest {
            None => true,
            Some(at) => Utc::now()
                .signed_duration_since(at)
                .to_std()
                .is_ok_and(|age| age > self.config.startup_staleness),
        };
        if stale {
            info!("EOD data missing or stale, running startup collection");
            return self.collect_eod().await.map(Some);
        }
        info!("EOD data is fresh, skipping startup collection");
        Ok(None)
    }
}
