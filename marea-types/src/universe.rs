use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::market::{MarketKind, Region};

/// Asset class tag for universe entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    /// Common stock.
    Stock,
    /// Exchange-traded fund.
    Etf,
    /// Index.
    Index,
    /// Cryptocurrency.
    Crypto,
}

/// One row of the curated symbol universe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniverseEntry {
    /// Vendor symbol, verbatim (primary key).
    pub symbol: String,
    /// Home region tag.
    pub region: Region,
    /// Market-kind hint; derived from region/asset type when absent.
    pub market_kind: Option<MarketKind>,
    /// Asset class.
    pub asset_type: AssetType,
    /// Collection priority (lower = refreshed more eagerly).
    pub priority: u32,
    /// Last successful quote refresh.
    pub last_quote_update: Option<DateTime<Utc>>,
    /// Last successful EOD bar collection.
    pub last_ohlcv_update: Option<DateTime<Utc>>,
    /// Consecutive collection failures for this symbol.
    pub consecutive_failures: u32,
    /// Truncated message of the last failure.
    pub last_error: Option<String>,
    /// Whether the symbol participates in collection.
    pub is_active: bool,
}

impl UniverseEntry {
    /// Create an active entry with no collection history.
    #[must_use]
    pub fn new(symbol: impl Into<String>, region: Region, asset_type: AssetType) -> Self {
        Self {
            symbol: symbol.into(),
            region,
            market_kind: None,
            asset_type,
            priority: 100,
            last_quote_update: None,
            last_ohlcv_update: None,
            consecutive_failures: 0,
            last_error: None,
            is_active: true,
        }
    }

    /// Market kind used for provider routing: the explicit hint when set,
    /// ETFs as their own segment, otherwise derived from the region.
    #[must_use]
    pub fn routing_market(&self) -> MarketKind {
        if let Some(kind) = self.market_kind {
            return kind;
        }
        if self.asset_type == AssetType::Etf {
            return MarketKind::Etf;
        }
        match self.region {
            Region::Us | Region::Global => MarketKind::UsStock,
            Region::Uk | Region::Eu => MarketKind::EuStock,
            Region::Asia => MarketKind::AsiaStock,
        }
    }
}

/// Aggregate counters emitted by universe collection jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniverseStats {
    /// Symbols considered by the run.
    pub total: usize,
    /// Symbols refreshed successfully.
    pub updated: usize,
    /// Symbols that failed or were missing from responses.
    pub failed: usize,
    /// Symbols skipped (inactive or fresh enough).
    pub skipped: usize,
    /// Bars written by EOD collection runs.
    pub bars_inserted: usize,
}
