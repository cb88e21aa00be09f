use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::market::MarketKind;

/// Normalized point-in-time quote.
///
/// Immutable once produced by an adapter; the orchestrator caches quotes
/// verbatim with a TTL and never rewrites the symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Vendor symbol, verbatim.
    pub symbol: String,
    /// Market segment this quote belongs to.
    pub market: MarketKind,
    /// Last traded / spot price.
    pub price: Decimal,
    /// Best bid, when the vendor reports level-1 data.
    pub bid: Option<Decimal>,
    /// Best ask.
    pub ask: Option<Decimal>,
    /// Size at the best bid.
    pub bid_size: Option<u64>,
    /// Size at the best ask.
    pub ask_size: Option<u64>,
    /// Session volume.
    pub volume: Option<u64>,
    /// Absolute change versus previous close.
    pub change: Option<Decimal>,
    /// Percentage change versus previous close.
    pub change_percent: Option<Decimal>,
    /// Session high.
    pub day_high: Option<Decimal>,
    /// Session low.
    pub day_low: Option<Decimal>,
    /// Session open.
    pub day_open: Option<Decimal>,
    /// Previous session close.
    pub prev_close: Option<Decimal>,
    /// Exchange tag, when known.
    pub exchange: Option<String>,
    /// Quote currency code.
    pub currency: String,
    /// Originating provider name.
    pub provider: String,
    /// UTC instant the quote was observed.
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// Build a minimal quote with only the mandatory fields set.
    #[must_use]
    pub fn new(
        symbol: impl Into<String>,
        market: MarketKind,
        price: Decimal,
        provider: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            market,
            price,
            bid: None,
            ask: None,
            bid_size: None,
            ask_size: None,
            volume: None,
            change: None,
            change_percent: None,
            day_high: None,
            day_low: None,
            day_open: None,
            prev_close: None,
            exchange: None,
            currency: "USD".to_string(),
            provider: provider.into(),
            timestamp,
        }
    }
}
