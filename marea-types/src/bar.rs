use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::MareaError;
use crate::market::Timeframe;

/// Normalized OHLCV candlestick.
///
/// `(symbol, timeframe, timestamp)` uniquely identifies a bar; bars of the
/// same symbol and timeframe form a totally ordered sequence by timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Vendor symbol, verbatim.
    pub symbol: String,
    /// Bar cadence.
    pub timeframe: Timeframe,
    /// UTC open instant of the bar.
    pub timestamp: DateTime<Utc>,
    /// Opening price.
    pub open: Decimal,
    /// Highest traded price.
    pub high: Decimal,
    /// Lowest traded price.
    pub low: Decimal,
    /// Closing price.
    pub close: Decimal,
    /// Traded volume.
    pub volume: u64,
    /// Split/dividend-adjusted close, when the vendor supplies one.
    pub adjusted_close: Option<Decimal>,
    /// Volume-weighted average price, when available.
    pub vwap: Option<Decimal>,
    /// Trade count inside the bar, when available.
    pub trade_count: Option<u64>,
    /// Originating provider name.
    pub provider: String,
}

impl Bar {
    /// Build a bar with the mandatory OHLCV fields set.
    #[must_use]
    pub fn new(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: u64,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            adjusted_close: None,
            vwap: None,
            trade_count: None,
            provider: provider.into(),
        }
    }

    /// Validate the OHLC shape invariant:
    /// `low <= min(open, close)` and `high >= max(open, close)`.
    ///
    /// # Errors
    /// Returns `MareaError::Data` describing the violated bound.
    pub fn validate(&self) -> Result<(), MareaError> {
        if self.high < self.low {
            return Err(MareaError::Data(format!(
                "{} bar at {}: high {} below low {}",
                self.symbol, self.timestamp, self.high, self.low
            )));
        }
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        if self.low > body_low || self.high < body_high {
            return Err(MareaError::Data(format!(
                "{} bar at {}: range [{}, {}] does not contain open/close [{}, {}]",
                self.symbol, self.timestamp, self.low, self.high, body_low, body_high
            )));
        }
        Ok(())
    }
}
