use core::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Market segment a symbol trades in.
///
/// Kinds map one-to-one with trading calendars and drive provider grouping
/// together with [`DataType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum MarketKind {
    /// US-listed equities.
    UsStock,
    /// European equities.
    EuStock,
    /// Asian equities.
    AsiaStock,
    /// Cryptocurrencies (24/7).
    Crypto,
    /// Foreign exchange.
    Forex,
    /// Commodities.
    Commodity,
    /// Indices.
    Index,
    /// Exchange-traded funds.
    Etf,
    /// US-listed options.
    UsOption,
}

impl MarketKind {
    /// Stable snake-case identifier for logs and errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UsStock => "us_stock",
            Self::EuStock => "eu_stock",
            Self::AsiaStock => "asia_stock",
            Self::Crypto => "crypto",
            Self::Forex => "forex",
            Self::Commodity => "commodity",
            Self::Index => "index",
            Self::Etf => "etf",
            Self::UsOption => "us_option",
        }
    }
}

impl fmt::Display for MarketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of data a provider can supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum DataType {
    /// Point-in-time snapshot quote.
    Quote,
    /// Historical OHLCV bars.
    Ohlcv,
    /// Individual trades.
    Trade,
    /// Order book depth.
    OrderBook,
    /// News articles.
    News,
    /// Fundamentals.
    Fundamentals,
    /// Options data.
    Options,
}

impl DataType {
    /// Stable snake-case identifier for logs and errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::Ohlcv => "ohlcv",
            Self::Trade => "trade",
            Self::OrderBook => "order_book",
            Self::News => "news",
            Self::Fundamentals => "fundamentals",
            Self::Options => "options",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geographic region tag carried by universe entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    /// United States.
    Us,
    /// United Kingdom.
    Uk,
    /// Continental Europe.
    Eu,
    /// Asia-Pacific.
    Asia,
    /// No single home market.
    Global,
}

/// Bar cadence for historical series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    /// One minute.
    M1,
    /// Five minutes.
    M5,
    /// Fifteen minutes.
    M15,
    /// Thirty minutes.
    M30,
    /// One hour.
    H1,
    /// Four hours.
    H4,
    /// One day.
    D1,
    /// One week.
    W1,
    /// One calendar month (approximated as 30 days where a fixed span is needed).
    Mo1,
}

impl Timeframe {
    /// Nominal duration of a single bar.
    #[must_use]
    pub const fn duration(self) -> Duration {
        match self {
            Self::M1 => Duration::from_secs(60),
            Self::M5 => Duration::from_secs(5 * 60),
            Self::M15 => Duration::from_secs(15 * 60),
            Self::M30 => Duration::from_secs(30 * 60),
            Self::H1 => Duration::from_secs(3600),
            Self::H4 => Duration::from_secs(4 * 3600),
            Self::D1 => Duration::from_secs(86_400),
            Self::W1 => Duration::from_secs(7 * 86_400),
            Self::Mo1 => Duration::from_secs(30 * 86_400),
        }
    }

    /// Bar length in minutes, for intraday expected-count estimates.
    #[must_use]
    pub const fn minutes(self) -> u32 {
        (self.duration().as_secs() / 60) as u32
    }

    /// Whether this cadence is daily or coarser.
    #[must_use]
    pub const fn is_daily_or_coarser(self) -> bool {
        matches!(self, Self::D1 | Self::W1 | Self::Mo1)
    }

    /// Stable identifier used in store keys and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "1min",
            Self::M5 => "5min",
            Self::M15 => "15min",
            Self::M30 => "30min",
            Self::H1 => "1hour",
            Self::H4 => "4hour",
            Self::D1 => "1day",
            Self::W1 => "1week",
            Self::Mo1 => "1month",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_minutes_match_duration() {
        assert_eq!(Timeframe::M5.minutes(), 5);
        assert_eq!(Timeframe::H4.minutes(), 240);
        assert_eq!(Timeframe::D1.minutes(), 1440);
    }

    #[test]
    fn daily_and_coarser_classification() {
        assert!(Timeframe::D1.is_daily_or_coarser());
        assert!(Timeframe::Mo1.is_daily_or_coarser());
        assert!(!Timeframe::H4.is_daily_or_coarser());
    }
}
