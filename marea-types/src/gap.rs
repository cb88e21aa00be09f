use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::market::Timeframe;

/// A contiguous interval of trading time for which no bar is stored though
/// one is expected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataGap {
    /// Symbol the gap belongs to.
    pub symbol: String,
    /// Cadence of the missing bars.
    pub timeframe: Timeframe,
    /// First missing instant (inclusive).
    pub start: DateTime<Utc>,
    /// Last missing instant (inclusive).
    pub end: DateTime<Utc>,
    /// Bars a complete series would hold over the interval.
    pub expected_bars: u32,
    /// Bars actually present (zero for a pure hole).
    pub actual_bars: u32,
}

impl DataGap {
    /// Bars that need backfilling.
    #[must_use]
    pub const fn missing_bars(&self) -> u32 {
        self.expected_bars.saturating_sub(self.actual_bars)
    }

    /// Wall-clock span of the gap.
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}
