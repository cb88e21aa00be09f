use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One durable cross rate: `rate` units of `quote` per unit of `base`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FxRate {
    /// Base currency code.
    pub base: String,
    /// Quote currency code.
    pub quote: String,
    /// Exchange rate quantized to 8 decimal places.
    pub rate: Decimal,
    /// Upstream source tag (e.g. "frankfurter").
    pub source: String,
    /// UTC instant the underlying EUR-basis fetch happened.
    pub fetched_at: DateTime<Utc>,
}
