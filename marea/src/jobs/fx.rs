//! FX cross-rate maintenance over an EUR-basis rate source.
//!
//! One external call per cycle fetches EUR-based rates for the configured
//! currency set; the full N-by-N cross matrix is derived mathematically and
//! written through to the durable store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{info, warn};

use marea_core::{FxStore, RateSource};
use marea_types::{FxRate, MareaError};

/// Currencies maintained by default.
pub const DEFAULT_CURRENCIES: [&str; 6] = ["EUR", "USD", "GBP", "CHF", "HKD", "JPY"];

/// How stale the newest stored rate may be before startup refreshes it.
pub const STARTUP_MAX_AGE: Duration = Duration::from_secs(3600);

const RATE_DECIMALS: u32 = 8;

/// Maintains the durable cross-rate table and answers conversions.
pub struct FxRateMaintainer {
    source: Arc<dyn RateSource>,
    store: Arc<dyn FxStore>,
    currencies: Vec<String>,
}

impl FxRateMaintainer {
    /// Maintainer over the default currency set.
    #[must_use]
    pub fn new(source: Arc<dyn RateSource>, store: Arc<dyn FxStore>) -> Self {
        Self::with_currencies(
            source,
            store,
            DEFAULT_CURRENCIES.iter().map(ToString::to_string).collect(),
        )
    }

    /// Maintainer over a custom currency set.
    #[must_use]
    pub fn with_currencies(
        source: Arc<dyn RateSource>,
        store: Arc<dyn FxStore>,
        currencies: Vec<String>,
    ) -> Self {
        Self {
            source,
            store,
            currencies,
        }
    }

    /// Cross rate from EUR-basis rates: `base/quote = EUR/quote ÷ EUR/base`,
    /// quantized to 8 decimal places.
    #[must_use]
    pub fn cross_rate(
        eur_rates: &HashMap<String, Decimal>,
        base: &str,
        quote: &str,
    ) -> Option<Decimal> {
        if base == quote {
            return Some(Decimal::ONE);
        }
        let eur_base = *eur_rates.get(base)?;
        let eur_quote = *eur_rates.get(quote)?;
        if eur_base.is_zero() {
            return None;
        }
        Some(
            (eur_quote / eur_base)
                .round_dp_with_strategy(RATE_DECIMALS, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    /// Run one full cycle: fetch EUR rates once, derive every pair, upsert.
    ///
    /// Returns the number of pairs written.
    ///
    /// # Errors
    /// Propagates the source fetch failure or a store write failure.
    pub async fn update_all_rates(&self) -> Result<usize, MareaError> {
        let quote_currencies: Vec<String> = self
            .currencies
            .iter()
            .filter(|c| *c != "EUR")
            .cloned()
            .collect();
        let mut eur_rates = self.source.fetch_eur_rates(&quote_currencies).await?;
        eur_rates.insert("EUR".to_string(), Decimal::ONE);

        let fetched_at = Utc::now();
        let mut rates = Vec::with_capacity(self.currencies.len() * self.currencies.len());
        for base in &self.currencies {
            for quote in &self.currencies {
                match Self::cross_rate(&eur_rates, base, quote) {
                    Some(rate) => rates.push(FxRate {
                        base: base.clone(),
                        quote: quote.clone(),
                        rate,
                        source: self.source.name().to_string(),
                        fetched_at,
                    }),
                    None => {
                        warn!(%base, %quote, "missing EUR basis, skipping pair");
                    }
                }
            }
        }

        let written = self.store.upsert_rates(&rates).await?;
        info!(
            written,
            source = self.source.name(),
            "exchange rates updated from one EUR-basis fetch"
        );
        Ok(written)
    }

    /// Startup freshness gate: run one synchronous cycle when the store is
    /// empty or its newest rate is older than `max_age`.
    ///
    /// Returns whether a cycle ran.
    ///
    /// # Errors
    /// Propagates store read failures and, when a refresh is needed, the
    /// cycle's own failure.
    pub async fn ensure_fresh(&self, max_age: Duration) -> Result<bool, MareaError> {
        let newest = self.store.newest_fetched_at().await?;
        let stale = match newest {
            None => true,
            Some(at) => Utc::now()
                .signed_duration_since(at)
                .to_std()
                .is_ok_and(|age| age > max_age),
        };
        if stale {
            info!("FX rates missing or stale, running startup refresh");
            self.update_all_rates().await?;
        } else {
            info!("FX rates are fresh, skipping startup refresh");
        }
        Ok(stale)
    }

    /// Look up a stored cross rate. Identity pairs answer without store
    /// access.
    ///
    /// # Errors
    /// `NotFound` when the pair is not in the store.
    pub async fn rate(&self, base: &str, quote: &str) -> Result<Decimal, MareaError> {
        if base == quote {
            return Ok(Decimal::ONE);
        }
        self.store
            .rate(base, quote)
            .await?
            .map(|r| r.rate)
            .ok_or_else(|| MareaError::not_found(format!("rate {base}/{quote}")))
    }

    /// Convert an amount between currencies using the stored table.
    ///
    /// # Errors
    /// `NotFound` when the pair is not in the store.
    pub async fn convert(
        &self,
        amount: Decimal,
        from: &str,
        to: &str,
    ) -> Result<Decimal, MareaError> {
        if from == to {
            return Ok(amount);
        }
        let rate = self.rate(from, to).await?;
        Ok(amount * rate)
    }
}
