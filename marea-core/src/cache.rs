//! Shared key-value cache abstraction with TTL and pub/sub.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::warn;

use marea_types::Quote;

/// TTL for daily rate-limit counters: a day plus an hour of buffer.
const DAILY_COUNTER_TTL: Duration = Duration::from_secs(25 * 3600);

/// Abstract key-value cache used by adapters, gates, and collectors.
///
/// Implementations may be an in-process map (tests, single-node deployments)
/// or an external cache (production). The contract requires only eventual
/// consistency and a monotonically advancing clock for TTL expiry; writes are
/// last-writer-wins and best-effort.
#[async_trait]
pub trait SharedCache: Send + Sync {
    /// Look up a raw value.
    async fn get(&self, key: &str) -> Option<String>;

    /// Store a raw value, optionally bounded by a TTL. Idempotent.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>);

    /// Look up several keys at once; missing keys are absent from the map.
    async fn get_multi(&self, keys: &[String]) -> HashMap<String, String>;

    /// Atomically increment a counter key, applying `ttl` on first write.
    async fn incr(&self, key: &str, ttl: Option<Duration>) -> i64;

    /// Publish a message on a named channel.
    async fn publish(&self, channel: &str, message: &str);

    /// Subscribe to a named channel.
    async fn subscribe(&self, channel: &str) -> tokio::sync::broadcast::Receiver<String>;

    /// Cache a quote under `quote:SYMBOL` with the given TTL.
    async fn set_quote(&self, symbol: &str, quote: &Quote, ttl: Duration) {
        match serde_json::to_string(quote) {
            Ok(json) => {
                self.set(&quote_key(symbol), &json, Some(ttl)).await;
            }
            Err(e) => warn!(symbol, error = %e, "failed to serialize quote for cache"),
        }
    }

    /// Read a cached quote back, if present and still fresh.
    async fn get_cached_quote(&self, symbol: &str) -> Option<Quote> {
        let raw = self.get(&quote_key(symbol)).await?;
        match serde_json::from_str(&raw) {
            Ok(quote) => Some(quote),
            Err(e) => {
                warn!(symbol, error = %e, "dropping undecodable cached quote");
                None
            }
        }
    }

    /// Read several cached quotes; missing or stale symbols are absent.
    async fn get_cached_quotes(&self, symbols: &[String]) -> HashMap<String, Quote> {
        let keys: Vec<String> = symbols.iter().map(|s| quote_key(s)).collect();
        let raw = self.get_multi(&keys).await;
        let mut out = HashMap::new();
        for symbol in symbols {
            if let Some(json) = raw.get(&quote_key(symbol)) {
                if let Ok(quote) = serde_json::from_str::<Quote>(json) {
                    out.insert(symbol.clone(), quote);
                }
            }
        }
        out
    }

    /// Increment the daily request counter for a provider.
    ///
    /// Keys are `ratelimit:provider:YYYY-MM-DD` with a 25 h TTL so yesterday's
    /// counter expires on its own shortly after midnight.
    async fn incr_daily_count(&self, provider: &str, today: NaiveDate) -> i64 {
        self.incr(&daily_counter_key(provider, today), Some(DAILY_COUNTER_TTL))
            .await
    }

    /// Read the daily request counter for a provider without touching it.
    async fn daily_count(&self, provider: &str, today: NaiveDate) -> i64 {
        self.get(&daily_counter_key(provider, today))
            .await
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
}

fn quote_key(symbol: &str) -> String {
    format!("quote:{}", symbol.to_uppercase())
}

fn daily_counter_key(provider: &str, today: NaiveDate) -> String {
    format!("ratelimit:{provider}:{}", today.format("%Y-%m-%d"))
}
