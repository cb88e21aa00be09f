//! In-process implementation of the shared cache contract.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use tokio::sync::broadcast;
use tokio::time::Instant;

use marea_core::SharedCache;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn fresh(&self) -> bool {
        self.expires_at.is_none_or(|at| Instant::now() < at)
    }
}

/// Moka-backed in-process cache with per-entry TTL and local pub/sub.
///
/// Suitable for tests and single-node deployments; production deployments
/// back [`SharedCache`] with an external cache instead.
pub struct MemoryCache {
    entries: Cache<String, CacheEntry>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    counter_lock: tokio::sync::Mutex<()>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    /// Cache bounded at 100k entries.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Cache::builder().max_capacity(100_000).build(),
            channels: Mutex::new(HashMap::new()),
            counter_lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn live_entry(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.get(key).await?;
        if entry.fresh() {
            Some(entry)
        } else {
            self.entries.invalidate(key).await;
            None
        }
    }
}

#[async_trait]
impl SharedCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        self.live_entry(key).await.map(|e| e.value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) {
        let entry = CacheEntry {
            value: value.to_string(),
            expires_at: ttl.map(|t| Instant::now() + t),
        };
        self.entries.insert(key.to_string(), entry).await;
    }

    async fn get_multi(&self, keys: &[String]) -> HashMap<String, String> {
        let mut out = HashMap::new();
        for key in keys {
            if let Some(entry) = self.live_entry(key).await {
                out.insert(key.clone(), entry.value);
            }
        }
        out
    }

    async fn incr(&self, key: &str, ttl: Option<Duration>) -> i64 {
        let _atomic = self.counter_lock.lock().await;
        let (current, expires_at) = match self.live_entry(key).await {
            Some(entry) => (entry.value.parse().unwrap_or(0), entry.expires_at),
            None => (0, ttl.map(|t| Instant::now() + t)),
        };
        let next = current + 1;
        self.entries
            .insert(
                key.to_string(),
                CacheEntry {
                    value: next.to_string(),
                    expires_at,
                },
            )
            .await;
        next
    }

    async fn publish(&self, channel: &str, message: &str) {
        let tx = {
            let channels = self.channels.lock().expect("cache channel lock poisoned");
            channels.get(channel).cloned()
        };
        if let Some(tx) = tx {
            // No subscribers is not an error; the message is simply dropped.
            let _ = tx.send(message.to_string());
        }
    }

    async fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        let mut channels = self.channels.lock().expect("cache channel lock poisoned");
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_roundtrip_and_overwrite() {
        let cache = MemoryCache::new();
        cache.set("k", "v1", None).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v1"));
        // Last writer wins.
        cache.set("k", "v2", None).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v2"));
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expires_entries() {
        let cache = MemoryCache::new();
        cache.set("k", "v", Some(Duration::from_secs(60))).await;
        assert!(cache.get("k").await.is_some());
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn incr_counts_monotonically() {
        let cache = MemoryCache::new();
        assert_eq!(cache.incr("c", None).await, 1);
        assert_eq!(cache.incr("c", None).await, 2);
        assert_eq!(cache.incr("c", None).await, 3);
    }

    #[tokio::test]
    async fn pubsub_delivers_to_subscribers() {
        let cache = MemoryCache::new();
        let mut rx = cache.subscribe("quotes").await;
        cache.publish("quotes", "tick").await;
        assert_eq!(rx.recv().await.expect("message delivered"), "tick");
    }

    #[tokio::test]
    async fn get_multi_skips_missing_keys() {
        let cache = MemoryCache::new();
        cache.set("a", "1", None).await;
        let got = cache
            .get_multi(&["a".to_string(), "b".to_string()])
            .await;
        assert_eq!(got.len(), 1);
        assert_eq!(got.get("a").map(String::as_str), Some("1"));
    }
}
