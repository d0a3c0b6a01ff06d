//! Tiered caching for upstream API responses.
//!
//! Reads consult the tiers fastest-first (memory, then file, then an
//! optional remote tier), promoting hits back into the faster tiers. Writes
//! fan out to every configured tier, each with its own TTL — the fast tier
//! short, the slow tiers longer, trading staleness risk for fewer round
//! trips. A background sweeper evicts expired entries and enforces the
//! memory tier's LRU cap.
//!
//! # Usage
//!
//! ```rust,ignore
//! use satchel_core::cache::{KeyBuilder, TieredCache};
//!
//! let cache = Arc::new(TieredCache::new(settings)?);
//! cache.start_sweeper();
//!
//! let key = KeyBuilder::new("file_info").arg(file_id).build();
//! if let Some(value) = cache.get(&key).await {
//!     return Ok(value);
//! }
//! let value = fetch_from_upstream().await?;
//! cache.set(&key, value.clone()).await;
//! ```

pub mod key;
pub mod store;

pub use key::KeyBuilder;
pub use store::{FileStore, MemoryStats, MemoryStore, RedisStore, StoredEntry, TierStore};

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::CacheSettings;
use crate::error::Result;
use crate::util::rand_unit;

/// Fraction of sweep cycles that also sweep the file tier.
const FILE_SWEEP_PROBABILITY: f64 = 0.1;

/// Per-tier TTL overrides for a single write.
#[derive(Debug, Clone, Copy, Default)]
pub struct TierTtls {
    pub memory: Option<Duration>,
    pub file: Option<Duration>,
    pub remote: Option<Duration>,
}

/// Multi-tier cache: memory, file, optional remote.
pub struct TieredCache {
    memory: MemoryStore,
    file: FileStore,
    remote: Option<RedisStore>,
    settings: CacheSettings,
    shutdown: CancellationToken,
}

impl TieredCache {
    /// Create a tiered cache. The remote tier is enabled only when a Redis
    /// URL is configured.
    pub fn new(settings: CacheSettings) -> Result<Self> {
        let remote = settings
            .redis_url
            .as_deref()
            .map(RedisStore::new)
            .transpose()?;

        Ok(Self {
            memory: MemoryStore::new(settings.max_memory_items),
            file: FileStore::new(&settings.cache_dir),
            remote,
            settings,
            shutdown: CancellationToken::new(),
        })
    }

    /// Spawn the background sweeper. Must be called from within a tokio
    /// runtime; [`shutdown`](Self::shutdown) stops it.
    pub fn start_sweeper(self: &Arc<Self>) {
        let cache = Arc::clone(self);
        let token = self.shutdown.clone();
        let interval = self.settings.sweep_interval;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        cache.sweep_cycle().await;
                    }
                }
            }
            debug!("Cache sweeper stopped");
        });
    }

    /// One sweep cycle: always the memory tier, the file tier with low
    /// probability to bound directory I/O.
    pub async fn sweep_cycle(&self) {
        self.memory.sweep().await;
        if rand_unit() < FILE_SWEEP_PROBABILITY {
            self.file.sweep().await;
        }
    }

    /// Look up a value, consulting memory, then file, then remote.
    ///
    /// A hit in a slower tier is promoted into the faster tiers with those
    /// tiers' own TTLs before being returned.
    pub async fn get(&self, key: &str) -> Option<Value> {
        if let Some(entry) = self.memory.get(key).await {
            return Some(entry.value);
        }

        if let Some(entry) = self.file.get(key).await {
            self.memory
                .set(key, StoredEntry::new(entry.value.clone(), self.settings.memory_ttl))
                .await;
            return Some(entry.value);
        }

        if let Some(remote) = &self.remote {
            if let Some(entry) = remote.get(key).await {
                self.file
                    .set(key, StoredEntry::new(entry.value.clone(), self.settings.file_ttl))
                    .await;
                self.memory
                    .set(key, StoredEntry::new(entry.value.clone(), self.settings.memory_ttl))
                    .await;
                return Some(entry.value);
            }
        }

        None
    }

    /// Store a value in every configured tier with the default TTLs.
    pub async fn set(&self, key: &str, value: Value) {
        self.set_with_ttls(key, value, TierTtls::default()).await;
    }

    /// Store a value with per-tier TTL overrides.
    pub async fn set_with_ttls(&self, key: &str, value: Value, ttls: TierTtls) {
        let memory_ttl = ttls.memory.unwrap_or(self.settings.memory_ttl);
        let file_ttl = ttls.file.unwrap_or(self.settings.file_ttl);
        let remote_ttl = ttls.remote.unwrap_or(self.settings.remote_ttl);

        self.memory
            .set(key, StoredEntry::new(value.clone(), memory_ttl))
            .await;
        self.file
            .set(key, StoredEntry::new(value.clone(), file_ttl))
            .await;
        if let Some(remote) = &self.remote {
            remote.set(key, StoredEntry::new(value, remote_ttl)).await;
        }
    }

    /// Remove a key from every tier.
    pub async fn invalidate(&self, key: &str) {
        self.memory.remove(key).await;
        self.file.remove(key).await;
        if let Some(remote) = &self.remote {
            remote.remove(key).await;
        }
    }

    /// Remove everything from every tier.
    pub async fn clear(&self) {
        self.memory.clear().await;
        self.file.clear().await;
        if let Some(remote) = &self.remote {
            remote.clear().await;
        }
    }

    /// Memory-tier counters.
    pub fn stats(&self) -> MemoryStats {
        self.memory.stats()
    }

    /// Stop the background sweeper.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(dir: &std::path::Path, memory_ttl: Duration, file_ttl: Duration) -> CacheSettings {
        CacheSettings {
            cache_dir: dir.to_path_buf(),
            memory_ttl,
            file_ttl,
            remote_ttl: Duration::from_secs(86400),
            max_memory_items: 100,
            sweep_interval: Duration::from_secs(60),
            redis_url: None,
        }
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TieredCache::new(settings(
            dir.path(),
            Duration::from_secs(60),
            Duration::from_secs(3600),
        ))
        .unwrap();

        cache.set("k", json!({"v": 1})).await;
        assert_eq!(cache.get("k").await, Some(json!({"v": 1})));
    }

    #[tokio::test]
    async fn test_absent_after_all_ttls_elapse() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TieredCache::new(settings(
            dir.path(),
            Duration::from_millis(10),
            Duration::from_millis(10),
        ))
        .unwrap();

        cache.set("k", json!("v")).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_file_tier_outlives_memory_tier() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TieredCache::new(settings(
            dir.path(),
            Duration::from_millis(10),
            Duration::from_secs(3600),
        ))
        .unwrap();

        cache.set("k", json!("v1")).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Memory copy has expired; the longer-lived file copy still serves
        // the read and repopulates the memory tier.
        assert!(cache.memory.get("k").await.is_none());
        assert_eq!(cache.get("k").await, Some(json!("v1")));
        assert!(cache.memory.get("k").await.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_clears_all_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TieredCache::new(settings(
            dir.path(),
            Duration::from_secs(60),
            Duration::from_secs(3600),
        ))
        .unwrap();

        cache.set("k", json!("v")).await;
        cache.invalidate("k").await;

        assert_eq!(cache.get("k").await, None);
        assert!(cache.file.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TieredCache::new(settings(
            dir.path(),
            Duration::from_secs(60),
            Duration::from_secs(3600),
        ))
        .unwrap();

        cache.set("a", json!(1)).await;
        cache.set("b", json!(2)).await;
        cache.clear().await;

        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.get("b").await, None);
    }

    #[tokio::test]
    async fn test_per_write_ttl_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TieredCache::new(settings(
            dir.path(),
            Duration::from_secs(60),
            Duration::from_secs(3600),
        ))
        .unwrap();

        cache
            .set_with_ttls(
                "k",
                json!("v"),
                TierTtls {
                    memory: Some(Duration::from_millis(10)),
                    file: Some(Duration::from_millis(10)),
                    remote: None,
                },
            )
            .await;

        assert_eq!(cache.get("k").await, Some(json!("v")));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path(), Duration::from_secs(60), Duration::from_secs(3600));

        {
            let cache = TieredCache::new(s.clone()).unwrap();
            cache.set("k", json!({"persisted": true})).await;
        }

        let reopened = TieredCache::new(s).unwrap();
        assert_eq!(reopened.get("k").await, Some(json!({"persisted": true})));
    }
}
