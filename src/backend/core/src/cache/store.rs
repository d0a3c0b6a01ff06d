//! Cache tier implementations.
//!
//! Three tiers, consulted fastest-first by the facade in `mod.rs`:
//! - **MemoryStore**: in-process map with TTL and LRU eviction
//! - **FileStore**: one JSON document per key, atomic replace, self-healing
//! - **RedisStore**: optional distributed tier
//!
//! Tier operations are deliberately infallible at the trait boundary: a
//! broken tier degrades to misses and log lines, never to caller-visible
//! errors.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use parking_lot::Mutex;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::util::unix_now;

// ═══════════════════════════════════════════════════════════════════════════════
// Stored Entry
// ═══════════════════════════════════════════════════════════════════════════════

/// A cached value with its lifetime bounds.
///
/// This struct is also the on-disk document of the file tier
/// (`{"value": ..., "created_at": ..., "expires_at": ...}` with unix-second
/// timestamps) and must round-trip exactly across process restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    pub value: serde_json::Value,
    pub created_at: f64,
    pub expires_at: f64,
}

impl StoredEntry {
    /// Create an entry expiring `ttl` from now.
    pub fn new(value: serde_json::Value, ttl: Duration) -> Self {
        let now = unix_now();
        Self {
            value,
            created_at: now,
            expires_at: now + ttl.as_secs_f64(),
        }
    }

    /// An expired entry must be treated as absent.
    pub fn is_expired(&self) -> bool {
        unix_now() > self.expires_at
    }

    /// Remaining lifetime, zero if already expired.
    pub fn remaining_ttl(&self) -> Duration {
        Duration::from_secs_f64((self.expires_at - unix_now()).max(0.0))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tier Store Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// A single cache tier.
#[async_trait]
pub trait TierStore: Send + Sync {
    /// Get a live entry, or `None`. Expired and corrupt entries are removed
    /// as a side effect of discovery.
    async fn get(&self, key: &str) -> Option<StoredEntry>;

    /// Store an entry. Best effort; failures are logged.
    async fn set(&self, key: &str, entry: StoredEntry);

    /// Remove an entry if present.
    async fn remove(&self, key: &str);

    /// Remove all entries.
    async fn clear(&self);

    /// Evict expired entries; returns how many were removed.
    async fn sweep(&self) -> u64;

    /// Tier name for logs and metrics.
    fn name(&self) -> &'static str;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Memory Tier
// ═══════════════════════════════════════════════════════════════════════════════

struct MemoryInner {
    entries: HashMap<String, StoredEntry>,
    /// Access order, least recent at the front
    lru: VecDeque<String>,
}

/// In-process tier with TTL expiry and an LRU cap on entry count.
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    max_items: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryStore {
    /// Create a memory tier holding at most `max_items` entries.
    pub fn new(max_items: usize) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                entries: HashMap::new(),
                lru: VecDeque::new(),
            }),
            max_items,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Current entry count.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the tier is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hit/miss/eviction counters.
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            entries: self.len() as u64,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn touch(inner: &mut MemoryInner, key: &str) {
        inner.lru.retain(|k| k != key);
        inner.lru.push_back(key.to_string());
    }

    /// Evict least-recently-accessed entries until back under the cap.
    fn evict_over_cap(&self, inner: &mut MemoryInner) {
        while inner.entries.len() > self.max_items {
            let Some(oldest) = inner.lru.pop_front() else {
                break;
            };
            if inner.entries.remove(&oldest).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                counter!("cache_evictions_total", "tier" => "memory").increment(1);
            }
        }
    }
}

#[async_trait]
impl TierStore for MemoryStore {
    async fn get(&self, key: &str) -> Option<StoredEntry> {
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(key) {
            Some(entry) => entry.is_expired(),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                counter!("cache_misses_total", "tier" => "memory").increment(1);
                return None;
            }
        };

        if expired {
            inner.entries.remove(key);
            inner.lru.retain(|k| k != key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            counter!("cache_misses_total", "tier" => "memory", "reason" => "expired")
                .increment(1);
            return None;
        }

        let entry = inner.entries.get(key)?.clone();
        Self::touch(&mut inner, key);

        self.hits.fetch_add(1, Ordering::Relaxed);
        counter!("cache_hits_total", "tier" => "memory").increment(1);
        Some(entry)
    }

    async fn set(&self, key: &str, entry: StoredEntry) {
        let mut inner = self.inner.lock();
        inner.entries.insert(key.to_string(), entry);
        Self::touch(&mut inner, key);
        self.evict_over_cap(&mut inner);
    }

    async fn remove(&self, key: &str) {
        let mut inner = self.inner.lock();
        inner.entries.remove(key);
        inner.lru.retain(|k| k != key);
    }

    async fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.lru.clear();
    }

    async fn sweep(&self) -> u64 {
        let mut inner = self.inner.lock();

        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(k, _)| k.clone())
            .collect();

        let removed = expired.len() as u64;
        for key in expired {
            inner.entries.remove(&key);
            inner.lru.retain(|k| k != &key);
        }

        self.evict_over_cap(&mut inner);

        if removed > 0 {
            debug!(removed, "Swept expired memory cache entries");
        }
        removed
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Counters for the memory tier.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// File Tier
// ═══════════════════════════════════════════════════════════════════════════════

/// Persistent tier: one JSON file per key under a configured directory.
///
/// Writes go through a temp file and an atomic rename; concurrent writers to
/// the same key race with last-write-wins semantics. Corrupt files are
/// deleted on discovery.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create a file tier rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!(dir = %dir.display(), error = %e, "Failed to create cache directory");
        }
        Self { dir }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    async fn remove_quietly(path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "Failed to remove cache file");
            }
        }
    }
}

#[async_trait]
impl TierStore for FileStore {
    async fn get(&self, key: &str) -> Option<StoredEntry> {
        let path = self.path_for(key);

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "Failed to read cache file");
                }
                counter!("cache_misses_total", "tier" => "file").increment(1);
                return None;
            }
        };

        let entry: StoredEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                // Self-healing: a corrupt entry is a miss and is deleted
                // as a side effect of discovery.
                warn!(path = %path.display(), error = %e, "Removing corrupt cache file");
                Self::remove_quietly(&path).await;
                counter!("cache_misses_total", "tier" => "file", "reason" => "corrupt")
                    .increment(1);
                return None;
            }
        };

        if entry.is_expired() {
            Self::remove_quietly(&path).await;
            counter!("cache_misses_total", "tier" => "file", "reason" => "expired")
                .increment(1);
            return None;
        }

        counter!("cache_hits_total", "tier" => "file").increment(1);
        Some(entry)
    }

    async fn set(&self, key: &str, entry: StoredEntry) {
        let path = self.path_for(key);
        let tmp = self.dir.join(format!("{key}.json.tmp"));

        let bytes = match serde_json::to_vec(&entry) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Failed to serialize cache entry");
                return;
            }
        };

        // Whole-file write then rename keeps readers from ever observing a
        // partially written document.
        if let Err(e) = tokio::fs::write(&tmp, &bytes).await {
            warn!(path = %tmp.display(), error = %e, "Failed to write cache file");
            return;
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            warn!(path = %path.display(), error = %e, "Failed to replace cache file");
            Self::remove_quietly(&tmp).await;
        }
    }

    async fn remove(&self, key: &str) {
        Self::remove_quietly(&self.path_for(key)).await;
    }

    async fn clear(&self) {
        let Ok(mut dir) = tokio::fs::read_dir(&self.dir).await else {
            return;
        };
        while let Ok(Some(item)) = dir.next_entry().await {
            let path = item.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                Self::remove_quietly(&path).await;
            }
        }
    }

    async fn sweep(&self) -> u64 {
        let mut removed = 0u64;

        let Ok(mut dir) = tokio::fs::read_dir(&self.dir).await else {
            return 0;
        };

        while let Ok(Some(item)) = dir.next_entry().await {
            let path = item.path();
            if !path.extension().map(|e| e == "json").unwrap_or(false) {
                continue;
            }

            let stale = match tokio::fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<StoredEntry>(&bytes) {
                    Ok(entry) => entry.is_expired(),
                    Err(_) => true, // corrupt
                },
                Err(_) => false, // racing reader/writer, leave it alone
            };

            if stale {
                Self::remove_quietly(&path).await;
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, "Swept stale file cache entries");
        }
        removed
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Remote Tier (Redis)
// ═══════════════════════════════════════════════════════════════════════════════

const REMOTE_KEY_PREFIX: &str = "cache:";

/// Optional distributed tier backed by Redis.
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    /// Create a remote tier. The connection is established lazily on first
    /// use; an unreachable server degrades to misses.
    pub fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self { client })
    }

    async fn conn(&self) -> Option<redis::aio::MultiplexedConnection> {
        match self.client.get_multiplexed_async_connection().await {
            Ok(conn) => Some(conn),
            Err(e) => {
                warn!(error = %e, "Failed to connect to remote cache");
                None
            }
        }
    }

    fn full_key(key: &str) -> String {
        format!("{REMOTE_KEY_PREFIX}{key}")
    }
}

#[async_trait]
impl TierStore for RedisStore {
    async fn get(&self, key: &str) -> Option<StoredEntry> {
        let mut conn = self.conn().await?;
        let full_key = Self::full_key(key);

        let bytes: Option<Vec<u8>> = match conn.get(&full_key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Remote cache read failed");
                return None;
            }
        };

        let entry: StoredEntry = serde_json::from_slice(&bytes?).ok()?;
        if entry.is_expired() {
            let _: std::result::Result<(), _> = conn.del(&full_key).await;
            return None;
        }

        counter!("cache_hits_total", "tier" => "remote").increment(1);
        Some(entry)
    }

    async fn set(&self, key: &str, entry: StoredEntry) {
        let Some(mut conn) = self.conn().await else {
            return;
        };
        let Ok(bytes) = serde_json::to_vec(&entry) else {
            return;
        };
        let ttl_secs = entry.remaining_ttl().as_secs().max(1);

        if let Err(e) = conn
            .set_ex::<_, _, ()>(Self::full_key(key), bytes, ttl_secs)
            .await
        {
            warn!(error = %e, "Remote cache write failed");
        }
    }

    async fn remove(&self, key: &str) {
        if let Some(mut conn) = self.conn().await {
            let _: std::result::Result<(), _> = conn.del(Self::full_key(key)).await;
        }
    }

    async fn clear(&self) {
        let Some(mut conn) = self.conn().await else {
            return;
        };

        let pattern = format!("{REMOTE_KEY_PREFIX}*");
        let mut cursor: u64 = 0;
        loop {
            let scanned: std::result::Result<(u64, Vec<String>), _> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await;

            let (next, keys) = match scanned {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "Remote cache clear failed");
                    return;
                }
            };

            if !keys.is_empty() {
                let _: std::result::Result<(), _> = conn.del(&keys).await;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }
    }

    async fn sweep(&self) -> u64 {
        // Redis expires entries server-side via SET EX.
        0
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_expiry() {
        let live = StoredEntry::new(json!("v"), Duration::from_secs(60));
        assert!(!live.is_expired());
        assert!(live.remaining_ttl() > Duration::from_secs(50));

        let dead = StoredEntry {
            value: json!("v"),
            created_at: unix_now() - 10.0,
            expires_at: unix_now() - 5.0,
        };
        assert!(dead.is_expired());
        assert_eq!(dead.remaining_ttl(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_memory_set_get_remove() {
        let store = MemoryStore::new(10);

        store
            .set("k1", StoredEntry::new(json!({"a": 1}), Duration::from_secs(60)))
            .await;

        let entry = store.get("k1").await.unwrap();
        assert_eq!(entry.value, json!({"a": 1}));

        store.remove("k1").await;
        assert!(store.get("k1").await.is_none());
    }

    #[tokio::test]
    async fn test_memory_expired_entry_is_absent() {
        let store = MemoryStore::new(10);
        store
            .set("k", StoredEntry::new(json!("v"), Duration::from_millis(10)))
            .await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.get("k").await.is_none());
        assert_eq!(store.len(), 0); // removed on discovery
    }

    #[tokio::test]
    async fn test_memory_lru_eviction() {
        let store = MemoryStore::new(3);

        for i in 0..3 {
            store
                .set(&format!("k{i}"), StoredEntry::new(json!(i), Duration::from_secs(60)))
                .await;
        }

        // Touch k0 so k1 becomes the least recently used
        store.get("k0").await.unwrap();

        store
            .set("k3", StoredEntry::new(json!(3), Duration::from_secs(60)))
            .await;

        assert_eq!(store.len(), 3);
        assert!(store.get("k1").await.is_none());
        assert!(store.get("k0").await.is_some());
        assert!(store.get("k3").await.is_some());
        assert!(store.stats().evictions >= 1);
    }

    #[tokio::test]
    async fn test_memory_sweep_removes_expired() {
        let store = MemoryStore::new(10);
        store
            .set("short", StoredEntry::new(json!(1), Duration::from_millis(5)))
            .await;
        store
            .set("long", StoredEntry::new(json!(2), Duration::from_secs(60)))
            .await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        let removed = store.sweep().await;

        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
        assert!(store.get("long").await.is_some());
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        let entry = StoredEntry::new(json!({"name": "report.pdf"}), Duration::from_secs(60));
        store.set("abc123", entry).await;

        let read = store.get("abc123").await.unwrap();
        assert_eq!(read.value, json!({"name": "report.pdf"}));

        // A second store over the same directory sees the entry
        let other = FileStore::new(dir.path());
        assert!(other.get("abc123").await.is_some());
    }

    #[tokio::test]
    async fn test_file_corrupt_entry_self_heals() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        let path = dir.path().join("bad.json");
        tokio::fs::write(&path, b"{ not json").await.unwrap();

        assert!(store.get("bad").await.is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_file_expired_entry_deleted_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        store
            .set("k", StoredEntry::new(json!("v"), Duration::from_millis(5)))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(store.get("k").await.is_none());
        assert!(!dir.path().join("k.json").exists());
    }

    #[tokio::test]
    async fn test_file_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        store
            .set("stale", StoredEntry::new(json!(1), Duration::from_millis(5)))
            .await;
        store
            .set("fresh", StoredEntry::new(json!(2), Duration::from_secs(60)))
            .await;
        tokio::fs::write(dir.path().join("junk.json"), b"???")
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let removed = store.sweep().await;

        assert_eq!(removed, 2); // stale + corrupt
        assert!(store.get("fresh").await.is_some());
    }

    #[tokio::test]
    async fn test_file_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        store
            .set("a", StoredEntry::new(json!(1), Duration::from_secs(60)))
            .await;
        store
            .set("b", StoredEntry::new(json!(2), Duration::from_secs(60)))
            .await;

        store.clear().await;
        assert!(store.get("a").await.is_none());
        assert!(store.get("b").await.is_none());
    }
}
