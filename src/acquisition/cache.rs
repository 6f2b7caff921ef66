//! Shared key-value cache with per-key expiry.
//!
//! Backs peer reputation, the P2P search cache and import-failure
//! deduplication. Deployments may point this at an external cache; the
//! in-process implementation is used by default.

use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use moka::Expiry;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[async_trait]
pub trait SharedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value`, replacing any previous entry. `None` means no expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Reset the expiry of an existing key. Returns false if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Store `value` only if the key is absent. Returns true if it was stored.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Drop expired entries, returning how many were removed. Caches that
    /// expire entries on their own can keep the default.
    async fn prune_expired(&self) -> Result<usize> {
        Ok(0)
    }
}

/// Upper bound on entries held in process; the least used go first.
const DEFAULT_CAPACITY: u64 = 100_000;

#[derive(Clone)]
struct CacheEntry {
    value: String,
    ttl: Option<Duration>,
    /// Deadline on the runtime clock, checked on every read.
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: &str, ttl: Option<Duration>, now: Instant) -> Self {
        Self {
            value: value.to_string(),
            ttl,
            expires_at: ttl.map(|ttl| now + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Per-entry time to live for moka.
struct EntryExpiry;

impl Expiry<String, CacheEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: std::time::Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// In-process cache on top of moka. Moka evicts by size and age; readers
/// also compare against the runtime clock so expiry follows tokio time.
pub struct InMemoryCache {
    entries: Cache<String, CacheEntry>,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(max_entries: u64) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(max_entries.max(1))
                .expire_after(EntryExpiry)
                .build(),
        }
    }

    /// Live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SharedCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let Some(entry) = self.entries.get(key).await else {
            return Ok(None);
        };
        if entry.is_expired(Instant::now()) {
            self.entries.invalidate(key).await;
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.entries
            .insert(key.to_string(), CacheEntry::new(value, ttl, Instant::now()))
            .await;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let result = self
            .entries
            .entry_by_ref(key)
            .and_compute_with(|existing| {
                let op = match existing {
                    Some(entry) if !entry.value().is_expired(now) => {
                        Op::Put(CacheEntry::new(&entry.value().value, Some(ttl), now))
                    }
                    _ => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;
        Ok(matches!(result, CompResult::ReplacedWith(_)))
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let result = self
            .entries
            .entry_by_ref(key)
            .and_compute_with(|existing| {
                let op = match existing {
                    Some(entry) if !entry.value().is_expired(now) => Op::Nop,
                    _ => Op::Put(CacheEntry::new(value, Some(ttl), now)),
                };
                std::future::ready(op)
            })
            .await;
        Ok(matches!(
            result,
            CompResult::Inserted(_) | CompResult::ReplacedWith(_)
        ))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.invalidate(key).await;
        Ok(())
    }

    async fn prune_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let expired: Vec<Arc<String>> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key)
            .collect();
        for key in &expired {
            self.entries.invalidate(key.as_str()).await;
        }
        self.entries.run_pending_tasks().await;
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_set_get_and_expiry() {
        let cache = InMemoryCache::new();
        cache
            .set("k", "v", Some(Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_if_absent_respects_live_entries() {
        let cache = InMemoryCache::new();
        let ttl = Duration::from_secs(30);
        assert!(cache.set_if_absent("dedup", "1", ttl).await.unwrap());
        assert!(!cache.set_if_absent("dedup", "1", ttl).await.unwrap());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cache.set_if_absent("dedup", "1", ttl).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_extends_existing_only() {
        let cache = InMemoryCache::new();
        cache.set("k", "v", None).await.unwrap();
        assert!(cache.expire("k", Duration::from_secs(5)).await.unwrap());
        assert!(!cache.expire("missing", Duration::from_secs(5)).await.unwrap());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_expired() {
        let cache = InMemoryCache::new();
        cache
            .set("short", "v", Some(Duration::from_secs(1)))
            .await
            .unwrap();
        cache.set("forever", "v", None).await.unwrap();
        cache.delete("nothing").await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.prune_expired().await.unwrap(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_set_replaces_value_and_expiry() {
        let cache = InMemoryCache::new();
        cache
            .set("k", "old", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        cache.set("k", "new", None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("new".to_string()));
        assert!(!cache.set_if_absent("k", "other", Duration::from_secs(1)).await.unwrap());

        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.set_if_absent("k", "other", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_capacity_is_bounded() {
        let cache = InMemoryCache::with_capacity(10);
        for i in 0..100 {
            cache.set(&format!("k{}", i), "v", None).await.unwrap();
        }
        cache.entries.run_pending_tasks().await;
        assert!(cache.entries.entry_count() <= 10);
    }
}
