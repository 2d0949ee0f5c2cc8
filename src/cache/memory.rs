use crate::cache::{CacheEntry, Tier, TierStats};
use crate::config::TierConfig;
use crate::error::CacheError;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Count-bounded in-process tier with least-recently-used eviction and an
/// optional TTL.
///
/// Each tier owns its own lock, so a slow operation on one tier never blocks
/// another.
pub struct LruMemoryTier<T> {
    tier: Tier,
    inner: RwLock<LruCache<String, CacheEntry<T>>>,
    ttl: Option<Duration>,
}

impl<T: Clone + Send + Sync> LruMemoryTier<T> {
    pub fn new(tier: Tier, config: &TierConfig) -> Result<Self, CacheError> {
        let capacity = NonZeroUsize::new(config.capacity).ok_or_else(|| {
            CacheError::Configuration(format!("{} tier capacity must be non-zero", tier))
        })?;

        Ok(Self {
            tier,
            inner: RwLock::new(LruCache::new(capacity)),
            ttl: config.ttl,
        })
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    fn effective_ttl(&self, requested: Option<Duration>) -> Option<Duration> {
        match (self.ttl, requested) {
            (Some(tier_ttl), Some(requested)) => Some(tier_ttl.min(requested)),
            (tier_ttl, None) => tier_ttl,
            (None, Some(_)) => None,
        }
    }

    /// Look up `key`, marking it most recently used. Expired entries are
    /// dropped and reported as a miss.
    pub async fn get(&self, key: &str) -> Option<CacheEntry<T>> {
        let now = Instant::now();
        let mut cache = self.inner.write().await;

        let expired = match cache.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.touch();
                return Some(entry.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            cache.pop(key);
            tracing::debug!(key = %key, tier = %self.tier, "Expired entry dropped");
        }
        None
    }

    /// Store `entry`, replacing any previous entry for the same key.
    ///
    /// Returns the key evicted to make room, if any.
    pub async fn insert(&self, mut entry: CacheEntry<T>) -> Option<String> {
        let now = Instant::now();
        entry.tier = self.tier;
        entry.last_accessed = now;
        entry.expires_at = self.effective_ttl(entry.ttl).map(|ttl| now + ttl);

        let mut cache = self.inner.write().await;

        if cache.len() >= cache.cap().get() && !cache.contains(&entry.key) {
            Self::purge_expired(&mut cache, now);
        }

        let key = entry.key.clone();
        match cache.push(key.clone(), entry) {
            Some((evicted, _)) if evicted != key => {
                tracing::debug!(
                    key = %evicted,
                    tier = %self.tier,
                    "Evicted least recently used entry"
                );
                Some(evicted)
            }
            _ => None,
        }
    }

    fn purge_expired(cache: &mut LruCache<String, CacheEntry<T>>, now: Instant) {
        let expired: Vec<String> = cache
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            cache.pop(&key);
        }
    }

    /// Whether a live entry exists, without affecting recency.
    pub async fn contains(&self, key: &str) -> bool {
        let cache = self.inner.read().await;
        cache
            .peek(key)
            .is_some_and(|entry| !entry.is_expired(Instant::now()))
    }

    /// Read an entry without touching recency or access counters.
    pub async fn peek(&self, key: &str) -> Option<CacheEntry<T>> {
        let cache = self.inner.read().await;
        cache
            .peek(key)
            .filter(|entry| !entry.is_expired(Instant::now()))
            .cloned()
    }

    pub async fn remove(&self, key: &str) -> Option<CacheEntry<T>> {
        let mut cache = self.inner.write().await;
        cache.pop(key)
    }

    pub async fn clear(&self) {
        let mut cache = self.inner.write().await;
        cache.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    pub async fn capacity(&self) -> usize {
        self.inner.read().await.cap().get()
    }

    /// Change the capacity. Shrinking evicts least recently used entries.
    pub async fn resize(&self, capacity: NonZeroUsize) {
        let mut cache = self.inner.write().await;
        cache.resize(capacity);
    }

    pub async fn stats(&self) -> TierStats {
        let cache = self.inner.read().await;
        TierStats {
            tier: self.tier,
            entry_count: cache.len(),
            capacity: cache.cap().get(),
            size_bytes: cache.iter().map(|(_, entry)| entry.size_bytes).sum(),
        }
    }
}
