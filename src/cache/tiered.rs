//! Five-tier store with promotion on hit and size-routed writes.
//!
//! Lookup order is Hot → Warm → Distributed → Predictive → Compressed,
//! followed by a single round of fuzzy matching. A hit in a slower tier is
//! copied into the next faster one. Writes always go to the distributed tier;
//! small values also land in Hot and Warm, large values in Compressed.
//!
//! Failures of the distributed backend, of serialization and of
//! decompression degrade to a miss for the affected tier only.

use crate::cache::distributed::DistributedTier;
use crate::cache::memory::LruMemoryTier;
use crate::cache::{CacheEntry, Tier, TierStats};
use crate::codec::CacheValue;
use crate::compression::Compression;
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::metrics::CacheMetrics;
use crate::normalize::Normalizer;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A successful lookup.
#[derive(Debug, Clone)]
pub struct Lookup<V> {
    pub value: V,
    /// Tier the value was found in
    pub tier: Tier,
    /// Found through a similar key rather than the requested one
    pub fuzzy: bool,
}

/// Outcome of warming one key into the predictive tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchOutcome {
    Warmed,
    AlreadyResident,
    Missed,
}

pub struct TieredStore<V> {
    hot: LruMemoryTier<V>,
    warm: LruMemoryTier<V>,
    predictive: LruMemoryTier<V>,
    compressed: LruMemoryTier<Bytes>,
    distributed: DistributedTier,
    normalizer: Arc<Normalizer>,
    compression: Arc<dyn Compression>,
    metrics: Arc<CacheMetrics>,
    small_value_threshold: usize,
    large_value_threshold: usize,
    similarity_threshold: f64,
    default_ttl: Duration,
}

impl<V: CacheValue> TieredStore<V> {
    pub fn new(
        config: &CacheConfig,
        distributed: DistributedTier,
        normalizer: Arc<Normalizer>,
        compression: Arc<dyn Compression>,
        metrics: Arc<CacheMetrics>,
    ) -> Result<Self, CacheError> {
        Ok(Self {
            hot: LruMemoryTier::new(Tier::Hot, &config.hot)?,
            warm: LruMemoryTier::new(Tier::Warm, &config.warm)?,
            predictive: LruMemoryTier::new(Tier::Predictive, &config.predictive)?,
            compressed: LruMemoryTier::new(Tier::Compressed, &config.compressed)?,
            distributed,
            normalizer,
            compression,
            metrics,
            small_value_threshold: config.small_value_threshold,
            large_value_threshold: config.large_value_threshold,
            similarity_threshold: config.similarity_threshold,
            default_ttl: config.distributed_ttl,
        })
    }

    /// Look up a normalized key, recording exactly one hit or miss.
    pub async fn get(&self, key: &str) -> Option<Lookup<V>> {
        if let Some((value, tier)) = self.lookup_tiers(key).await {
            self.metrics.record_hit(tier);
            return Some(Lookup {
                value,
                tier,
                fuzzy: false,
            });
        }

        // One level of fuzzy matching; candidates are never searched fuzzily themselves
        for candidate in self
            .normalizer
            .find_similar(key, self.similarity_threshold)
            .await
        {
            if let Some((value, tier)) = self.lookup_tiers(&candidate).await {
                debug!(key = %key, similar = %candidate, tier = %tier, "Fuzzy match");
                self.store_in_process(key, value.clone(), 0, None).await;
                self.normalizer.register(key).await;
                self.metrics.record_hit(tier);
                self.metrics.record_fuzzy_hit();
                return Some(Lookup {
                    value,
                    tier,
                    fuzzy: true,
                });
            }
        }

        self.metrics.record_miss();
        None
    }

    async fn lookup_tiers(&self, key: &str) -> Option<(V, Tier)> {
        let started = Instant::now();
        let hot = self.hot.get(key).await;
        self.metrics
            .record_tier_latency(Tier::Hot, started.elapsed())
            .await;
        if let Some(entry) = hot {
            return Some((entry.value, Tier::Hot));
        }

        let started = Instant::now();
        let warm = self.warm.get(key).await;
        self.metrics
            .record_tier_latency(Tier::Warm, started.elapsed())
            .await;
        if let Some(entry) = warm {
            self.promote(key, &entry.value, entry.size_bytes, Tier::Warm)
                .await;
            return Some((entry.value, Tier::Warm));
        }

        if let Some((value, size)) = self.lookup_distributed(key).await {
            self.promote(key, &value, size, Tier::Distributed).await;
            return Some((value, Tier::Distributed));
        }

        let started = Instant::now();
        let predictive = self.predictive.get(key).await;
        self.metrics
            .record_tier_latency(Tier::Predictive, started.elapsed())
            .await;
        if let Some(entry) = predictive {
            if entry.prefetched {
                self.metrics.record_prefetch_hit();
            }
            self.promote(key, &entry.value, entry.size_bytes, Tier::Predictive)
                .await;
            return Some((entry.value, Tier::Predictive));
        }

        if let Some((value, size)) = self.lookup_compressed(key).await {
            self.promote(key, &value, size, Tier::Compressed).await;
            return Some((value, Tier::Compressed));
        }

        None
    }

    /// Backend or decoding failures count as a miss for this tier only.
    async fn lookup_distributed(&self, key: &str) -> Option<(V, usize)> {
        let started = Instant::now();
        let result = self.distributed.get(key).await;
        self.metrics
            .record_tier_latency(Tier::Distributed, started.elapsed())
            .await;

        let bytes = match result {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(
                    key = %key,
                    error = %e,
                    "Distributed tier lookup failed, treating as miss"
                );
                return None;
            }
        };

        match V::from_bytes(&bytes) {
            Ok(value) => Some((value, bytes.len())),
            Err(e) => {
                warn!(key = %key, error = %e, "Could not decode distributed entry");
                None
            }
        }
    }

    /// Corrupt entries are reported as a miss and left in place.
    async fn lookup_compressed(&self, key: &str) -> Option<(V, usize)> {
        let started = Instant::now();
        let entry = self.compressed.get(key).await;
        self.metrics
            .record_tier_latency(Tier::Compressed, started.elapsed())
            .await;
        let entry = entry?;

        let raw = if entry.compressed {
            match self.compression.decompress(&entry.value) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(
                        key = %key,
                        error = %e,
                        "Compressed entry could not be decompressed"
                    );
                    return None;
                }
            }
        } else {
            entry.value.to_vec()
        };

        match V::from_bytes(&raw) {
            Ok(value) => Some((value, raw.len())),
            Err(e) => {
                warn!(key = %key, error = %e, "Could not decode compressed entry");
                None
            }
        }
    }

    async fn promote(&self, key: &str, value: &V, size_bytes: usize, from: Tier) {
        let Some(target) = from.promotion_target() else {
            return;
        };
        let entry = CacheEntry::new(key, value.clone(), size_bytes);
        let evicted = match target {
            Tier::Hot => self.hot.insert(entry).await,
            _ => self.warm.insert(entry).await,
        };
        if evicted.is_some() {
            self.metrics.record_eviction(target);
        }
        debug!(key = %key, from = %from, to = %target, "Promoted entry");
    }

    /// Hot ignores `ttl`; Warm keeps the shorter of `ttl` and its own.
    async fn store_in_process(
        &self,
        key: &str,
        value: V,
        size_bytes: usize,
        ttl: Option<Duration>,
    ) {
        let warm = CacheEntry::new(key, value.clone(), size_bytes).with_ttl(ttl);
        if self.warm.insert(warm).await.is_some() {
            self.metrics.record_eviction(Tier::Warm);
        }
        let hot = CacheEntry::new(key, value, size_bytes);
        if self.hot.insert(hot).await.is_some() {
            self.metrics.record_eviction(Tier::Hot);
        }
    }

    /// Write a value, routing it by serialized size.
    ///
    /// No tier failure aborts the write as a whole. In-process tiers the new
    /// value is not routed to lose their copy of `key`, so the last write wins.
    pub async fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.normalizer.register(key).await;

        let bytes = match value.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    key = %key,
                    error = %e,
                    "Serialization failed, writing in-process tiers only"
                );
                self.store_in_process(key, value, 0, Some(ttl)).await;
                self.compressed.remove(key).await;
                self.predictive.remove(key).await;
                return;
            }
        };
        let size = bytes.len();
        let in_process = size < self.small_value_threshold;
        let compressed = size > self.large_value_threshold;

        if in_process {
            self.store_in_process(key, value, size, Some(ttl)).await;
        }
        if compressed {
            self.store_compressed(key, &bytes, ttl).await;
        }

        if let Err(e) = self.distributed.set(key, bytes, ttl).await {
            warn!(key = %key, error = %e, "Distributed tier write skipped");
        }

        // Invalidate after the distributed write so later promotions see the new value
        if !in_process {
            self.hot.remove(key).await;
            self.warm.remove(key).await;
        }
        if !compressed {
            self.compressed.remove(key).await;
        }
        self.predictive.remove(key).await;
    }

    async fn store_compressed(&self, key: &str, raw: &Bytes, ttl: Duration) {
        let (payload, compressed) = match self.compression.compress(raw) {
            Ok(out) if out.len() < raw.len() => {
                self.metrics
                    .record_compression_ratio(out.len() as f64 / raw.len() as f64);
                (Bytes::from(out), true)
            }
            Ok(_) => (raw.clone(), false),
            Err(e) => {
                warn!(key = %key, error = %e, "Compression failed, storing raw bytes");
                (raw.clone(), false)
            }
        };

        let entry = CacheEntry::new(key, payload, raw.len())
            .with_ttl(Some(ttl))
            .with_compressed(compressed);
        if self.compressed.insert(entry).await.is_some() {
            self.metrics.record_eviction(Tier::Compressed);
        }
    }

    pub async fn predictive_contains(&self, key: &str) -> bool {
        self.predictive.contains(key).await
    }

    /// Fetch `key` from the distributed tier into the predictive tier.
    pub async fn prefetch(&self, key: &str) -> PrefetchOutcome {
        if self.predictive.contains(key).await {
            return PrefetchOutcome::AlreadyResident;
        }

        let Some((value, size)) = self.lookup_distributed(key).await else {
            self.metrics.record_prefetch_miss();
            return PrefetchOutcome::Missed;
        };

        let entry = CacheEntry::new(key, value, size).with_prefetched(true);
        if self.predictive.insert(entry).await.is_some() {
            self.metrics.record_eviction(Tier::Predictive);
        }
        debug!(key = %key, "Prefetched into predictive tier");
        PrefetchOutcome::Warmed
    }

    /// In-process tiers currently holding `key`.
    pub async fn resident_tiers(&self, key: &str) -> Vec<Tier> {
        let mut tiers = Vec::new();
        if self.hot.contains(key).await {
            tiers.push(Tier::Hot);
        }
        if self.warm.contains(key).await {
            tiers.push(Tier::Warm);
        }
        if self.predictive.contains(key).await {
            tiers.push(Tier::Predictive);
        }
        if self.compressed.contains(key).await {
            tiers.push(Tier::Compressed);
        }
        tiers
    }

    /// Drop `key` from every in-process tier.
    pub async fn remove(&self, key: &str) {
        self.hot.remove(key).await;
        self.warm.remove(key).await;
        self.predictive.remove(key).await;
        self.compressed.remove(key).await;
        self.normalizer.forget(key).await;
    }

    pub async fn clear(&self) {
        self.hot.clear().await;
        self.warm.clear().await;
        self.predictive.clear().await;
        self.compressed.clear().await;
    }

    pub async fn hot_is_full(&self) -> bool {
        self.hot.len().await >= self.hot.capacity().await
    }

    pub async fn hot_capacity(&self) -> usize {
        self.hot.capacity().await
    }

    pub async fn resize_hot(&self, capacity: NonZeroUsize) {
        self.hot.resize(capacity).await;
    }

    pub async fn tier_stats(&self) -> Vec<TierStats> {
        vec![
            self.hot.stats().await,
            self.warm.stats().await,
            self.predictive.stats().await,
            self.compressed.stats().await,
        ]
    }

    pub async fn tier_sizes(&self) -> BTreeMap<Tier, usize> {
        self.tier_stats()
            .await
            .into_iter()
            .map(|stats| (stats.tier, stats.entry_count))
            .collect()
    }

    pub async fn close(&self) -> Result<(), CacheError> {
        self.distributed.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::distributed::{DistributedBackend, InMemoryBackend};
    use crate::compression::ZstdCompression;
    use std::collections::HashMap;

    type Fixture<V> = (TieredStore<V>, Arc<InMemoryBackend>, Arc<CacheMetrics>);

    fn store_with<V: CacheValue>(config: CacheConfig) -> Fixture<V> {
        let backend = Arc::new(InMemoryBackend::new());
        let metrics = Arc::new(CacheMetrics::new(100));
        let store = TieredStore::new(
            &config,
            DistributedTier::new(backend.clone(), Duration::from_secs(1), String::new()),
            Arc::new(Normalizer::new(NonZeroUsize::new(128).unwrap(), 32)),
            Arc::new(ZstdCompression::default()),
            metrics.clone(),
        )
        .unwrap();
        (store, backend, metrics)
    }

    fn store() -> Fixture<String> {
        store_with(CacheConfig::default())
    }

    #[tokio::test]
    async fn test_small_value_lands_in_hot_and_warm() {
        let (store, backend, _) = store();
        store.set("k", "small".to_string(), None).await;

        assert_eq!(store.resident_tiers("k").await, vec![Tier::Hot, Tier::Warm]);
        assert_eq!(backend.len().await, 1);
        assert_eq!(store.get("k").await.unwrap().tier, Tier::Hot);
    }

    #[tokio::test]
    async fn test_medium_value_only_reaches_distributed() {
        let (store, _, _) = store();
        store.set("k", "m".repeat(4096), None).await;
        assert!(store.resident_tiers("k").await.is_empty());

        let hit = store.get("k").await.unwrap();
        assert_eq!(hit.tier, Tier::Distributed);
        // Distributed hits are copied into Warm, never straight into Hot
        assert_eq!(store.resident_tiers("k").await, vec![Tier::Warm]);

        assert_eq!(store.get("k").await.unwrap().tier, Tier::Warm);
        assert_eq!(store.resident_tiers("k").await, vec![Tier::Hot, Tier::Warm]);
    }

    #[tokio::test]
    async fn test_large_value_is_compressed() {
        let (store, _, metrics) = store();
        store.set("k", "x".repeat(32 * 1024), None).await;

        assert_eq!(store.resident_tiers("k").await, vec![Tier::Compressed]);
        let ratio = metrics.snapshot(BTreeMap::new(), 0).compression_ratio;
        assert!(ratio > 0.0 && ratio < 1.0);

        let entry = store.compressed.peek("k").await.unwrap();
        assert!(entry.compressed);
        assert!(entry.value.len() < entry.size_bytes);
    }

    #[tokio::test]
    async fn test_incompressible_value_stored_raw() {
        let backend = Arc::new(InMemoryBackend::new());
        let metrics = Arc::new(CacheMetrics::new(100));
        let store: TieredStore<String> = TieredStore::new(
            &CacheConfig::default(),
            DistributedTier::new(backend, Duration::from_secs(1), String::new()),
            Arc::new(Normalizer::new(NonZeroUsize::new(16).unwrap(), 4)),
            Arc::new(crate::compression::NoCompression),
            metrics.clone(),
        )
        .unwrap();

        store.set("k", "y".repeat(20 * 1024), None).await;
        let entry = store.compressed.peek("k").await.unwrap();
        assert!(!entry.compressed);
        assert_eq!(metrics.snapshot(BTreeMap::new(), 0).compression_ratio, 0.0);
    }

    #[tokio::test]
    async fn test_corrupt_compressed_entry_is_a_miss_and_kept() {
        let (store, _, metrics) = store();
        let corrupt =
            CacheEntry::new("k", Bytes::from_static(b"garbage"), 64).with_compressed(true);
        store.compressed.insert(corrupt).await;

        assert!(store.get("k").await.is_none());
        assert_eq!(metrics.misses(), 1);
        assert!(store.compressed.contains("k").await);
    }

    #[tokio::test]
    async fn test_fuzzy_match_stores_under_requested_key() {
        let (store, _, metrics) = store();
        store
            .set("llm_response_weather_berlin", "sunny".to_string(), None)
            .await;

        let hit = store.get("llm_response_weather_berlim").await.unwrap();
        assert!(hit.fuzzy);
        assert_eq!(hit.value, "sunny");

        let direct = store.get("llm_response_weather_berlim").await.unwrap();
        assert!(!direct.fuzzy);
        assert_eq!(direct.tier, Tier::Hot);

        let snapshot = metrics.snapshot(BTreeMap::new(), 0);
        assert_eq!(snapshot.fuzzy_hits, 1);
        assert_eq!(snapshot.total_requests, 2);
    }

    #[tokio::test]
    async fn test_hot_eviction_counted() {
        let mut config = CacheConfig::default();
        config.hot.capacity = 2;
        let (store, _, metrics) = store_with(config);

        for key in ["a", "b", "c"] {
            store.set(key, key.to_string(), None).await;
        }
        assert_eq!(metrics.evictions(), 1);
        assert_eq!(store.resident_tiers("a").await, vec![Tier::Warm]);
    }

    #[tokio::test]
    async fn test_prefetch_places_value_in_predictive() {
        let (store, backend, metrics) = store();
        DistributedBackend::set(
            backend.as_ref(),
            b"report",
            "quarterly".to_string().to_bytes().unwrap(),
            Duration::from_secs(60),
        )
        .await
        .unwrap();

        assert_eq!(store.prefetch("report").await, PrefetchOutcome::Warmed);
        assert_eq!(store.prefetch("report").await, PrefetchOutcome::AlreadyResident);
        assert_eq!(store.prefetch("absent").await, PrefetchOutcome::Missed);
        assert!(store.predictive_contains("report").await);
        assert_eq!(metrics.snapshot(BTreeMap::new(), 0).prefetch_misses, 1);
    }

    #[tokio::test]
    async fn test_larger_overwrite_replaces_in_process_copy() {
        let (store, _, _) = store();
        store.set("k", "old".to_string(), None).await;
        store.set("k", "n".repeat(4096), None).await;

        assert!(store.resident_tiers("k").await.is_empty());
        let hit = store.get("k").await.unwrap();
        assert_eq!(hit.tier, Tier::Distributed);
        assert_eq!(hit.value, "n".repeat(4096));
    }

    #[tokio::test]
    async fn test_overwrite_after_promotion_serves_new_value() {
        let (store, _, _) = store();
        store.set("doc", "a".repeat(4096), None).await;
        assert_eq!(store.get("doc").await.unwrap().tier, Tier::Distributed);
        assert_eq!(store.resident_tiers("doc").await, vec![Tier::Warm]);

        store.set("doc", "b".repeat(4096), None).await;
        assert_eq!(store.get("doc").await.unwrap().value, "b".repeat(4096));
    }

    #[tokio::test]
    async fn test_overwrite_drops_stale_compressed_and_predictive_copies() {
        let (store, backend, _) = store();
        store.set("k", "x".repeat(32 * 1024), None).await;
        assert_eq!(store.prefetch("k").await, PrefetchOutcome::Warmed);
        assert_eq!(
            store.resident_tiers("k").await,
            vec![Tier::Predictive, Tier::Compressed]
        );

        store.set("k", "short".to_string(), None).await;
        assert_eq!(store.resident_tiers("k").await, vec![Tier::Hot, Tier::Warm]);

        // With the backend gone no older copy can surface
        DistributedBackend::close(backend.as_ref()).await.unwrap();
        store.hot.remove("k").await;
        store.warm.remove("k").await;
        assert!(store.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_unserializable_value_kept_in_process_only() {
        let (store, backend, metrics) =
            store_with::<HashMap<(u8, u8), u8>>(CacheConfig::default());
        let mut value = HashMap::new();
        value.insert((1, 2), 3);

        store.set("grid", value.clone(), None).await;

        assert_eq!(backend.len().await, 0);
        assert_eq!(store.resident_tiers("grid").await, vec![Tier::Hot, Tier::Warm]);
        let hit = store.get("grid").await.unwrap();
        assert_eq!(hit.tier, Tier::Hot);
        assert_eq!(hit.value, value);
        assert_eq!(metrics.snapshot(BTreeMap::new(), 0).per_tier_hits[&Tier::Hot], 1);
    }
}
