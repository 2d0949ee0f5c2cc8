use crate::cache::Tier;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Weight of the newest sample in the retrieval latency moving average
const LATENCY_EMA_ALPHA: f64 = 0.1;

/// Process-lifetime counters for the cache engine.
///
/// Counters are lock-free; only the per-tier latency ring buffers take a
/// lock, one per tier.
#[derive(Debug)]
pub struct CacheMetrics {
    tier_hits: [AtomicU64; 5],
    misses: AtomicU64,
    fuzzy_hits: AtomicU64,
    prefetch_hits: AtomicU64,
    prefetch_misses: AtomicU64,
    evictions: AtomicU64,
    /// f64 bits
    compression_ratio: AtomicU64,
    /// f64 bits, milliseconds
    avg_latency_ms: AtomicU64,
    latency_samples: [Mutex<VecDeque<Duration>>; 5],
    max_samples: usize,
}

/// Point-in-time view of the engine's metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub hit_rate: f64,
    pub per_tier_hits: BTreeMap<Tier, u64>,
    pub misses: u64,
    pub total_requests: u64,
    pub fuzzy_hits: u64,
    pub prefetch_hits: u64,
    pub prefetch_misses: u64,
    pub evictions: u64,
    pub avg_latency_ms: f64,
    /// Compressed / uncompressed size of the most recent effective compression
    pub compression_ratio: f64,
    /// Entry counts of the in-process tiers
    pub tier_sizes: BTreeMap<Tier, usize>,
    pub hot_capacity: usize,
}

impl MetricsSnapshot {
    pub fn total_hits(&self) -> u64 {
        self.per_tier_hits.values().sum()
    }
}

impl CacheMetrics {
    pub fn new(max_samples: usize) -> Self {
        Self {
            tier_hits: Default::default(),
            misses: AtomicU64::new(0),
            fuzzy_hits: AtomicU64::new(0),
            prefetch_hits: AtomicU64::new(0),
            prefetch_misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            compression_ratio: AtomicU64::new(0f64.to_bits()),
            avg_latency_ms: AtomicU64::new(0f64.to_bits()),
            latency_samples: Default::default(),
            max_samples: max_samples.max(1),
        }
    }

    pub fn record_hit(&self, tier: Tier) {
        self.tier_hits[tier.index()].fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        metrics::increment_counter!("tiercache_hits_total", "tier" => tier.as_str());
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        metrics::increment_counter!("tiercache_misses_total");
    }

    pub fn record_fuzzy_hit(&self) {
        self.fuzzy_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prefetch_hit(&self) {
        self.prefetch_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prefetch_miss(&self) {
        self.prefetch_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self, tier: Tier) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        metrics::increment_counter!("tiercache_evictions_total", "tier" => tier.as_str());
        #[cfg(not(feature = "metrics"))]
        let _ = tier;
    }

    pub fn record_compression_ratio(&self, ratio: f64) {
        self.compression_ratio
            .store(ratio.to_bits(), Ordering::Relaxed);
    }

    /// Fold an end-to-end `get` latency into the moving average.
    pub fn record_get_latency(&self, latency: Duration) {
        let sample = latency.as_secs_f64() * 1000.0;
        let _ = self
            .avg_latency_ms
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                let current = f64::from_bits(bits);
                let next = if current == 0.0 {
                    sample
                } else {
                    LATENCY_EMA_ALPHA * sample + (1.0 - LATENCY_EMA_ALPHA) * current
                };
                Some(next.to_bits())
            });
        #[cfg(feature = "metrics")]
        metrics::histogram!("tiercache_get_latency_seconds", latency.as_secs_f64());
    }

    /// Keep the latency of one tier probe, dropping the oldest sample when
    /// the ring buffer is full.
    pub async fn record_tier_latency(&self, tier: Tier, latency: Duration) {
        let mut samples = self.latency_samples[tier.index()].lock().await;
        if samples.len() >= self.max_samples {
            samples.pop_front();
        }
        samples.push_back(latency);
    }

    pub async fn average_tier_latency(&self, tier: Tier) -> Option<Duration> {
        let samples = self.latency_samples[tier.index()].lock().await;
        if samples.is_empty() {
            return None;
        }
        let total: Duration = samples.iter().sum();
        Some(total / samples.len() as u32)
    }

    pub fn hits(&self, tier: Tier) -> u64 {
        self.tier_hits[tier.index()].load(Ordering::Relaxed)
    }

    pub fn total_hits(&self) -> u64 {
        Tier::ALL.iter().map(|tier| self.hits(*tier)).sum()
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Σ tier hits / Σ (tier hits + misses), `None` before the first lookup.
    pub fn hit_rate(&self) -> Option<f64> {
        let hits = self.total_hits();
        let total = hits + self.misses();
        (total > 0).then(|| hits as f64 / total as f64)
    }

    pub fn snapshot(
        &self,
        tier_sizes: BTreeMap<Tier, usize>,
        hot_capacity: usize,
    ) -> MetricsSnapshot {
        let per_tier_hits: BTreeMap<Tier, u64> =
            Tier::ALL.iter().map(|tier| (*tier, self.hits(*tier))).collect();
        let misses = self.misses();
        let total_requests = per_tier_hits.values().sum::<u64>() + misses;

        MetricsSnapshot {
            hit_rate: self.hit_rate().unwrap_or(0.0),
            per_tier_hits,
            misses,
            total_requests,
            fuzzy_hits: self.fuzzy_hits.load(Ordering::Relaxed),
            prefetch_hits: self.prefetch_hits.load(Ordering::Relaxed),
            prefetch_misses: self.prefetch_misses.load(Ordering::Relaxed),
            evictions: self.evictions(),
            avg_latency_ms: f64::from_bits(self.avg_latency_ms.load(Ordering::Relaxed)),
            compression_ratio: f64::from_bits(self.compression_ratio.load(Ordering::Relaxed)),
            tier_sizes,
            hot_capacity,
        }
    }

    pub async fn reset(&self) {
        for counter in self
            .tier_hits
            .iter()
            .chain([
                &self.misses,
                &self.fuzzy_hits,
                &self.prefetch_hits,
                &self.prefetch_misses,
                &self.evictions,
            ])
        {
            counter.store(0, Ordering::Relaxed);
        }
        self.compression_ratio.store(0f64.to_bits(), Ordering::Relaxed);
        self.avg_latency_ms.store(0f64.to_bits(), Ordering::Relaxed);
        for samples in &self.latency_samples {
            samples.lock().await.clear();
        }
    }
}
