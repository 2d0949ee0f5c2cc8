use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Capacity and expiry policy of one in-process tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierConfig {
    /// Maximum number of entries held by the tier
    pub capacity: usize,

    /// Time-to-live for entries, `None` keeps entries until evicted
    pub ttl: Option<Duration>,
}

impl TierConfig {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self { capacity, ttl }
    }
}

/// Engine-wide configuration.
///
/// # Default Values
/// - `target_hit_rate`: 0.97
/// - `hot`: 1 000 entries, no TTL
/// - `warm`: 10 000 entries, 1 hour
/// - `predictive`: 1 000 entries, 10 minutes
/// - `compressed`: 5 000 entries, 24 hours
/// - `small_value_threshold` / `large_value_threshold`: 1 KiB / 10 KiB
/// - `optimizer_interval` / `prefetch_interval`: 5 minutes / 60 seconds
/// - `access_window`: 24 hours
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Hit rate below which the optimizer starts resizing the hot tier
    pub target_hit_rate: f64,

    pub hot: TierConfig,
    pub warm: TierConfig,
    pub predictive: TierConfig,
    pub compressed: TierConfig,

    /// Hard ceiling for optimizer-driven hot tier growth
    pub hot_max_capacity: usize,

    /// Multiplier applied to the hot tier capacity on each resize
    pub hot_growth_factor: f64,

    /// Average hot-tier probe latency at which a full hot tier counts as
    /// thrashing. An uncontended probe takes about a microsecond, so the
    /// default is only reached when callers queue on the tier lock.
    pub hot_thrash_latency: Duration,

    /// TTL used for the distributed tier when `set` is called without one
    pub distributed_ttl: Duration,

    /// Serialized values below this size also go to the hot and warm tiers
    pub small_value_threshold: usize,

    /// Serialized values above this size also go to the compressed tier
    pub large_value_threshold: usize,

    /// Minimum trigram similarity for fuzzy key matches
    pub similarity_threshold: f64,

    pub optimizer_interval: Duration,
    pub prefetch_interval: Duration,

    /// Retention of per-key access timestamps
    pub access_window: Duration,

    /// Maximum number of keys the access tracker follows
    pub max_tracked_keys: usize,

    /// How long a prediction result is reused
    pub prediction_ttl: Duration,

    /// Keys accessed within this window trigger predictions in a prefetch cycle
    pub prefetch_lookback: Duration,

    /// Maximum number of trigger keys sampled per prefetch cycle
    pub prefetch_sample_size: usize,

    /// Predictions requested per trigger key
    pub prefetch_limit: usize,

    /// Candidates must score strictly above this confidence to be prefetched
    pub prefetch_confidence: f64,

    /// Size of each per-tier latency ring buffer
    pub latency_samples: usize,

    /// Capacity of the raw key -> normalized key cache
    pub normalization_cache_size: usize,

    /// Maximum number of keys kept per similarity bucket
    pub max_bucket_keys: usize,

    /// Upper bound on any single distributed backend call
    pub backend_timeout: Duration,

    /// Namespace prepended to every distributed tier key
    pub key_prefix: String,

    /// zstd level for the compressed tier
    pub compression_level: i32,

    /// Spawn the optimizer and prefetch loops at engine construction
    pub enable_background_tasks: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            target_hit_rate: 0.97,
            hot: TierConfig::new(1_000, None),
            warm: TierConfig::new(10_000, Some(Duration::from_secs(3600))),
            predictive: TierConfig::new(1_000, Some(Duration::from_secs(600))),
            compressed: TierConfig::new(5_000, Some(Duration::from_secs(24 * 3600))),
            hot_max_capacity: 10_000,
            hot_growth_factor: 1.5,
            hot_thrash_latency: Duration::from_micros(50),
            distributed_ttl: Duration::from_secs(3600),
            small_value_threshold: 1024,
            large_value_threshold: 10 * 1024,
            similarity_threshold: 0.8,
            optimizer_interval: Duration::from_secs(300),
            prefetch_interval: Duration::from_secs(60),
            access_window: Duration::from_secs(24 * 3600),
            max_tracked_keys: 10_000,
            prediction_ttl: Duration::from_secs(300),
            prefetch_lookback: Duration::from_secs(300),
            prefetch_sample_size: 100,
            prefetch_limit: 10,
            prefetch_confidence: 0.5,
            latency_samples: 1000,
            normalization_cache_size: 10_000,
            max_bucket_keys: 256,
            backend_timeout: Duration::from_secs(2),
            key_prefix: String::new(),
            compression_level: 3,
            enable_background_tasks: true,
        }
    }
}

impl CacheConfig {
    /// Load configuration from a JSON file. Omitted fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, CacheError> {
        let data = std::fs::read_to_string(path)?;
        let config: CacheConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), CacheError> {
        let fail = |msg: String| Err(CacheError::Configuration(msg));

        if !(self.target_hit_rate > 0.0 && self.target_hit_rate <= 1.0) {
            return fail(format!(
                "target_hit_rate must be in (0, 1], got {}",
                self.target_hit_rate
            ));
        }
        for (name, tier) in [
            ("hot", &self.hot),
            ("warm", &self.warm),
            ("predictive", &self.predictive),
            ("compressed", &self.compressed),
        ] {
            if tier.capacity == 0 {
                return fail(format!("{name} tier capacity must be non-zero"));
            }
        }
        if self.hot_max_capacity < self.hot.capacity {
            return fail("hot_max_capacity must not be below the hot tier capacity".to_string());
        }
        if self.small_value_threshold >= self.large_value_threshold {
            return fail(format!(
                "small_value_threshold ({}) must be below large_value_threshold ({})",
                self.small_value_threshold, self.large_value_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return fail("similarity_threshold must be within [0, 1]".to_string());
        }
        if self.optimizer_interval.is_zero() || self.prefetch_interval.is_zero() {
            return fail("background loop intervals must be non-zero".to_string());
        }
        if self.backend_timeout.is_zero() {
            return fail("backend_timeout must be a finite, non-zero duration".to_string());
        }
        if self.latency_samples == 0 || self.normalization_cache_size == 0 {
            return fail(
                "latency_samples and normalization_cache_size must be non-zero".to_string(),
            );
        }
        if self.max_tracked_keys == 0 || self.max_bucket_keys == 0 {
            return fail("max_tracked_keys and max_bucket_keys must be non-zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = CacheConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.target_hit_rate, 0.97);
        assert_eq!(cfg.small_value_threshold, 1024);
        assert_eq!(cfg.large_value_threshold, 10240);
        assert_eq!(cfg.hot.ttl, None);
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let cfg = CacheConfig {
            small_value_threshold: 4096,
            large_value_threshold: 1024,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(CacheError::Configuration(_))));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut cfg = CacheConfig::default();
        cfg.warm.capacity = 0;
        assert!(matches!(cfg.validate(), Err(CacheError::Configuration(_))));
    }
}
