use crate::cache::tiered::{PrefetchOutcome, TieredStore};
use crate::cache::Tier;
use crate::codec::CacheValue;
use crate::config::CacheConfig;
use crate::metrics::CacheMetrics;
use crate::prefetch::AccessPatternTracker;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Outcome of one prefetch pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmingReport {
    /// Recently accessed keys used as prediction triggers
    pub sampled_keys: usize,
    /// Distinct candidates above the confidence threshold
    pub candidates: usize,
    /// Keys placed into the predictive tier
    pub warmed: Vec<String>,
    pub already_resident: usize,
    /// Candidates the distributed tier did not have
    pub missed: usize,
    /// Stopped early on cancellation
    pub cancelled: bool,
}

/// Outcome of one optimizer pass
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerReport {
    pub hit_rate: Option<f64>,
    pub hot_average_latency: Option<Duration>,
    pub hot_capacity_before: usize,
    pub hot_capacity_after: usize,
}

impl OptimizerReport {
    pub fn resized(&self) -> bool {
        self.hot_capacity_after != self.hot_capacity_before
    }
}

#[derive(Debug, Clone)]
struct WarmingSettings {
    lookback: Duration,
    sample_size: usize,
    prediction_limit: usize,
    min_confidence: f64,
    target_hit_rate: f64,
    thrash_latency: Duration,
    growth_factor: f64,
    hot_max_capacity: usize,
}

impl From<&CacheConfig> for WarmingSettings {
    fn from(config: &CacheConfig) -> Self {
        Self {
            lookback: config.prefetch_lookback,
            sample_size: config.prefetch_sample_size,
            prediction_limit: config.prefetch_limit,
            min_confidence: config.prefetch_confidence,
            target_hit_rate: config.target_hit_rate,
            thrash_latency: config.hot_thrash_latency,
            growth_factor: config.hot_growth_factor,
            hot_max_capacity: config.hot_max_capacity,
        }
    }
}

/// Drives the predictive tier and hot-tier sizing from observed behavior.
pub struct CacheWarmer<V> {
    store: Arc<TieredStore<V>>,
    tracker: Arc<AccessPatternTracker>,
    metrics: Arc<CacheMetrics>,
    settings: WarmingSettings,
}

impl<V: CacheValue> CacheWarmer<V> {
    pub fn new(
        config: &CacheConfig,
        store: Arc<TieredStore<V>>,
        tracker: Arc<AccessPatternTracker>,
        metrics: Arc<CacheMetrics>,
    ) -> Self {
        Self {
            store,
            tracker,
            metrics,
            settings: WarmingSettings::from(config),
        }
    }

    /// Predict likely next accesses from recently used keys and pull them
    /// from the distributed tier into the predictive tier.
    ///
    /// Fetches run one at a time; cancellation is checked between them.
    pub async fn prefetch_cycle(&self, cancel: &CancellationToken) -> WarmingReport {
        let mut report = WarmingReport::default();
        let triggers = self
            .tracker
            .recent_keys(self.settings.lookback, self.settings.sample_size)
            .await;
        report.sampled_keys = triggers.len();

        let mut seen = HashSet::new();
        'triggers: for trigger in triggers {
            let predictions = self
                .tracker
                .predict_next(&trigger, self.settings.prediction_limit)
                .await;

            for prediction in predictions {
                if prediction.confidence <= self.settings.min_confidence
                    || !seen.insert(prediction.key.clone())
                {
                    continue;
                }
                report.candidates += 1;

                if cancel.is_cancelled() {
                    report.cancelled = true;
                    break 'triggers;
                }

                match self.store.prefetch(&prediction.key).await {
                    PrefetchOutcome::Warmed => {
                        tracing::debug!(
                            key = %prediction.key,
                            confidence = prediction.confidence,
                            trigger = %trigger,
                            "Warmed predicted key"
                        );
                        report.warmed.push(prediction.key);
                    }
                    PrefetchOutcome::AlreadyResident => report.already_resident += 1,
                    PrefetchOutcome::Missed => report.missed += 1,
                }
            }
        }

        if !report.warmed.is_empty() {
            tracing::info!(
                warmed = report.warmed.len(),
                missed = report.missed,
                "Prefetch cycle complete"
            );
        }
        report
    }

    /// Grow the hot tier when the hit rate is below target and the hot tier
    /// shows signs of thrashing.
    pub async fn optimize_cycle(&self) -> OptimizerReport {
        let capacity = self.store.hot_capacity().await;
        let hit_rate = self.metrics.hit_rate();
        let hot_average_latency = self.metrics.average_tier_latency(Tier::Hot).await;
        let mut report = OptimizerReport {
            hit_rate,
            hot_average_latency,
            hot_capacity_before: capacity,
            hot_capacity_after: capacity,
        };

        let below_target = hit_rate.is_some_and(|rate| rate < self.settings.target_hit_rate);
        if !below_target {
            return report;
        }

        let thrashing = self.store.hot_is_full().await
            && hot_average_latency.is_some_and(|latency| latency >= self.settings.thrash_latency);
        if !thrashing {
            tracing::debug!(
                hit_rate = ?hit_rate,
                "Hit rate below target, hot tier not thrashing"
            );
            return report;
        }

        let grown = ((capacity as f64) * self.settings.growth_factor).ceil() as usize;
        let target = grown.max(capacity + 1).min(self.settings.hot_max_capacity);
        if target <= capacity {
            tracing::debug!(capacity, "Hot tier already at its ceiling");
            return report;
        }

        if let Some(new_capacity) = NonZeroUsize::new(target) {
            self.store.resize_hot(new_capacity).await;
            report.hot_capacity_after = target;
            tracing::info!(from = capacity, to = target, "Grew hot tier");
        }
        report
    }
}
