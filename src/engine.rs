//! The cache engine: key normalization, tiered lookup, access tracking and
//! the two background maintenance loops.

use crate::cache::distributed::{DistributedBackend, DistributedTier};
use crate::cache::tiered::TieredStore;
use crate::cache::{Tier, TierStats};
use crate::codec::CacheValue;
use crate::compression::{Compression, ZstdCompression};
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::metrics::{CacheMetrics, MetricsSnapshot};
use crate::normalize::Normalizer;
use crate::prefetch::{AccessPatternTracker, Clock, SystemClock, TrackerConfig};
use crate::warming::{CacheWarmer, OptimizerReport, WarmingReport};
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Multi-tier cache shared by every subsystem of a process.
///
/// Construct it once at startup with [`CacheEngine::init`] or
/// [`CacheEngine::builder`], share it behind an `Arc`, and call
/// [`CacheEngine::shutdown`] before exit.
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tiercache::{CacheConfig, CacheEngine, InMemoryBackend};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), tiercache::CacheError> {
/// let engine: CacheEngine<String> =
///     CacheEngine::init(CacheConfig::default(), Arc::new(InMemoryBackend::new()))?;
///
/// engine
///     .set("User Profile?b=2&a=1", "alice".to_string(), Some(Duration::from_secs(60)))
///     .await?;
/// let name = engine.get("user_profile?a=1&b=2", String::new()).await;
/// assert_eq!(name, "alice");
///
/// engine.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct CacheEngine<V> {
    config: CacheConfig,
    store: Arc<TieredStore<V>>,
    normalizer: Arc<Normalizer>,
    tracker: Arc<AccessPatternTracker>,
    metrics: Arc<CacheMetrics>,
    warmer: Arc<CacheWarmer<V>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

/// Step-by-step construction of a [`CacheEngine`].
pub struct CacheEngineBuilder {
    config: CacheConfig,
    backend: Option<Arc<dyn DistributedBackend>>,
    clock: Arc<dyn Clock>,
    compression: Option<Arc<dyn Compression>>,
}

impl Default for CacheEngineBuilder {
    fn default() -> Self {
        Self {
            config: CacheConfig::default(),
            backend: None,
            clock: Arc::new(SystemClock),
            compression: None,
        }
    }
}

impl CacheEngineBuilder {
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn DistributedBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Time source for access tracking, [`SystemClock`] by default
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Codec for the compressed tier, zstd at `compression_level` by default
    pub fn compression(mut self, compression: Arc<dyn Compression>) -> Self {
        self.compression = Some(compression);
        self
    }

    pub fn build<V: CacheValue>(self) -> Result<CacheEngine<V>, CacheError> {
        let config = self.config;
        config.validate()?;

        let backend = self.backend.ok_or_else(|| {
            CacheError::Configuration("no distributed backend configured".to_string())
        })?;

        let runtime = if config.enable_background_tasks {
            Some(Handle::try_current().map_err(|e| {
                CacheError::Configuration(format!(
                    "background tasks need a Tokio runtime: {}",
                    e
                ))
            })?)
        } else {
            None
        };

        let cache_size = NonZeroUsize::new(config.normalization_cache_size).ok_or_else(|| {
            CacheError::Configuration("normalization_cache_size must be non-zero".to_string())
        })?;
        let normalizer = Arc::new(Normalizer::new(cache_size, config.max_bucket_keys));
        let metrics = Arc::new(CacheMetrics::new(config.latency_samples));
        let compression = self
            .compression
            .unwrap_or_else(|| Arc::new(ZstdCompression::with_level(config.compression_level)));

        let store = Arc::new(TieredStore::new(
            &config,
            DistributedTier::new(backend, config.backend_timeout, config.key_prefix.clone()),
            normalizer.clone(),
            compression,
            metrics.clone(),
        )?);

        let tracker = Arc::new(AccessPatternTracker::new(
            TrackerConfig {
                access_window: config.access_window,
                max_tracked_keys: config.max_tracked_keys,
                prediction_ttl: config.prediction_ttl,
            },
            self.clock,
        ));

        let warmer = Arc::new(CacheWarmer::new(
            &config,
            store.clone(),
            tracker.clone(),
            metrics.clone(),
        ));

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();
        if let Some(runtime) = runtime {
            tasks.push(spawn_optimizer_loop(
                &runtime,
                warmer.clone(),
                config.optimizer_interval,
                cancel.clone(),
            ));
            tasks.push(spawn_prefetch_loop(
                &runtime,
                warmer.clone(),
                config.prefetch_interval,
                cancel.clone(),
            ));
        }

        info!(
            target_hit_rate = config.target_hit_rate,
            hot_capacity = config.hot.capacity,
            background_tasks = config.enable_background_tasks,
            "Cache engine initialized"
        );

        Ok(CacheEngine {
            config,
            store,
            normalizer,
            tracker,
            metrics,
            warmer,
            cancel,
            tasks: Mutex::new(tasks),
            shut_down: AtomicBool::new(false),
        })
    }
}

fn spawn_optimizer_loop<V: CacheValue>(
    runtime: &Handle,
    warmer: Arc<CacheWarmer<V>>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(?period, "Optimizer loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    warmer.optimize_cycle().await;
                }
            }
        }
        info!("Optimizer loop stopped");
    })
}

fn spawn_prefetch_loop<V: CacheValue>(
    runtime: &Handle,
    warmer: Arc<CacheWarmer<V>>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(?period, "Prefetch loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    // Stops between fetches once cancelled
                    warmer.prefetch_cycle(&cancel).await;
                }
            }
        }
        info!("Prefetch loop stopped");
    })
}

impl<V: CacheValue> CacheEngine<V> {
    pub fn builder() -> CacheEngineBuilder {
        CacheEngineBuilder::default()
    }

    /// Build an engine with the system clock and zstd compression.
    pub fn init(
        config: CacheConfig,
        backend: Arc<dyn DistributedBackend>,
    ) -> Result<Self, CacheError> {
        Self::builder().config(config).backend(backend).build()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<AccessPatternTracker> {
        &self.tracker
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<(), CacheError> {
        if self.is_shut_down() {
            Err(CacheError::ShutDown)
        } else {
            Ok(())
        }
    }

    /// Canonical form of `key` as used for storage.
    pub async fn normalize_key(&self, key: &str) -> String {
        self.normalizer.normalize(key).await
    }

    /// Value cached under `key`, or `default` on a miss.
    pub async fn get(&self, key: &str, default: V) -> V {
        self.try_get(key).await.unwrap_or(default)
    }

    pub async fn try_get(&self, key: &str) -> Option<V> {
        let started = Instant::now();
        let key = self.normalizer.normalize(key).await;
        self.tracker.record_access(&key, self.tracker.now()).await;

        let hit = self.store.get(&key).await;
        self.metrics.record_get_latency(started.elapsed());
        hit.map(|lookup| lookup.value)
    }

    /// Cache `value` under `key`. `None` uses the configured distributed TTL.
    pub async fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.ensure_running()?;
        let key = self.normalizer.normalize(key).await;
        self.store.set(&key, value, ttl).await;
        Ok(())
    }

    /// Return the cached value or compute, cache and return it.
    pub async fn get_or_insert_with<F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        f: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: From<CacheError>,
    {
        if let Some(value) = self.try_get(key).await {
            return Ok(value);
        }
        let value = f().await?;
        self.set(key, value.clone(), ttl).await?;
        Ok(value)
    }

    /// Drop `key` from every in-process tier. Distributed copies expire
    /// through their TTL.
    pub async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.ensure_running()?;
        let key = self.normalizer.normalize(key).await;
        self.store.remove(&key).await;
        self.tracker.forget(&key).await;
        Ok(())
    }

    /// Empty the in-process tiers and forget all access history.
    pub async fn clear_all(&self) -> Result<(), CacheError> {
        self.ensure_running()?;
        self.store.clear().await;
        self.tracker.clear().await;
        self.normalizer.clear().await;
        info!("Cleared all in-process tiers");
        Ok(())
    }

    pub async fn resident_tiers(&self, key: &str) -> Vec<Tier> {
        let key = self.normalizer.normalize(key).await;
        self.store.resident_tiers(&key).await
    }

    pub async fn tier_stats(&self) -> Vec<TierStats> {
        self.store.tier_stats().await
    }

    pub async fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot(
            self.store.tier_sizes().await,
            self.store.hot_capacity().await,
        )
    }

    pub async fn reset_metrics(&self) {
        self.metrics.reset().await;
    }

    /// One optimizer pass, as run by the background loop.
    pub async fn run_optimizer_cycle(&self) -> OptimizerReport {
        self.warmer.optimize_cycle().await
    }

    /// One prefetch pass, as run by the background loop.
    pub async fn run_prefetch_cycle(&self) -> WarmingReport {
        self.warmer.prefetch_cycle(&self.cancel).await
    }

    /// Stop the background loops, wait for in-flight work and release the
    /// distributed backend. Later calls are no-ops.
    pub async fn shutdown(&self) -> Result<(), CacheError> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        self.store.close().await?;
        info!("Cache engine shut down");
        Ok(())
    }
}

impl<V> Drop for CacheEngine<V> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
