//! Access-pattern tracking and next-access prediction.
//!
//! Every lookup records a timestamp for its normalized key. Keys that are
//! accessed often and at a regular cadence become prefetch candidates once
//! their next access is due.

use chrono::{DateTime, TimeZone, Utc};
use lru::LruCache;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Upper bound on timestamps retained per key
const MAX_ACCESSES_PER_KEY: usize = 1000;
const FREQUENCY_WINDOW_MS: i64 = 3_600_000;
/// Accesses per hour are divided by this to get the frequency score
const FREQUENCY_DIVISOR: f64 = 60.0;
/// Fraction of the mean interval that must elapse before a key is due
const DUE_FRACTION: f64 = 0.8;

/// Source of wall-clock time for the tracker.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(duration_millis(by), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.millis.load(Ordering::SeqCst))
            .single()
            .unwrap_or_default()
    }
}

fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

fn millis_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> i64 {
    later.signed_duration_since(earlier).num_milliseconds()
}

/// A key expected to be accessed soon.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub key: String,
    /// In `[0, 1]`
    pub confidence: f64,
}

#[derive(Debug)]
struct CachedPrediction {
    computed_at: DateTime<Utc>,
    predictions: Vec<Prediction>,
}

/// `windows` is ordered by recording order, which stands in for last
/// access time; timestamps delivered late do not reorder it.
#[derive(Debug)]
struct TrackerState {
    windows: LruCache<String, VecDeque<DateTime<Utc>>>,
    predictions: HashMap<(String, usize), CachedPrediction>,
}

impl TrackerState {
    fn new() -> Self {
        Self {
            windows: LruCache::unbounded(),
            predictions: HashMap::new(),
        }
    }
}

/// Settings for [`AccessPatternTracker`].
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub access_window: Duration,
    pub max_tracked_keys: usize,
    pub prediction_ttl: Duration,
}

pub struct AccessPatternTracker {
    state: RwLock<TrackerState>,
    clock: Arc<dyn Clock>,
    config: TrackerConfig,
}

impl AccessPatternTracker {
    pub fn new(config: TrackerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(TrackerState::new()),
            clock,
            config,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Append `timestamp` to the key's access window.
    pub async fn record_access(&self, key: &str, timestamp: DateTime<Utc>) {
        let retention = duration_millis(self.config.access_window);
        let mut state = self.state.write().await;

        let window = state
            .windows
            .get_or_insert_mut(key.to_string(), VecDeque::new);
        // Concurrent callers may deliver timestamps slightly out of order
        match window.back() {
            Some(last) if *last > timestamp => {
                let pos = window.partition_point(|t| *t <= timestamp);
                window.insert(pos, timestamp);
            }
            _ => window.push_back(timestamp),
        }

        let newest = window.back().copied().unwrap_or(timestamp);
        while let Some(oldest) = window.front() {
            if millis_between(*oldest, newest) > retention {
                window.pop_front();
            } else {
                break;
            }
        }
        while window.len() > MAX_ACCESSES_PER_KEY {
            window.pop_front();
        }

        if state.windows.len() > self.config.max_tracked_keys {
            if let Some((stalest, _)) = state.windows.pop_lru() {
                tracing::debug!(key = %stalest, "Dropping access window of stalest key");
            }
        }
    }

    /// Keys most likely to be accessed next, highest confidence first.
    /// `key` itself is never part of the result.
    pub async fn predict_next(&self, key: &str, limit: usize) -> Vec<Prediction> {
        let now = self.clock.now();
        let cache_key = (key.to_string(), limit);
        let prediction_ttl = duration_millis(self.config.prediction_ttl);

        {
            let state = self.state.read().await;
            if let Some(cached) = state.predictions.get(&cache_key) {
                if millis_between(cached.computed_at, now) < prediction_ttl {
                    return cached.predictions.clone();
                }
            }
        }

        let mut state = self.state.write().await;
        let retention = duration_millis(self.config.access_window);

        let mut predictions: Vec<Prediction> = state
            .windows
            .iter()
            .filter(|(candidate, _)| candidate.as_str() != key)
            .filter_map(|(candidate, window)| {
                score_candidate(window, now, retention).map(|confidence| Prediction {
                    key: candidate.clone(),
                    confidence,
                })
            })
            .collect();

        predictions.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        predictions.truncate(limit);

        state
            .predictions
            .retain(|_, cached| millis_between(cached.computed_at, now) < prediction_ttl);
        state.predictions.insert(
            cache_key,
            CachedPrediction {
                computed_at: now,
                predictions: predictions.clone(),
            },
        );

        predictions
    }

    /// Keys accessed within `within` of now, most recent first.
    pub async fn recent_keys(&self, within: Duration, limit: usize) -> Vec<String> {
        let now = self.clock.now();
        let within = duration_millis(within);
        let state = self.state.read().await;

        let mut recent: Vec<(&String, DateTime<Utc>)> = state
            .windows
            .iter()
            .filter_map(|(k, w)| w.back().map(|last| (k, *last)))
            .filter(|(_, last)| millis_between(*last, now) <= within)
            .collect();

        recent.sort_by(|a, b| b.1.cmp(&a.1));
        recent
            .into_iter()
            .take(limit)
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub async fn access_count(&self, key: &str) -> usize {
        let state = self.state.read().await;
        state.windows.peek(key).map(|w| w.len()).unwrap_or(0)
    }

    pub async fn tracked_keys(&self) -> usize {
        self.state.read().await.windows.len()
    }

    pub async fn forget(&self, key: &str) {
        let mut state = self.state.write().await;
        state.windows.pop(key);
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.windows.clear();
        state.predictions.clear();
    }
}

/// Confidence that the key owning `window` is about to be accessed, or
/// `None` when it is not due.
fn score_candidate(
    window: &VecDeque<DateTime<Utc>>,
    now: DateTime<Utc>,
    retention: i64,
) -> Option<f64> {
    let live: Vec<DateTime<Utc>> = window
        .iter()
        .copied()
        .filter(|t| millis_between(*t, now) <= retention)
        .collect();
    if live.len() < 2 {
        return None;
    }

    let last_hour = live
        .iter()
        .filter(|t| millis_between(**t, now) <= FREQUENCY_WINDOW_MS)
        .count();
    let frequency = last_hour as f64 / FREQUENCY_DIVISOR;

    let first = live[0];
    let last = live[live.len() - 1];
    let mean_interval = millis_between(first, last) as f64 / (live.len() - 1) as f64;
    if mean_interval <= 0.0 {
        return None;
    }

    let elapsed = millis_between(last, now) as f64;
    if elapsed < DUE_FRACTION * mean_interval {
        return None;
    }

    let confidence = (frequency * (elapsed / mean_interval).min(1.0)).clamp(0.0, 1.0);
    (confidence > 0.0).then_some(confidence)
}
