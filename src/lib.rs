//! # tiercache
//!
//! **Multi-tier, self-optimizing cache for heterogeneous payloads**
//!
//! One cache engine shared by many unrelated subsystems (LLM responses,
//! embeddings, retrieved documents, tool results, session state), built to
//! sustain a very high hit rate through tiering, key normalization, fuzzy
//! matching, access-pattern prefetching and adaptive sizing.
//!
//! ## Tiers
//!
//! | Tier | Storage | Bound | Written when |
//! |------|---------|-------|--------------|
//! | **Hot** | in-process LRU | count, no expiry | value < 1 KiB, or promoted from Warm |
//! | **Warm** | in-process LRU | count + TTL | value < 1 KiB, or promoted from a slower tier |
//! | **Distributed** | pluggable backend | backend TTL | always |
//! | **Predictive** | in-process LRU | count + TTL | by the prefetch loop |
//! | **Compressed** | zstd bytes, in-process | count + TTL | value > 10 KiB |
//!
//! Lookups walk the tiers in that order and copy every hit into the next
//! faster tier. If every tier misses, keys that look alike (same leading
//! characters, trigram similarity ≥ 0.8) are tried once before the lookup
//! counts as a miss.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tiercache::{CacheConfig, CacheEngine, InMemoryBackend};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), tiercache::CacheError> {
//! let engine: Arc<CacheEngine<Vec<f32>>> = Arc::new(CacheEngine::init(
//!     CacheConfig::default(),
//!     Arc::new(InMemoryBackend::new()),
//! )?);
//!
//! engine
//!     .set("embedding:The quick brown fox", vec![0.1, 0.2, 0.3], Some(Duration::from_secs(3600)))
//!     .await?;
//!
//! // Keys are normalized, so spelling variations share an entry
//! let hit = engine.get("embedding:the_quick_brown_fox", Vec::new()).await;
//! assert_eq!(hit, vec![0.1, 0.2, 0.3]);
//!
//! let snapshot = engine.metrics_snapshot().await;
//! println!("Hit rate: {:.1}%", snapshot.hit_rate * 100.0);
//!
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Failure model
//!
//! - An unreachable distributed backend is a miss on read and a skipped write;
//!   the in-process tiers keep working.
//! - Serialization and decompression failures only affect the tier involved.
//! - Invalid configuration fails [`CacheEngine::init`].
//! - `set`, `remove` and `clear_all` fail with [`CacheError::ShutDown`] once
//!   the engine has been shut down.
//!
//! ## Background work
//!
//! Two loops run on the current Tokio runtime: the optimizer grows the Hot
//! tier when the hit rate is below target and the tier is thrashing, and the
//! prefetcher warms the Predictive tier with keys the access history says are
//! due. Both stop on [`CacheEngine::shutdown`].

pub mod cache;
pub mod codec;
pub mod compression;
pub mod config;
pub mod engine;
pub mod error;
pub mod memoize;
pub mod metrics;
pub mod normalize;
pub mod prefetch;
pub mod warming;

// Re-export commonly used types
pub use cache::distributed::{DistributedBackend, InMemoryBackend};
pub use cache::{Tier, TierStats};
pub use codec::CacheValue;
pub use compression::{Compression, NoCompression, ZstdCompression};
pub use config::{CacheConfig, TierConfig};
pub use engine::{CacheEngine, CacheEngineBuilder};
pub use error::{BackendError, CacheError};
pub use memoize::Memoized;
pub use metrics::MetricsSnapshot;
pub use normalize::{canonicalize, trigram_similarity};
pub use prefetch::{Clock, ManualClock, Prediction, SystemClock};
pub use warming::{OptimizerReport, WarmingReport};
