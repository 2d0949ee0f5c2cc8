use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Storage level an entry lives in, fastest first in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    /// Small in-process LRU, no expiry
    Hot,
    /// Larger in-process LRU with TTL
    Warm,
    /// Pluggable shared backend
    Distributed,
    /// Entries placed ahead of demand by the prefetcher
    Predictive,
    /// zstd-compressed serialized values
    Compressed,
}

impl Tier {
    pub const ALL: [Tier; 5] = [
        Tier::Hot,
        Tier::Warm,
        Tier::Distributed,
        Tier::Predictive,
        Tier::Compressed,
    ];

    pub fn index(&self) -> usize {
        match self {
            Tier::Hot => 0,
            Tier::Warm => 1,
            Tier::Distributed => 2,
            Tier::Predictive => 3,
            Tier::Compressed => 4,
        }
    }

    /// Tier a hit in `self` is copied into. Promotion only ever moves a value
    /// toward a faster tier.
    pub fn promotion_target(&self) -> Option<Tier> {
        match self {
            Tier::Hot => None,
            Tier::Warm => Some(Tier::Hot),
            Tier::Distributed | Tier::Predictive | Tier::Compressed => Some(Tier::Warm),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Hot => "hot",
            Tier::Warm => "warm",
            Tier::Distributed => "distributed",
            Tier::Predictive => "predictive",
            Tier::Compressed => "compressed",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value held by one tier.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub key: String,
    pub value: T,
    pub created_at: Instant,
    pub last_accessed: Instant,
    pub access_count: u64,
    pub size_bytes: usize,
    pub tier: Tier,
    pub compressed: bool,
    /// Placed by the prefetcher rather than by a caller
    pub prefetched: bool,
    /// Requested lifetime; the owning tier caps it with its own TTL
    pub ttl: Option<Duration>,
    pub(crate) expires_at: Option<Instant>,
}

impl<T> CacheEntry<T> {
    pub fn new(key: impl Into<String>, value: T, size_bytes: usize) -> Self {
        let now = Instant::now();
        Self {
            key: key.into(),
            value,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            size_bytes,
            tier: Tier::Hot,
            compressed: false,
            prefetched: false,
            ttl: None,
            expires_at: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    pub fn with_prefetched(mut self, prefetched: bool) -> Self {
        self.prefetched = prefetched;
        self
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    pub fn touch(&mut self) {
        self.last_accessed = Instant::now();
        self.access_count += 1;
    }
}

#[derive(Debug, Clone)]
pub struct TierStats {
    pub tier: Tier,
    pub entry_count: usize,
    pub capacity: usize,
    pub size_bytes: usize,
}

pub mod distributed;
pub mod memory;
pub mod tiered;
