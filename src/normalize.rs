//! Key canonicalization and trigram-based fuzzy lookup.
//!
//! Equivalent raw keys ("User Profile?b=2&a=1", "user_profile?a=1&b=2")
//! collapse to one normalized key. Normalized keys are also indexed by a
//! short hash of their leading characters, which bounds the search space
//! for [`Normalizer::find_similar`].

use lru::LruCache;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use tokio::sync::RwLock;

const QUERY_DELIMITER: char = '?';
const PARAM_SEPARATOR: &str = "&";
/// Number of leading key characters hashed into the bucket id
const BUCKET_PREFIX_CHARS: usize = 8;
/// Length of the hex bucket id
const BUCKET_ID_LEN: usize = 8;

/// Canonicalize a raw key without touching any cache.
///
/// Lowercases and trims, collapses runs of whitespace, hyphens and
/// underscores to a single `_`, and sorts the `&`-separated parameters
/// after the first `?`.
pub fn canonicalize(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let collapsed = collapse_separators(&lowered);

    match collapsed.split_once(QUERY_DELIMITER) {
        Some((path, query)) => {
            let mut params: Vec<&str> = query
                .split(PARAM_SEPARATOR)
                .filter(|p| !p.is_empty())
                .collect();
            if params.is_empty() {
                return path.to_string();
            }
            params.sort_unstable();
            format!("{}{}{}", path, QUERY_DELIMITER, params.join(PARAM_SEPARATOR))
        }
        None => collapsed,
    }
}

fn collapse_separators(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_run = false;

    for ch in input.chars() {
        if ch.is_whitespace() || ch == '-' || ch == '_' {
            if !in_run {
                out.push('_');
                in_run = true;
            }
        } else {
            out.push(ch);
            in_run = false;
        }
    }

    out
}

fn trigrams(s: &str) -> HashSet<[char; 3]> {
    let chars: Vec<char> = s.chars().collect();
    chars.windows(3).map(|w| [w[0], w[1], w[2]]).collect()
}

/// Jaccard similarity of the two strings' character trigram sets.
pub fn trigram_similarity(a: &str, b: &str) -> f64 {
    let ta = trigrams(a);
    let tb = trigrams(b);

    match (ta.is_empty(), tb.is_empty()) {
        (true, true) => 1.0,
        (true, false) | (false, true) => 0.0,
        (false, false) => {
            let intersection = ta.intersection(&tb).count();
            let union = ta.union(&tb).count();
            intersection as f64 / union as f64
        }
    }
}

/// Bucket id shared by every key with the same leading characters.
fn bucket_id(key: &str) -> String {
    let prefix: String = key.chars().take(BUCKET_PREFIX_CHARS).collect();
    let mut hasher = DefaultHasher::new();
    prefix.hash(&mut hasher);
    let mut id = format!("{:016x}", hasher.finish());
    id.truncate(BUCKET_ID_LEN);
    id
}

pub struct Normalizer {
    normalized: RwLock<LruCache<String, String>>,
    buckets: RwLock<LruCache<String, VecDeque<String>>>,
    max_bucket_keys: usize,
}

impl Normalizer {
    pub fn new(cache_size: NonZeroUsize, max_bucket_keys: usize) -> Self {
        Self {
            normalized: RwLock::new(LruCache::new(cache_size)),
            buckets: RwLock::new(LruCache::new(cache_size)),
            max_bucket_keys: max_bucket_keys.max(1),
        }
    }

    /// Normalize `raw`, reusing a previous result when available.
    pub async fn normalize(&self, raw: &str) -> String {
        let mut cache = self.normalized.write().await;
        if let Some(normalized) = cache.get(raw) {
            return normalized.clone();
        }

        let normalized = canonicalize(raw);
        cache.put(raw.to_string(), normalized.clone());
        normalized
    }

    /// Make `key` a fuzzy-match candidate for keys sharing its bucket.
    pub async fn register(&self, key: &str) {
        let mut buckets = self.buckets.write().await;
        let bucket = buckets.get_or_insert_mut(bucket_id(key), VecDeque::new);

        if bucket.iter().any(|k| k == key) {
            return;
        }
        bucket.push_back(key.to_string());
        while bucket.len() > self.max_bucket_keys {
            bucket.pop_front();
        }
    }

    pub async fn forget(&self, key: &str) {
        let mut buckets = self.buckets.write().await;
        if let Some(bucket) = buckets.peek_mut(&bucket_id(key)) {
            bucket.retain(|k| k != key);
        }
    }

    /// Registered keys other than `key` whose trigram similarity is at least
    /// `threshold`, best match first.
    pub async fn find_similar(&self, key: &str, threshold: f64) -> Vec<String> {
        let buckets = self.buckets.read().await;
        let Some(bucket) = buckets.peek(&bucket_id(key)) else {
            return Vec::new();
        };

        let mut scored: Vec<(String, f64)> = bucket
            .iter()
            .filter(|candidate| candidate.as_str() != key)
            .map(|candidate| (candidate.clone(), trigram_similarity(key, candidate)))
            .filter(|(_, score)| *score >= threshold)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().map(|(k, _)| k).collect()
    }

    pub async fn clear(&self) {
        self.normalized.write().await.clear();
        self.buckets.write().await.clear();
    }
}
