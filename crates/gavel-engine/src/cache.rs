//! Content-addressed cache of canonical reviews.
//!
//! Keys fingerprint the audit request, never volatile fields: identical
//! submissions hit regardless of session or timing.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

use gavel_core::{AuditRequest, Review};

pub const DEFAULT_MAX_ENTRIES: usize = 100;
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Field separator for the canonical fingerprint input.
const SEP: &[u8] = &[0x1f];

#[derive(Debug, Clone)]
pub struct AuditCacheConfig {
    pub max_entries: usize,
    pub ttl: Duration,
}

impl Default for AuditCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            ttl: DEFAULT_TTL,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

/// Stable fingerprint over `(candidate, task, rubric digest, budget,
/// context digest)`. Rubric names and weights participate; descriptions,
/// timestamps, and session ids never do.
pub fn fingerprint(request: &AuditRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.candidate.as_bytes());
    hasher.update(SEP);
    hasher.update(request.task.as_bytes());
    hasher.update(SEP);
    for dim in &request.rubric {
        hasher.update(dim.name.as_bytes());
        hasher.update(b":");
        hasher.update(dim.weight.to_bits().to_le_bytes());
        hasher.update(SEP);
    }
    hasher.update(
        format!(
            "{}:{}:{}",
            request.budget.max_cycles, request.budget.candidates, request.budget.threshold
        )
        .as_bytes(),
    );
    hasher.update(SEP);
    let context_digest = Sha256::digest(request.context_pack.as_bytes());
    hasher.update(context_digest);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

struct CacheEntry {
    review: Review,
    inserted_at: Instant,
}

struct CacheInner {
    map: HashMap<String, CacheEntry>,
    /// LRU order, least-recent first.
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// In-memory, mutex-guarded review cache with TTL and LRU eviction.
pub struct AuditCache {
    config: AuditCacheConfig,
    inner: Mutex<CacheInner>,
}

impl AuditCache {
    pub fn new(config: AuditCacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(AuditCacheConfig::default())
    }

    /// Whether a live entry exists. Does not count toward hit/miss stats.
    pub fn has(&self, request: &AuditRequest) -> bool {
        let key = fingerprint(request);
        let inner = self.inner.lock().expect("cache lock");
        inner
            .map
            .get(&key)
            .is_some_and(|entry| entry.inserted_at.elapsed() < self.config.ttl)
    }

    /// A defensive copy of the cached review, refreshing its LRU position.
    pub fn get(&self, request: &AuditRequest) -> Option<Review> {
        let key = fingerprint(request);
        let mut guard = self.inner.lock().expect("cache lock");
        let inner = &mut *guard;

        let live = match inner.map.get(&key) {
            Some(entry) => entry.inserted_at.elapsed() < self.config.ttl,
            None => {
                inner.misses += 1;
                return None;
            }
        };
        if !live {
            inner.map.remove(&key);
            inner.order.retain(|k| k != &key);
            inner.evictions += 1;
            inner.misses += 1;
            return None;
        }

        inner.hits += 1;
        touch(&mut inner.order, &key);
        debug!(key = %&key[..12], "audit cache hit");
        inner.map.get(&key).map(|entry| entry.review.clone())
    }

    /// Store a canonical review. The engine never routes fallback reviews
    /// here.
    pub fn set(&self, request: &AuditRequest, review: &Review) {
        let key = fingerprint(request);
        let mut guard = self.inner.lock().expect("cache lock");
        let inner = &mut *guard;

        if inner.map.len() >= self.config.max_entries && !inner.map.contains_key(&key) {
            if let Some(oldest) = inner.order.pop_front() {
                inner.map.remove(&oldest);
                inner.evictions += 1;
            }
        }
        inner.map.insert(
            key.clone(),
            CacheEntry {
                review: review.clone(),
                inserted_at: Instant::now(),
            },
        );
        touch(&mut inner.order, &key);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("cache lock");
        inner.map.clear();
        inner.order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("cache lock");
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            entries: inner.map.len(),
        }
    }
}

fn touch(order: &mut VecDeque<String>, key: &str) {
    order.retain(|k| k != key);
    order.push_back(key.to_string());
}
