//! In-memory cost-bounded LRU cache for decoded images.

use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::{ImageInformation, is_variant_of};
use crate::domain::ports::ImageHandle;

/// Fallback budget when available memory cannot be determined (256 MB).
const FALLBACK_BUDGET: u64 = 256 * 1024 * 1024;

/// Fraction of available memory used when no explicit budget is set.
const AVAILABLE_MEMORY_FRACTION: u64 = 5; // one fifth, ~20%

struct CacheEntry {
    image: ImageHandle,
    info: ImageInformation,
    cost: u64,
}

struct Inner {
    map: LruCache<String, CacheEntry>,
    total_cost: u64,
}

/// Cost-bounded strict-LRU cache of decoded images.
///
/// Cost is the decoded pixel byte size, not the compressed payload size.
/// The cumulative cost never exceeds the budget after any `add`; the
/// least-recently-used entries are evicted first. Recency updates on both
/// `get` and `add`. Safe for concurrent use; the internal lock is a leaf
/// lock, never held while calling into other components.
pub struct MemoryCache {
    inner: Mutex<Inner>,
    budget: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

impl MemoryCache {
    /// Creates a cache with the given byte budget, or a derived one
    /// (~20% of available process memory, computed once) when `None`.
    #[must_use]
    pub fn new(budget: Option<u64>) -> Self {
        let budget = budget.unwrap_or_else(derived_budget).max(1);
        Self {
            inner: Mutex::new(Inner {
                map: LruCache::unbounded(),
                total_cost: 0,
            }),
            budget,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The configured budget in bytes.
    #[must_use]
    pub const fn budget(&self) -> u64 {
        self.budget
    }

    /// Looks up a decoded image, promoting it to most recently used.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<(ImageHandle, ImageInformation)> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.map.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "memory cache hit");
            Some((entry.image.clone(), entry.info.clone()))
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "memory cache miss");
            None
        }
    }

    /// Stores a decoded image under `key` with the given cost.
    ///
    /// A silent no-op when the key is empty. Evicts least-recently-used
    /// entries until the cumulative cost fits the budget again. An entry
    /// costlier than the whole budget is not admitted.
    pub fn add(&self, key: &str, info: ImageInformation, image: ImageHandle, cost: u64) {
        if key.is_empty() {
            return;
        }
        if cost > self.budget {
            debug!(key = %key, cost = cost, budget = self.budget, "entry exceeds memory budget, not cached");
            return;
        }
        let mut inner = self.inner.lock();
        if let Some(previous) = inner.map.put(
            key.to_string(),
            CacheEntry { image, info, cost },
        ) {
            inner.total_cost -= previous.cost;
        }
        inner.total_cost += cost;
        while inner.total_cost > self.budget {
            let Some((evicted_key, evicted)) = inner.map.pop_lru() else {
                break;
            };
            inner.total_cost -= evicted.cost;
            debug!(key = %evicted_key, cost = evicted.cost, "evicted from memory cache");
        }
    }

    /// Removes one entry.
    pub fn remove(&self, key: &str) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.map.pop(key) {
            inner.total_cost -= entry.cost;
            debug!(key = %key, "removed from memory cache");
        }
    }

    /// Removes the base entry and every transformed variant of it, i.e.
    /// every key equal to `base` or prefixed by `base + ";"`.
    pub fn remove_similar(&self, base: &str) {
        let mut inner = self.inner.lock();
        let matching: Vec<String> = inner
            .map
            .iter()
            .filter(|(key, _)| is_variant_of(key, base))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &matching {
            if let Some(entry) = inner.map.pop(key) {
                inner.total_cost -= entry.cost;
            }
        }
        if !matching.is_empty() {
            debug!(base = %base, removed = matching.len(), "invalidated variants from memory cache");
        }
    }

    /// Drops every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.total_cost = 0;
        debug!("cleared memory cache");
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// True when the cache holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current cumulative cost in bytes.
    #[must_use]
    pub fn total_cost(&self) -> u64 {
        self.inner.lock().total_cost
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        CacheStats {
            hits,
            misses,
            hit_rate,
            size: self.len(),
            cost: self.total_cost(),
        }
    }
}

/// Statistics about memory cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached images.
    pub size: usize,
    /// Current cumulative cost in bytes.
    pub cost: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images, {} bytes, {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.cost, self.hit_rate, self.hits, self.misses
        )
    }
}

/// Derives a budget from available process memory, once.
fn derived_budget() -> u64 {
    available_memory().map_or(FALLBACK_BUDGET, |avail| avail / AVAILABLE_MEMORY_FRACTION)
}

#[cfg(target_os = "linux")]
fn available_memory() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemAvailable:") {
            let kb: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn available_memory() -> Option<u64> {
    None
}
