//! Block cache abstraction.
//!
//! Readers share one [`Cache`] for uncompressed blocks and, optionally, a
//! second one for compressed block contents. Keys are a per-file unique
//! prefix followed by the block offset, so two files never collide even
//! when their blocks sit at the same offsets.

mod lru;

pub use lru::LruCache;

use crate::error::Result;
use crate::util::coding::put_varint64;
use std::sync::Arc;

/// A unique identifier for a cached block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Vec<u8>);

impl CacheKey {
    /// Builds `prefix || varint64(offset)`.
    pub fn new(prefix: &[u8], offset: u64) -> Self {
        let mut key = Vec::with_capacity(prefix.len() + 10);
        key.extend_from_slice(prefix);
        put_varint64(&mut key, offset);
        Self(key)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Statistics for cache performance monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Total number of cache lookups
    pub lookups: u64,
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Number of insertions
    pub insertions: u64,
    /// Number of evictions
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.hits as f64 / self.lookups as f64
        }
    }
}

/// A pinned reference to a cached value.
///
/// While a handle is outstanding the entry is never evicted. Hand it back
/// with [`Cache::release`] once done.
#[derive(Debug)]
pub struct CacheHandle<V> {
    key: CacheKey,
    value: Arc<V>,
    // Insertion serial of the pinned entry; 0 for values the cache did not keep.
    serial: u64,
}

impl<V> CacheHandle<V> {
    pub(crate) fn new(key: CacheKey, value: Arc<V>, serial: u64) -> Self {
        Self { key, value, serial }
    }

    /// The cached value.
    pub fn value(&self) -> &Arc<V> {
        &self.value
    }

    /// The key the value is cached under.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }
}

/// Capacity-bounded key to value store with pinning.
pub trait Cache<V>: Send + Sync {
    /// Inserts `value` with the given charge and returns it pinned.
    ///
    /// Fails with `MemoryLimit` only when the cache enforces strict
    /// capacity and nothing unpinned is left to evict.
    fn insert(&self, key: CacheKey, value: Arc<V>, charge: usize) -> Result<CacheHandle<V>>;

    /// Looks up and pins an entry.
    fn lookup(&self, key: &CacheKey) -> Option<CacheHandle<V>>;

    /// Unpins an entry obtained from `insert` or `lookup`.
    fn release(&self, handle: CacheHandle<V>);

    /// Drops an entry. Outstanding handles keep their value alive.
    fn erase(&self, key: &CacheKey);

    /// Returns a fresh id, used as a key prefix by files without a stable
    /// unique id.
    fn new_id(&self) -> u64;

    /// Sum of the charges of resident entries.
    fn usage(&self) -> usize;

    /// Configured capacity.
    fn capacity(&self) -> usize;

    /// Snapshot of hit/miss counters.
    fn stats(&self) -> CacheStats;
}
