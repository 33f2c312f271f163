//! LRU (Least Recently Used) cache with pinning and bounded eviction.

use super::{Cache, CacheHandle, CacheKey, CacheStats};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct Entry<V> {
    value: Arc<V>,
    charge: usize,
    refs: usize,
    tick: u64,
    serial: u64,
}

struct LruState<V> {
    entries: HashMap<CacheKey, Entry<V>>,
    // Recency order: oldest tick first.
    lru: BTreeMap<u64, CacheKey>,
    usage: usize,
    next_tick: u64,
    next_serial: u64,
    stats: CacheStats,
}

impl<V> LruState<V> {
    fn touch(&mut self, key: &CacheKey) {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some(entry) = self.entries.get_mut(key) {
            self.lru.remove(&entry.tick);
            entry.tick = tick;
            self.lru.insert(tick, key.clone());
        }
    }

    fn remove(&mut self, key: &CacheKey) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.lru.remove(&entry.tick);
        self.usage -= entry.charge;
        Some(entry)
    }

    /// Evicts the least recently used unpinned entry.
    fn evict_one(&mut self) -> bool {
        let victim = self
            .lru
            .values()
            .find(|k| self.entries.get(*k).is_some_and(|e| e.refs == 0))
            .cloned();
        match victim {
            Some(key) => {
                self.remove(&key);
                self.stats.evictions += 1;
                true
            }
            None => false,
        }
    }
}

/// Thread-safe LRU cache.
///
/// Entries with outstanding handles are pinned and skipped by eviction.
/// Without strict capacity an insert that cannot free enough room still
/// succeeds and the cache runs over capacity until handles are released.
///
/// # Examples
///
/// ```
/// use aidb_table::cache::{Cache, CacheKey, LruCache};
/// use std::sync::Arc;
///
/// let cache: LruCache<Vec<u8>> = LruCache::new(8 * 1024 * 1024);
/// let handle = cache.insert(CacheKey::new(b"file", 0), Arc::new(vec![1, 2, 3]), 3).unwrap();
/// cache.release(handle);
/// assert!(cache.lookup(&CacheKey::new(b"file", 0)).is_some());
/// ```
pub struct LruCache<V> {
    capacity: usize,
    strict_capacity: bool,
    state: Mutex<LruState<V>>,
    last_id: AtomicU64,
}

impl<V> LruCache<V> {
    /// Creates a cache holding up to `capacity` bytes of charge.
    pub fn new(capacity: usize) -> Self {
        Self::with_strict_capacity(capacity, false)
    }

    /// Creates a cache; with `strict_capacity` inserts fail rather than
    /// overflow.
    pub fn with_strict_capacity(capacity: usize, strict_capacity: bool) -> Self {
        Self {
            capacity,
            strict_capacity,
            state: Mutex::new(LruState {
                entries: HashMap::new(),
                lru: BTreeMap::new(),
                usage: 0,
                next_tick: 0,
                next_serial: 1,
                stats: CacheStats::default(),
            }),
            last_id: AtomicU64::new(0),
        }
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// True when nothing is resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Send + Sync> Cache<V> for LruCache<V> {
    fn insert(&self, key: CacheKey, value: Arc<V>, charge: usize) -> Result<CacheHandle<V>> {
        let mut state = self.state.lock();

        if let Some(old) = state.remove(&key) {
            log::trace!("replacing cache entry with {} refs", old.refs);
        }

        // Every attempt either evicts one entry or stops, so this runs at
        // most once per resident entry.
        let max_attempts = state.entries.len();
        let mut attempts = 0;
        while state.usage + charge > self.capacity && attempts < max_attempts {
            attempts += 1;
            if !state.evict_one() {
                break;
            }
        }

        if state.usage + charge > self.capacity {
            if self.strict_capacity {
                return Err(Error::memory_limit(format!(
                    "cache full: usage {} + charge {} > capacity {}",
                    state.usage, charge, self.capacity
                )));
            }
            if charge > self.capacity {
                // Never resident; the caller still gets its value back.
                return Ok(CacheHandle::new(key, value, 0));
            }
        }

        let serial = state.next_serial;
        state.next_serial += 1;
        let tick = state.next_tick;
        state.next_tick += 1;
        state.entries.insert(
            key.clone(),
            Entry {
                value: Arc::clone(&value),
                charge,
                refs: 1,
                tick,
                serial,
            },
        );
        state.lru.insert(tick, key.clone());
        state.usage += charge;
        state.stats.insertions += 1;

        Ok(CacheHandle::new(key, value, serial))
    }

    fn lookup(&self, key: &CacheKey) -> Option<CacheHandle<V>> {
        let mut state = self.state.lock();
        state.stats.lookups += 1;

        let found = state.entries.get_mut(key).map(|entry| {
            entry.refs += 1;
            (Arc::clone(&entry.value), entry.serial)
        });
        match found {
            Some((value, serial)) => {
                state.stats.hits += 1;
                state.touch(key);
                Some(CacheHandle::new(key.clone(), value, serial))
            }
            None => {
                state.stats.misses += 1;
                None
            }
        }
    }

    fn release(&self, handle: CacheHandle<V>) {
        if handle.serial() == 0 {
            return;
        }
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.get_mut(handle.key()) {
            if entry.serial == handle.serial() && entry.refs > 0 {
                entry.refs -= 1;
            }
        }
        // Catch up on evictions deferred while this entry was pinned.
        let max_attempts = state.entries.len();
        let mut attempts = 0;
        while state.usage > self.capacity && attempts < max_attempts {
            attempts += 1;
            if !state.evict_one() {
                break;
            }
        }
    }

    fn erase(&self, key: &CacheKey) {
        self.state.lock().remove(key);
    }

    fn new_id(&self) -> u64 {
        self.last_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn usage(&self) -> usize {
        self.state.lock().usage
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn stats(&self) -> CacheStats {
        self.state.lock().stats.clone()
    }
}
