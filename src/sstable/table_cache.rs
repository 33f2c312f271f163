//! Open table readers keyed by file number.

use crate::cache::{Cache, CacheKey, LruCache};
use crate::error::Result;
use crate::files::filename::table_file_name;
use crate::sstable::context::TableContext;
use crate::sstable::reader::{LookupResult, ReadOptions, TableReader};
use std::path::PathBuf;
use std::sync::Arc;

/// Keeps up to `capacity` tables open.
pub struct TableCache {
    ctx: Arc<TableContext>,
    db_path: PathBuf,
    cache: LruCache<TableReader>,
}

impl TableCache {
    /// Creates a cache for the tables in `db_path`.
    pub fn new(ctx: Arc<TableContext>, db_path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            ctx,
            db_path: db_path.into(),
            cache: LruCache::new(capacity),
        }
    }

    fn key(file_number: u64) -> CacheKey {
        CacheKey::new(&[], file_number)
    }

    /// Reader for table `file_number`, opening it on a miss.
    pub fn find_table(&self, file_number: u64) -> Result<TableReader> {
        let key = Self::key(file_number);
        if let Some(pinned) = self.cache.lookup(&key) {
            let reader = TableReader::clone(pinned.value());
            self.cache.release(pinned);
            return Ok(reader);
        }

        let path = table_file_name(&self.db_path, file_number);
        let reader = TableReader::open_path(Arc::clone(&self.ctx), &path)?;
        log::debug!("opened table {} into the table cache", file_number);
        let pinned = self.cache.insert(key, Arc::new(reader.clone()), 1)?;
        self.cache.release(pinned);
        Ok(reader)
    }

    /// Point lookup in table `file_number`.
    pub fn get(&self, opts: &ReadOptions, file_number: u64, key: &[u8]) -> Result<LookupResult> {
        self.find_table(file_number)?.get(opts, key)
    }

    /// Drops the cached reader of a table about to be deleted.
    pub fn evict(&self, file_number: u64) {
        self.cache.erase(&Self::key(file_number));
    }

    /// Number of open tables.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// True if no table is open.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
