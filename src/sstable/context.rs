//! Runtime pieces shared by table builders and readers.

use crate::cache::{Cache, LruCache};
use crate::comparator::{Comparator, InternalKeyComparator};
use crate::config::TableOptions;
use crate::env::{Env, PosixEnv};
use crate::error::Result;
use crate::filter::FilterPolicy;
use crate::slice_transform::SliceTransform;
use crate::sstable::block::Block;
use crate::sstable::block_codec::BlockContents;
use crate::sstable::properties::TablePropertiesCollectorFactory;
use std::sync::Arc;

/// Uncompressed block cache.
pub type BlockCache = Arc<dyn Cache<Block>>;

/// Compressed block cache.
pub type CompressedBlockCache = Arc<dyn Cache<BlockContents>>;

/// Options resolved into the objects tables work with.
///
/// One context is usually shared by every table of a database so that they
/// also share block caches.
#[derive(Clone)]
pub struct TableContext {
    /// Sanitized table options.
    pub options: TableOptions,
    /// Orders internal keys.
    pub comparator: InternalKeyComparator,
    /// Filter policy, if filters are enabled.
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,
    /// Prefix extractor for prefix filters.
    pub prefix_extractor: Option<Arc<dyn SliceTransform>>,
    /// User property collectors, one instance per table.
    pub collector_factories: Vec<Arc<dyn TablePropertiesCollectorFactory>>,
    /// Cache of uncompressed blocks.
    pub block_cache: Option<BlockCache>,
    /// Cache of compressed blocks.
    pub block_cache_compressed: Option<CompressedBlockCache>,
    /// File system.
    pub env: Arc<dyn Env>,
}

impl TableContext {
    /// Validates `options` and builds the policies and caches they describe.
    pub fn new(mut options: TableOptions) -> Result<Self> {
        options.validate()?;
        options.sanitize();

        let strict = options.cache_strict_capacity;
        let block_cache = (options.block_cache_size > 0).then(|| {
            Arc::new(LruCache::with_strict_capacity(options.block_cache_size, strict)) as BlockCache
        });
        let block_cache_compressed = (options.block_cache_compressed_size > 0).then(|| {
            Arc::new(LruCache::with_strict_capacity(
                options.block_cache_compressed_size,
                strict,
            )) as CompressedBlockCache
        });

        Ok(Self {
            filter_policy: options.filter_policy(),
            prefix_extractor: options.prefix_extractor(),
            options,
            comparator: InternalKeyComparator::default(),
            collector_factories: Vec::new(),
            block_cache,
            block_cache_compressed,
            env: PosixEnv::shared(),
        })
    }

    /// Orders user keys with `user_comparator`.
    pub fn with_user_comparator(mut self, user_comparator: Arc<dyn Comparator>) -> Self {
        self.comparator = InternalKeyComparator::new(user_comparator);
        self
    }

    /// Adds a property collector factory.
    pub fn with_collector_factory(mut self, factory: Arc<dyn TablePropertiesCollectorFactory>) -> Self {
        self.collector_factories.push(factory);
        self
    }

    /// Replaces the uncompressed block cache.
    pub fn with_block_cache(mut self, cache: Option<BlockCache>) -> Self {
        self.block_cache = cache;
        self
    }

    /// Replaces the compressed block cache.
    pub fn with_block_cache_compressed(mut self, cache: Option<CompressedBlockCache>) -> Self {
        self.block_cache_compressed = cache;
        self
    }

    /// Replaces the environment.
    pub fn with_env(mut self, env: Arc<dyn Env>) -> Self {
        self.env = env;
        self
    }
}

impl std::fmt::Debug for TableContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableContext")
            .field("options", &self.options)
            .field("comparator", &self.comparator)
            .field("block_cache", &self.block_cache.as_ref().map(|c| c.capacity()))
            .finish()
    }
}
