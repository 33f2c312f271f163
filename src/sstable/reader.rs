//! Table reader.
//!
//! Opens a table file, checks its footer and answers point lookups and
//! scans. Data blocks go through the block caches; the index and filter
//! stay with the reader, loaded at open or on first use.

use crate::cache::CacheKey;
use crate::comparator::{Comparator, BytewiseComparator};
use crate::compression::CompressionType;
use crate::env::RandomAccessFile;
use crate::error::{Error, Result};
use crate::key::{InternalKey, ParsedInternalKey, ValueType, MAX_SEQUENCE_NUMBER};
use crate::sstable::block::Block;
use crate::sstable::block_codec::{read_block_contents, BlockContents};
use crate::sstable::context::TableContext;
use crate::sstable::filter_block::{
    BlockBasedFilterBlockReader, FilterBlockReader, FilterKind, FullFilterBlockReader,
    PartitionLoader, PartitionedFilterBlockReader,
};
use crate::sstable::format::{read_footer, BlockHandle, Footer};
use crate::sstable::index::{IndexReader, IndexType};
use crate::sstable::iterator::{BlockIterFactory, EmptyIterator, InternalIterator, TwoLevelIterator};
use crate::sstable::properties::{names, TableProperties};
use crate::sstable::{COMPRESSION_DICT_BLOCK, PROPERTIES_BLOCK, RANGE_DEL_BLOCK};
use crate::util::coding::put_varint64;
use bytes::Bytes;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

/// Options for a single read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Verify block checksums.
    /// Default: true
    pub verify_checksums: bool,
    /// Insert blocks read from the file into the block caches.
    /// Default: true
    pub fill_cache: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            verify_checksums: true,
            fill_cache: true,
        }
    }
}

/// Outcome of a point lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    /// No entry for the user key at or below the lookup sequence.
    NotFound,
    /// The newest visible entry is a value.
    Found(Vec<u8>),
    /// The newest visible entry is a deletion.
    Deleted,
    /// The newest visible entry is a merge operand.
    Merge(Vec<u8>),
}

/// Reads whole blocks without going through the block caches.
#[derive(Clone)]
struct RawBlockReader {
    file: Arc<dyn RandomAccessFile>,
    file_size: u64,
    footer: Footer,
    dict: Bytes,
}

impl RawBlockReader {
    fn read(&self, handle: &BlockHandle, verify_checksums: bool) -> Result<Bytes> {
        handle.check_within(self.file_size)?;
        read_block_contents(self.file.as_ref(), self.footer.checksum, handle, verify_checksums)?
            .into_uncompressed(self.footer.format_version, &self.dict)
    }
}

struct Rep {
    ctx: Arc<TableContext>,
    comparator: Arc<dyn Comparator>,
    raw: RawBlockReader,
    file_size: u64,
    cache_key_prefix: Vec<u8>,
    properties: Option<Arc<TableProperties>>,
    range_del_handle: Option<BlockHandle>,
    filter_handle: Option<(FilterKind, BlockHandle)>,
    index_type: IndexType,
    whole_key_filtering: bool,
    index: OnceLock<Result<Arc<IndexReader>>>,
    filter: OnceLock<Result<Option<Arc<FilterBlockReader>>>>,
}

impl Rep {
    /// Fetches a block: uncompressed cache, then compressed cache, then file.
    fn read_block(&self, opts: &ReadOptions, handle: &BlockHandle) -> Result<Block> {
        let key = CacheKey::new(&self.cache_key_prefix, handle.offset);
        if let Some(cache) = &self.ctx.block_cache {
            if let Some(pinned) = cache.lookup(&key) {
                let block = Block::clone(pinned.value());
                cache.release(pinned);
                return Ok(block);
            }
        }

        let mut cached_contents = None;
        if let Some(cache) = &self.ctx.block_cache_compressed {
            if let Some(pinned) = cache.lookup(&key) {
                cached_contents = Some(BlockContents::clone(pinned.value()));
                cache.release(pinned);
            }
        }
        let contents = match cached_contents {
            Some(contents) => contents,
            None => {
                handle.check_within(self.file_size)?;
                let contents = read_block_contents(
                    self.raw.file.as_ref(),
                    self.raw.footer.checksum,
                    handle,
                    opts.verify_checksums,
                )?;
                if opts.fill_cache && contents.compression != CompressionType::None {
                    if let Some(cache) = &self.ctx.block_cache_compressed {
                        let charge = contents.data.len();
                        match cache.insert(key.clone(), Arc::new(contents.clone()), charge) {
                            Ok(pinned) => cache.release(pinned),
                            Err(e) => log::debug!("compressed block not cached: {}", e),
                        }
                    }
                }
                contents
            }
        };

        let block = Block::new(contents.into_uncompressed(self.raw.footer.format_version, &self.raw.dict)?)?;
        if opts.fill_cache {
            if let Some(cache) = &self.ctx.block_cache {
                match cache.insert(key, Arc::new(block.clone()), block.size()) {
                    Ok(pinned) => cache.release(pinned),
                    Err(e) => log::debug!("block not cached: {}", e),
                }
            }
        }
        Ok(block)
    }

    fn index_reader(&self) -> Result<Arc<IndexReader>> {
        self.index
            .get_or_init(|| {
                let opts = ReadOptions {
                    verify_checksums: true,
                    fill_cache: false,
                };
                let top = self.read_block(&opts, &self.raw.footer.index_handle)?;
                Ok(Arc::new(match self.index_type {
                    IndexType::BinarySearch => IndexReader::Flat(top),
                    IndexType::TwoLevelIndexSearch => IndexReader::Partitioned(top),
                }))
            })
            .clone()
    }

    fn filter_reader(&self) -> Result<Option<Arc<FilterBlockReader>>> {
        self.filter.get_or_init(|| self.load_filter()).clone()
    }

    fn load_filter(&self) -> Result<Option<Arc<FilterBlockReader>>> {
        let (Some(policy), Some((kind, handle))) = (&self.ctx.filter_policy, self.filter_handle) else {
            return Ok(None);
        };
        let contents = self.raw.read(&handle, true)?;
        let policy = Arc::clone(policy);
        let reader = match kind {
            FilterKind::BlockBased => FilterBlockReader::BlockBased(BlockBasedFilterBlockReader::new(
                policy,
                self.whole_key_filtering,
                contents,
            )),
            FilterKind::Full => FilterBlockReader::Full(FullFilterBlockReader::new(
                policy.as_ref(),
                self.whole_key_filtering,
                &contents,
            )),
            FilterKind::Partitioned => {
                let raw = self.raw.clone();
                let loader: PartitionLoader = Arc::new(move |handle: &BlockHandle| raw.read(handle, true));
                FilterBlockReader::Partitioned(PartitionedFilterBlockReader::new(
                    policy,
                    self.whole_key_filtering,
                    Arc::clone(&self.comparator),
                    Block::new(contents)?,
                    loader,
                ))
            }
        };
        Ok(Some(Arc::new(reader)))
    }

    fn filter_or_none(&self) -> Option<Arc<FilterBlockReader>> {
        match self.filter_reader() {
            Ok(filter) => filter,
            Err(e) => {
                log::warn!("ignoring unreadable filter block: {}", e);
                None
            }
        }
    }

    /// Filter check for one lookup. Uses the whole key when the table
    /// filters whole keys, otherwise the key's prefix when it has one.
    fn filter_may_match(
        &self,
        filter: &FilterBlockReader,
        user_key: &[u8],
        internal_key: &[u8],
        block_offset: Option<u64>,
    ) -> bool {
        if self.whole_key_filtering {
            return filter.key_may_match(user_key, internal_key, block_offset);
        }
        match &self.ctx.prefix_extractor {
            Some(extractor) if extractor.in_domain(user_key) => {
                filter.prefix_may_match(extractor.transform(user_key), block_offset)
            }
            _ => true,
        }
    }

    fn data_block_factory(self: &Arc<Self>, opts: ReadOptions) -> BlockIterFactory {
        let rep = Arc::clone(self);
        Arc::new(move |handle_bytes: &[u8]| {
            let handle = BlockHandle::decode(handle_bytes)?;
            let block = rep.read_block(&opts, &handle)?;
            Ok(Box::new(block.iter(Arc::clone(&rep.comparator))) as Box<dyn InternalIterator>)
        })
    }

    fn index_iter(self: &Arc<Self>, opts: ReadOptions) -> Result<Box<dyn InternalIterator>> {
        let index = self.index_reader()?;
        // Index partitions are block-formatted and cached like data blocks.
        Ok(index.iter(Arc::clone(&self.comparator), self.data_block_factory(opts)))
    }
}

/// An open table file.
///
/// Cheap to share between threads; every read goes through `&self`.
#[derive(Clone)]
pub struct TableReader {
    rep: Arc<Rep>,
}

impl TableReader {
    /// Opens the table at `path` through the context's environment.
    pub fn open_path(ctx: Arc<TableContext>, path: &Path) -> Result<Self> {
        let file = ctx.env.new_random_access_file(path)?;
        let size = file.size()?;
        Self::open(ctx, file, size)
    }

    /// Opens a table of `file_size` bytes.
    ///
    /// Fails if the footer or meta-index cannot be decoded. An unreadable
    /// properties block only loses the properties; the index layout then
    /// comes from the context's table options.
    pub fn open(ctx: Arc<TableContext>, file: Arc<dyn RandomAccessFile>, file_size: u64) -> Result<Self> {
        let footer = read_footer(file.as_ref(), file_size, None)?;
        let mut raw = RawBlockReader {
            file,
            file_size,
            footer,
            dict: Bytes::new(),
        };

        let meta_index = read_meta_index(&raw)?;

        let properties = match meta_index.get(PROPERTIES_BLOCK.as_bytes()) {
            Some(handle) => match raw
                .read(handle, true)
                .and_then(Block::new)
                .and_then(|block| TableProperties::decode(&block))
            {
                Ok(props) => Some(Arc::new(props)),
                Err(e) => {
                    log::warn!("encountered error while reading data from properties block: {}", e);
                    None
                }
            },
            None => {
                log::warn!("cannot find properties block in table");
                None
            }
        };

        if let Some(handle) = meta_index.get(COMPRESSION_DICT_BLOCK.as_bytes()) {
            raw.dict = raw.read(handle, true)?;
        }
        let range_del_handle = meta_index.get(RANGE_DEL_BLOCK.as_bytes()).copied();

        let filter_handle = ctx.filter_policy.as_ref().and_then(|policy| {
            FilterKind::ALL.iter().find_map(|kind| {
                let name = format!("{}{}", kind.meta_prefix(), policy.name());
                meta_index.get(name.as_bytes()).map(|handle| (*kind, *handle))
            })
        });

        // Without readable properties the table is assumed to use the
        // configured index layout.
        let index_type = match &properties {
            Some(props) => props.index_type()?.unwrap_or(ctx.options.index_type),
            None => ctx.options.index_type,
        };
        let whole_key_filtering = properties
            .as_ref()
            .and_then(|p| p.user_collected_properties.get(names::WHOLE_KEY_FILTERING))
            .map(|v| v.as_slice() != b"0")
            .unwrap_or(ctx.options.whole_key_filtering);

        let cache_key_prefix = match raw.file.unique_id() {
            Some(id) => id,
            None => {
                let mut prefix = Vec::new();
                if let Some(cache) = &ctx.block_cache {
                    put_varint64(&mut prefix, cache.new_id());
                } else if let Some(cache) = &ctx.block_cache_compressed {
                    put_varint64(&mut prefix, cache.new_id());
                }
                prefix
            }
        };

        let rep = Arc::new(Rep {
            comparator: Arc::new(ctx.comparator.clone()),
            raw,
            file_size,
            cache_key_prefix,
            properties,
            range_del_handle,
            filter_handle,
            index_type,
            whole_key_filtering,
            index: OnceLock::new(),
            filter: OnceLock::new(),
            ctx,
        });

        if rep.ctx.options.prefetch_index_and_filter_in_open {
            rep.index_reader()?;
            rep.filter_or_none();
        }
        log::debug!(
            "opened table: {} bytes, index {:?}, filter {:?}",
            file_size,
            index_type,
            rep.filter_handle.map(|(kind, _)| kind)
        );
        Ok(Self { rep })
    }

    /// Looks up `key`, an internal key whose sequence bounds the visible
    /// entries (see [`InternalKey::for_seek`]).
    pub fn get(&self, opts: &ReadOptions, key: &[u8]) -> Result<LookupResult> {
        let rep = &self.rep;
        let target = ParsedInternalKey::parse(key)?;
        let filter = rep.filter_or_none();
        if let Some(filter) = filter.as_deref() {
            if !filter.is_block_based() && !rep.filter_may_match(filter, target.user_key, key, None) {
                return Ok(LookupResult::NotFound);
            }
        }

        let user_comparator = Arc::clone(rep.ctx.comparator.user_comparator());
        let mut index_iter = rep.index_iter(*opts)?;
        index_iter.seek(key);
        while index_iter.valid() {
            let handle = BlockHandle::decode(index_iter.value())?;
            if let Some(filter) = filter.as_deref() {
                if filter.is_block_based()
                    && !rep.filter_may_match(filter, target.user_key, key, Some(handle.offset))
                {
                    return Ok(LookupResult::NotFound);
                }
            }

            let block = rep.read_block(opts, &handle)?;
            let mut block_iter = block.iter(Arc::clone(&rep.comparator));
            block_iter.seek(key);
            if block_iter.valid() {
                let found = ParsedInternalKey::parse(block_iter.key())?;
                if user_comparator.compare(found.user_key, target.user_key) != Ordering::Equal {
                    return Ok(LookupResult::NotFound);
                }
                return match found.value_type {
                    ValueType::Value => Ok(LookupResult::Found(block_iter.value().to_vec())),
                    ValueType::Merge => Ok(LookupResult::Merge(block_iter.value().to_vec())),
                    ValueType::Deletion | ValueType::SingleDeletion => Ok(LookupResult::Deleted),
                    ValueType::RangeDeletion => Err(Error::corruption("range deletion in data block")),
                };
            }
            block_iter.status()?;
            // The target sorts after this block's last key; the next block
            // starts with the first key past it.
            index_iter.next();
        }
        index_iter.status()?;
        Ok(LookupResult::NotFound)
    }

    /// Iterator over every data entry in key order. Block errors stop the
    /// iterator and show up in its `status()`.
    pub fn iter(&self, opts: ReadOptions) -> Box<dyn InternalIterator> {
        match self.rep.index_iter(opts) {
            Ok(index_iter) => Box::new(TwoLevelIterator::new(index_iter, self.rep.data_block_factory(opts))),
            Err(e) => Box::new(EmptyIterator::with_error(e)),
        }
    }

    /// Iterator over the range deletions, keyed by start key with the end
    /// key as value.
    pub fn range_tombstones(&self, opts: &ReadOptions) -> Result<Box<dyn InternalIterator>> {
        match &self.rep.range_del_handle {
            Some(handle) => {
                let block = Block::new(self.rep.raw.read(handle, opts.verify_checksums)?)?;
                Ok(Box::new(block.iter(Arc::clone(&self.rep.comparator))))
            }
            None => Ok(Box::new(EmptyIterator::default())),
        }
    }

    /// False only if no key with `prefix` is in the table. Always true
    /// without a prefix extractor.
    pub fn prefix_may_match(&self, prefix: &[u8]) -> bool {
        let rep = &self.rep;
        if rep.ctx.prefix_extractor.is_none() {
            return true;
        }
        let Some(filter) = rep.filter_or_none() else {
            return true;
        };
        if !filter.is_block_based() {
            return filter.prefix_may_match(prefix, None);
        }

        let seek_key = InternalKey::for_seek(prefix, MAX_SEQUENCE_NUMBER);
        let mut index_iter = match rep.index_iter(ReadOptions::default()) {
            Ok(iter) => iter,
            Err(_) => return true,
        };
        index_iter.seek(seek_key.encode());
        // Keys with the prefix start in the block found or, if every key of
        // that block is smaller, in the one after it.
        for _ in 0..2 {
            if !index_iter.valid() {
                return index_iter.status().is_err();
            }
            match BlockHandle::decode(index_iter.value()) {
                Ok(handle) if filter.prefix_may_match(prefix, Some(handle.offset)) => return true,
                Ok(_) => {}
                Err(_) => return true,
            }
            index_iter.next();
        }
        false
    }

    /// Approximate file offset where the data for `key` begins.
    pub fn approximate_offset_of(&self, key: &[u8]) -> u64 {
        let metaindex_offset = self.rep.raw.footer.metaindex_handle.offset;
        let Ok(mut index_iter) = self.rep.index_iter(ReadOptions::default()) else {
            return metaindex_offset;
        };
        index_iter.seek(key);
        if index_iter.valid() {
            if let Ok(handle) = BlockHandle::decode(index_iter.value()) {
                return handle.offset;
            }
        }
        // Past the last key: the data ends where the meta blocks begin.
        metaindex_offset.min(self.rep.properties.as_ref().map_or(u64::MAX, |p| p.data_size))
    }

    /// Properties, if the properties block was readable.
    pub fn properties(&self) -> Option<Arc<TableProperties>> {
        self.rep.properties.clone()
    }

    /// Index layout of the table.
    pub fn index_type(&self) -> IndexType {
        self.rep.index_type
    }

    /// Size of the file.
    pub fn file_size(&self) -> u64 {
        self.rep.file_size
    }

    /// Bytes held by the loaded index and filter.
    pub fn approximate_memory_usage(&self) -> usize {
        let index = match self.rep.index.get() {
            Some(Ok(index)) => index.size(),
            _ => 0,
        };
        let filter = match self.rep.filter.get() {
            Some(Ok(Some(filter))) => filter.size(),
            _ => 0,
        };
        index + filter
    }
}

fn read_meta_index(raw: &RawBlockReader) -> Result<BTreeMap<Vec<u8>, BlockHandle>> {
    let block = Block::new(raw.read(&raw.footer.metaindex_handle, true)?)?;
    let mut iter = block.iter(Arc::new(BytewiseComparator));
    let mut entries = BTreeMap::new();
    iter.seek_to_first();
    while iter.valid() {
        entries.insert(iter.key().to_vec(), BlockHandle::decode(iter.value())?);
        iter.next();
    }
    iter.status()?;
    Ok(entries)
}
