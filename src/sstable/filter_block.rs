//! Filter blocks: per-block, per-table and per-partition filters.
//!
//! Block-based layout (one filter per 2 KiB of data-block offsets):
//! ```text
//! [filter 0] ... [filter N-1]
//! [offset of filter 0: fixed32] ... [offset of filter N-1: fixed32]
//! [offset of the offset array: fixed32]
//! [base_lg: u8]
//! ```
//! A full filter is one policy filter over every key of the table. A
//! partitioned filter is one full filter per index partition plus a
//! top-level block mapping partition separators to their handles.

use crate::comparator::Comparator;
use crate::error::Result;
use crate::filter::{FilterBitsBuilder, FilterBitsReader, FilterPolicy};
use crate::key::{InternalKey, MAX_SEQUENCE_NUMBER};
use crate::slice_transform::SliceTransform;
use crate::sstable::block::Block;
use crate::sstable::format::BlockHandle;
use crate::sstable::index::{BlockSequence, PartitionedBlockSequence, SingleBlock};
use crate::sstable::iterator::InternalIterator;
use crate::util::coding::{decode_fixed32, put_fixed32};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Generate a new filter every 2 KiB of data-block offsets.
const FILTER_BASE_LG: u8 = 11;
const FILTER_BASE: u64 = 1 << FILTER_BASE_LG;

/// Filter layouts, each stored under its own meta-index prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    /// One filter per range of data blocks.
    BlockBased,
    /// One filter for the table.
    Full,
    /// One filter per index partition.
    Partitioned,
}

impl FilterKind {
    /// Meta-index key prefix; the policy name follows it.
    pub fn meta_prefix(self) -> &'static str {
        match self {
            FilterKind::BlockBased => "filter.",
            FilterKind::Full => "fullfilter.",
            FilterKind::Partitioned => "partitionedfilter.",
        }
    }

    /// All kinds, in lookup order.
    pub const ALL: [FilterKind; 3] = [FilterKind::Full, FilterKind::Partitioned, FilterKind::BlockBased];
}

/// What to put in a filter for one user key.
#[derive(Clone)]
struct KeySelector {
    prefix_extractor: Option<Arc<dyn SliceTransform>>,
    whole_key_filtering: bool,
    last_prefix: Option<Vec<u8>>,
}

impl KeySelector {
    fn entries(&mut self, user_key: &[u8], mut emit: impl FnMut(&[u8])) {
        if self.whole_key_filtering {
            emit(user_key);
        }
        if let Some(extractor) = &self.prefix_extractor {
            if extractor.in_domain(user_key) {
                let prefix = extractor.transform(user_key);
                if self.last_prefix.as_deref() != Some(prefix) {
                    emit(prefix);
                    self.last_prefix = Some(prefix.to_vec());
                }
            }
        }
    }
}

/// Builds a filter block alongside the data blocks of a table.
pub trait FilterBlockBuilder: Send {
    /// Layout produced.
    fn kind(&self) -> FilterKind;

    /// Called with the offset of each new data block.
    fn start_block(&mut self, _block_offset: u64) {}

    /// Adds a user key of the current data block.
    fn add(&mut self, user_key: &[u8]);

    /// Called after the index entry for a data block is emitted, with the
    /// stored separator and whether the index opened a new partition for it.
    fn on_index_entry(&mut self, _separator: &[u8], _starts_new_partition: bool) {}

    /// True if no key was ever added.
    fn is_empty(&self) -> bool;

    /// Consumes the builder, returning the blocks to write.
    fn finish(self: Box<Self>) -> Result<Box<dyn BlockSequence>>;
}

/// Chooses a filter builder for a policy and table layout.
pub fn new_filter_block_builder(
    policy: Arc<dyn FilterPolicy>,
    prefix_extractor: Option<Arc<dyn SliceTransform>>,
    whole_key_filtering: bool,
    partition_filters: bool,
    index_restart_interval: usize,
) -> Box<dyn FilterBlockBuilder> {
    let selector = KeySelector {
        prefix_extractor,
        whole_key_filtering,
        last_prefix: None,
    };
    match policy.bits_builder() {
        None => Box::new(BlockBasedFilterBlockBuilder::new(policy, selector)),
        Some(bits) if partition_filters => Box::new(PartitionedFilterBlockBuilder {
            current: bits,
            selector,
            pending: Vec::new(),
            last_separator: None,
            partitions: VecDeque::new(),
            index_restart_interval,
            num_added: 0,
        }),
        Some(bits) => Box::new(FullFilterBlockBuilder {
            bits,
            selector,
            num_added: 0,
        }),
    }
}

/// One filter per 2 KiB range of data-block offsets.
pub struct BlockBasedFilterBlockBuilder {
    policy: Arc<dyn FilterPolicy>,
    selector: KeySelector,
    keys: Vec<Vec<u8>>,
    result: Vec<u8>,
    filter_offsets: Vec<u32>,
    num_added: usize,
}

impl BlockBasedFilterBlockBuilder {
    fn new(policy: Arc<dyn FilterPolicy>, selector: KeySelector) -> Self {
        Self {
            policy,
            selector,
            keys: Vec::new(),
            result: Vec::new(),
            filter_offsets: Vec::new(),
            num_added: 0,
        }
    }

    fn generate_filter(&mut self) {
        self.filter_offsets.push(self.result.len() as u32);
        if self.keys.is_empty() {
            return;
        }
        let filter = self.policy.create_filter(&self.keys);
        self.result.extend_from_slice(&filter);
        self.keys.clear();
        // Prefix dedup does not cross filter boundaries.
        self.selector.last_prefix = None;
    }
}

impl FilterBlockBuilder for BlockBasedFilterBlockBuilder {
    fn kind(&self) -> FilterKind {
        FilterKind::BlockBased
    }

    fn start_block(&mut self, block_offset: u64) {
        let filter_index = block_offset / FILTER_BASE;
        debug_assert!(filter_index >= self.filter_offsets.len() as u64);
        while filter_index > self.filter_offsets.len() as u64 {
            self.generate_filter();
        }
    }

    fn add(&mut self, user_key: &[u8]) {
        let keys = &mut self.keys;
        self.selector.entries(user_key, |entry| keys.push(entry.to_vec()));
        self.num_added += 1;
    }

    fn is_empty(&self) -> bool {
        self.num_added == 0
    }

    fn finish(mut self: Box<Self>) -> Result<Box<dyn BlockSequence>> {
        if !self.keys.is_empty() {
            self.generate_filter();
        }
        let array_offset = self.result.len() as u32;
        let mut out = std::mem::take(&mut self.result);
        for &offset in &self.filter_offsets {
            put_fixed32(&mut out, offset);
        }
        put_fixed32(&mut out, array_offset);
        out.push(FILTER_BASE_LG);
        Ok(Box::new(SingleBlock::new(Bytes::from(out))))
    }
}

/// One filter over every key of the table.
pub struct FullFilterBlockBuilder {
    bits: Box<dyn FilterBitsBuilder>,
    selector: KeySelector,
    num_added: usize,
}

impl FilterBlockBuilder for FullFilterBlockBuilder {
    fn kind(&self) -> FilterKind {
        FilterKind::Full
    }

    fn add(&mut self, user_key: &[u8]) {
        let bits = &mut self.bits;
        self.selector.entries(user_key, |entry| bits.add_key(entry));
        self.num_added += 1;
    }

    fn is_empty(&self) -> bool {
        self.num_added == 0
    }

    fn finish(mut self: Box<Self>) -> Result<Box<dyn BlockSequence>> {
        Ok(Box::new(SingleBlock::new(Bytes::from(self.bits.finish()))))
    }
}

/// One full filter per index partition.
///
/// Keys of the data block being built wait in `pending` until the index
/// entry for that block decides which partition it belongs to.
pub struct PartitionedFilterBlockBuilder {
    current: Box<dyn FilterBitsBuilder>,
    selector: KeySelector,
    pending: Vec<Vec<u8>>,
    last_separator: Option<Vec<u8>>,
    partitions: VecDeque<(Vec<u8>, Bytes)>,
    index_restart_interval: usize,
    num_added: usize,
}

impl PartitionedFilterBlockBuilder {
    fn cut_partition(&mut self) {
        if let Some(key) = self.last_separator.take() {
            let filter = self.current.finish();
            self.partitions.push_back((key, Bytes::from(filter)));
        }
    }
}

impl FilterBlockBuilder for PartitionedFilterBlockBuilder {
    fn kind(&self) -> FilterKind {
        FilterKind::Partitioned
    }

    fn add(&mut self, user_key: &[u8]) {
        let pending = &mut self.pending;
        self.selector.entries(user_key, |entry| pending.push(entry.to_vec()));
        self.num_added += 1;
    }

    fn on_index_entry(&mut self, separator: &[u8], starts_new_partition: bool) {
        if starts_new_partition {
            self.cut_partition();
        }
        for key in self.pending.drain(..) {
            self.current.add_key(&key);
        }
        self.last_separator = Some(separator.to_vec());
    }

    fn is_empty(&self) -> bool {
        self.num_added == 0
    }

    fn finish(mut self: Box<Self>) -> Result<Box<dyn BlockSequence>> {
        debug_assert!(self.pending.is_empty(), "filter keys without an index entry");
        self.cut_partition();
        let partitions = std::mem::take(&mut self.partitions);
        Ok(Box::new(PartitionedBlockSequence::new(
            partitions,
            self.index_restart_interval,
        )))
    }
}

/// Loads the contents of a filter partition.
pub type PartitionLoader = Arc<dyn Fn(&BlockHandle) -> Result<Bytes> + Send + Sync>;

/// Reader side of a filter block.
pub enum FilterBlockReader {
    /// Per-block filters, queried with a data-block offset.
    BlockBased(BlockBasedFilterBlockReader),
    /// A single table-wide filter.
    Full(FullFilterBlockReader),
    /// Per-partition filters found through a top-level block.
    Partitioned(PartitionedFilterBlockReader),
}

impl FilterBlockReader {
    /// True for per-block filters.
    pub fn is_block_based(&self) -> bool {
        matches!(self, FilterBlockReader::BlockBased(_))
    }

    /// False only if `user_key` is definitely absent. `internal_key` locates
    /// the partition; `block_offset` the per-block filter.
    pub fn key_may_match(&self, user_key: &[u8], internal_key: &[u8], block_offset: Option<u64>) -> bool {
        match self {
            FilterBlockReader::BlockBased(r) => match block_offset {
                Some(offset) => r.key_may_match(user_key, offset),
                None => true,
            },
            FilterBlockReader::Full(r) => r.key_may_match(user_key),
            FilterBlockReader::Partitioned(r) => r.key_may_match(user_key, internal_key),
        }
    }

    /// False only if no key with `prefix` is present.
    pub fn prefix_may_match(&self, prefix: &[u8], block_offset: Option<u64>) -> bool {
        match self {
            FilterBlockReader::BlockBased(r) => match block_offset {
                Some(offset) => r.prefix_may_match(prefix, offset),
                None => true,
            },
            FilterBlockReader::Full(r) => r.prefix_may_match(prefix),
            FilterBlockReader::Partitioned(r) => r.prefix_may_match(prefix),
        }
    }

    /// Bytes held in memory.
    pub fn size(&self) -> usize {
        match self {
            FilterBlockReader::BlockBased(r) => r.data.len(),
            FilterBlockReader::Full(r) => r.size,
            FilterBlockReader::Partitioned(r) => {
                r.top_level.size() + r.resident_bytes.load(AtomicOrdering::Relaxed)
            }
        }
    }
}

/// Reader for the block-based layout.
pub struct BlockBasedFilterBlockReader {
    policy: Arc<dyn FilterPolicy>,
    whole_key_filtering: bool,
    data: Bytes,
    offset_array: usize,
    num: usize,
    base_lg: u8,
}

impl BlockBasedFilterBlockReader {
    /// Parses a block-based filter. Malformed contents give a reader that
    /// matches everything.
    pub fn new(policy: Arc<dyn FilterPolicy>, whole_key_filtering: bool, data: Bytes) -> Self {
        let mut reader = Self {
            policy,
            whole_key_filtering,
            data,
            offset_array: 0,
            num: 0,
            base_lg: 0,
        };
        let n = reader.data.len();
        if n < 5 {
            return reader;
        }
        let last_word = decode_fixed32(&reader.data[n - 5..]) as usize;
        if last_word > n - 5 {
            return reader;
        }
        reader.base_lg = reader.data[n - 1];
        reader.offset_array = last_word;
        reader.num = (n - 5 - last_word) / 4;
        reader
    }

    fn matches(&self, entry: &[u8], block_offset: u64) -> bool {
        let index = (block_offset >> self.base_lg) as usize;
        if index >= self.num {
            // Errors are treated as potential matches.
            return true;
        }
        let slot = self.offset_array + index * 4;
        let start = decode_fixed32(&self.data[slot..]) as usize;
        let limit = decode_fixed32(&self.data[slot + 4..]) as usize;
        if start < limit && limit <= self.offset_array {
            self.policy.key_may_match(entry, &self.data[start..limit])
        } else if start == limit {
            // Empty filters do not match any keys.
            false
        } else {
            true
        }
    }

    fn key_may_match(&self, user_key: &[u8], block_offset: u64) -> bool {
        if !self.whole_key_filtering {
            return true;
        }
        self.matches(user_key, block_offset)
    }

    fn prefix_may_match(&self, prefix: &[u8], block_offset: u64) -> bool {
        self.matches(prefix, block_offset)
    }
}

/// Reader for a full filter.
pub struct FullFilterBlockReader {
    bits: Box<dyn FilterBitsReader>,
    whole_key_filtering: bool,
    size: usize,
}

impl FullFilterBlockReader {
    /// Wraps full-filter contents.
    pub fn new(policy: &dyn FilterPolicy, whole_key_filtering: bool, contents: &[u8]) -> Self {
        Self {
            bits: policy.bits_reader(contents),
            whole_key_filtering,
            size: contents.len(),
        }
    }

    fn key_may_match(&self, user_key: &[u8]) -> bool {
        !self.whole_key_filtering || self.bits.may_match(user_key)
    }

    fn prefix_may_match(&self, prefix: &[u8]) -> bool {
        self.bits.may_match(prefix)
    }
}

/// Reader for a partitioned filter. Partitions are decoded once, on first
/// use, and kept for the life of the reader.
pub struct PartitionedFilterBlockReader {
    policy: Arc<dyn FilterPolicy>,
    whole_key_filtering: bool,
    comparator: Arc<dyn Comparator>,
    top_level: Block,
    loader: PartitionLoader,
    // Decoded partitions by block offset.
    partitions: RwLock<HashMap<u64, Arc<dyn FilterBitsReader>>>,
    resident_bytes: AtomicUsize,
}

impl PartitionedFilterBlockReader {
    /// Creates a reader over the top-level filter index. `comparator`
    /// orders the separators (internal keys); `loader` fetches partitions.
    pub fn new(
        policy: Arc<dyn FilterPolicy>,
        whole_key_filtering: bool,
        comparator: Arc<dyn Comparator>,
        top_level: Block,
        loader: PartitionLoader,
    ) -> Self {
        Self {
            policy,
            whole_key_filtering,
            comparator,
            top_level,
            loader,
            partitions: RwLock::new(HashMap::new()),
            resident_bytes: AtomicUsize::new(0),
        }
    }

    /// Number of partitions decoded so far.
    pub fn resident_partitions(&self) -> usize {
        self.partitions.read().len()
    }

    fn partition(&self, handle_bytes: &[u8]) -> Result<Arc<dyn FilterBitsReader>> {
        let handle = BlockHandle::decode(handle_bytes)?;
        if let Some(bits) = self.partitions.read().get(&handle.offset) {
            return Ok(Arc::clone(bits));
        }
        let contents = (self.loader)(&handle)?;
        let bits: Arc<dyn FilterBitsReader> = Arc::from(self.policy.bits_reader(&contents));
        let mut partitions = self.partitions.write();
        let bits = partitions.entry(handle.offset).or_insert_with(|| {
            self.resident_bytes.fetch_add(contents.len(), AtomicOrdering::Relaxed);
            bits
        });
        Ok(Arc::clone(bits))
    }

    fn partition_may_match(&self, handle_bytes: &[u8], entry: &[u8]) -> bool {
        match self.partition(handle_bytes) {
            Ok(bits) => bits.may_match(entry),
            Err(e) => {
                log::warn!("filter partition unreadable, assuming match: {}", e);
                true
            }
        }
    }

    fn key_may_match(&self, user_key: &[u8], internal_key: &[u8]) -> bool {
        if !self.whole_key_filtering {
            return true;
        }
        let mut iter = self.top_level.iter(Arc::clone(&self.comparator));
        iter.seek(internal_key);
        if !iter.valid() {
            // Past the last partition: nothing this large is in the table.
            return iter.status().is_err();
        }
        self.partition_may_match(iter.value(), user_key)
    }

    fn prefix_may_match(&self, prefix: &[u8]) -> bool {
        let seek_key = InternalKey::for_seek(prefix, MAX_SEQUENCE_NUMBER);
        let mut iter = self.top_level.iter(Arc::clone(&self.comparator));
        iter.seek(seek_key.encode());
        // Keys with the prefix may spread over several partitions.
        while iter.valid() {
            if self.partition_may_match(iter.value(), prefix) {
                return true;
            }
            if !crate::key::extract_user_key(iter.key()).starts_with(prefix) {
                return false;
            }
            iter.next();
        }
        iter.status().is_err()
    }
}
