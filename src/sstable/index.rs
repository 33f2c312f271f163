//! Index blocks map key ranges to block handles.
//!
//! Each index entry is `separator -> BlockHandle`, where the separator is a
//! short key `>=` every key of its block and `<` every key of the next one.
//! A two-level index splits the entries into partitions and adds a
//! top-level block mapping each partition's last separator to its handle.
//!
//! Finishing an index may yield several blocks. [`BlockSequence`] hands
//! them out one at a time: each `Incomplete` step is a partition the
//! caller must write, reporting where it landed on the next call; the
//! `Complete` step carries the final (top-level) block.

use crate::comparator::{Comparator, InternalKeyComparator};
use crate::error::{Error, Result};
use crate::sstable::block::{Block, BlockBuilder};
use crate::sstable::flush_policy::{FlushBlockBySizePolicy, FlushBlockPolicy};
use crate::sstable::format::BlockHandle;
use crate::sstable::iterator::{BlockIterFactory, InternalIterator, TwoLevelIterator};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Index layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u32)]
pub enum IndexType {
    /// One flat index block searched by binary search.
    #[default]
    BinarySearch = 0,
    /// Partitioned index with a top-level block.
    TwoLevelIndexSearch = 2,
}

impl IndexType {
    /// Convert from the value stored in table properties.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(IndexType::BinarySearch),
            2 => Some(IndexType::TwoLevelIndexSearch),
            _ => None,
        }
    }
}

/// One step of a multi-block finish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishStep {
    /// A block to write; more follow.
    Incomplete(Bytes),
    /// The last block.
    Complete(Bytes),
}

/// Yields the blocks of a finished index or filter.
pub trait BlockSequence: Send {
    /// Returns the next block. `last_written` is the handle of the block
    /// returned by the previous call, `None` on the first call.
    fn next_block(&mut self, last_written: Option<BlockHandle>) -> Result<FinishStep>;

    /// Uncompressed bytes of the blocks not yet handed out.
    fn estimated_size(&self) -> usize;

    /// Estimated size of the top-level block; 0 for a single block.
    fn estimated_top_level_size(&self) -> usize {
        0
    }
}

/// A sequence of exactly one block.
pub(crate) struct SingleBlock(Option<Bytes>);

impl SingleBlock {
    pub(crate) fn new(contents: Bytes) -> Self {
        Self(Some(contents))
    }
}

impl BlockSequence for SingleBlock {
    fn next_block(&mut self, _last_written: Option<BlockHandle>) -> Result<FinishStep> {
        self.0
            .take()
            .map(FinishStep::Complete)
            .ok_or_else(|| Error::invalid_state("block sequence already complete"))
    }

    fn estimated_size(&self) -> usize {
        self.0.as_ref().map_or(0, Bytes::len)
    }
}

/// Emits each partition, then a top-level block mapping every partition
/// key to the handle the partition was written at.
pub(crate) struct PartitionedBlockSequence {
    partitions: VecDeque<(Vec<u8>, Bytes)>,
    top_level: BlockBuilder,
    // Key of the partition handed out by the previous call.
    pending_key: Option<Vec<u8>>,
}

impl PartitionedBlockSequence {
    pub(crate) fn new(partitions: VecDeque<(Vec<u8>, Bytes)>, restart_interval: usize) -> Self {
        Self {
            partitions,
            top_level: BlockBuilder::new(restart_interval),
            pending_key: None,
        }
    }
}

impl BlockSequence for PartitionedBlockSequence {
    fn next_block(&mut self, last_written: Option<BlockHandle>) -> Result<FinishStep> {
        if let Some(key) = self.pending_key.take() {
            let handle = last_written
                .ok_or_else(|| Error::invalid_state("partition written without a handle"))?;
            self.top_level.add(&key, &handle.encode());
        }
        match self.partitions.pop_front() {
            Some((key, contents)) => {
                self.pending_key = Some(key);
                Ok(FinishStep::Incomplete(contents))
            }
            None => Ok(FinishStep::Complete(Bytes::copy_from_slice(
                self.top_level.finish(),
            ))),
        }
    }

    fn estimated_size(&self) -> usize {
        let partitions: usize = self.partitions.iter().map(|(_, block)| block.len()).sum();
        partitions + self.estimated_top_level_size()
    }

    fn estimated_top_level_size(&self) -> usize {
        // Per entry: three varint headers, the key, a handle and a restart slot.
        let pending: usize = self
            .partitions
            .iter()
            .map(|(key, _)| 3 + key.len() + BlockHandle::MAX_ENCODED_LENGTH + 4)
            .sum();
        self.top_level.current_size_estimate() + pending
    }
}

/// Accumulates index entries while a table is built.
pub trait IndexBuilder: Send {
    /// Adds the entry for a finished data block. `last_key_in_current_block`
    /// is shortened in place to the separator actually stored;
    /// `first_key_in_next_block` is `None` for the last block of the file.
    ///
    /// Returns true if a new index partition was started before this entry.
    fn add_index_entry(
        &mut self,
        last_key_in_current_block: &mut Vec<u8>,
        first_key_in_next_block: Option<&[u8]>,
        block_handle: BlockHandle,
    ) -> bool;

    /// Layout this builder produces.
    fn index_type(&self) -> IndexType;

    /// Number of index partitions so far (1 for a flat index).
    fn num_partitions(&self) -> usize {
        1
    }

    /// Consumes the builder, returning the blocks to write.
    fn finish(self: Box<Self>) -> Result<Box<dyn BlockSequence>>;
}

/// Flat index with shortened separators.
pub struct ShortenedIndexBuilder {
    comparator: InternalKeyComparator,
    block: BlockBuilder,
}

impl ShortenedIndexBuilder {
    /// Creates a flat index builder.
    pub fn new(comparator: InternalKeyComparator, restart_interval: usize) -> Self {
        Self {
            comparator,
            block: BlockBuilder::new(restart_interval),
        }
    }

    fn add_entry(
        &mut self,
        last_key: &mut Vec<u8>,
        next_key: Option<&[u8]>,
        handle: BlockHandle,
    ) {
        match next_key {
            Some(next) => self.comparator.find_shortest_separator(last_key, next),
            None => self.comparator.find_short_successor(last_key),
        }
        self.block.add(last_key, &handle.encode());
    }

    fn finish_block(&mut self) -> Bytes {
        Bytes::copy_from_slice(self.block.finish())
    }

    fn block(&self) -> &BlockBuilder {
        &self.block
    }
}

impl IndexBuilder for ShortenedIndexBuilder {
    fn add_index_entry(
        &mut self,
        last_key_in_current_block: &mut Vec<u8>,
        first_key_in_next_block: Option<&[u8]>,
        block_handle: BlockHandle,
    ) -> bool {
        self.add_entry(last_key_in_current_block, first_key_in_next_block, block_handle);
        false
    }

    fn index_type(&self) -> IndexType {
        IndexType::BinarySearch
    }

    fn finish(mut self: Box<Self>) -> Result<Box<dyn BlockSequence>> {
        Ok(Box::new(SingleBlock::new(self.finish_block())))
    }
}

/// Two-level index. A size policy over the open sub-index decides where
/// partitions are cut.
pub struct PartitionedIndexBuilder {
    comparator: InternalKeyComparator,
    restart_interval: usize,
    closed: VecDeque<(Vec<u8>, Bytes)>,
    sub_builder: Option<ShortenedIndexBuilder>,
    sub_index_last_key: Vec<u8>,
    flush_policy: FlushBlockBySizePolicy,
}

impl PartitionedIndexBuilder {
    /// Creates a two-level index builder cutting partitions near
    /// `metadata_block_size` bytes.
    pub fn new(
        comparator: InternalKeyComparator,
        restart_interval: usize,
        metadata_block_size: usize,
        block_size_deviation: usize,
    ) -> Self {
        Self {
            comparator,
            restart_interval,
            closed: VecDeque::new(),
            sub_builder: None,
            sub_index_last_key: Vec::new(),
            flush_policy: FlushBlockBySizePolicy::new(metadata_block_size, block_size_deviation),
        }
    }

    fn close_partition(&mut self) {
        if let Some(mut sub) = self.sub_builder.take() {
            let contents = sub.finish_block();
            self.closed
                .push_back((std::mem::take(&mut self.sub_index_last_key), contents));
        }
    }
}

impl IndexBuilder for PartitionedIndexBuilder {
    fn add_index_entry(
        &mut self,
        last_key_in_current_block: &mut Vec<u8>,
        first_key_in_next_block: Option<&[u8]>,
        block_handle: BlockHandle,
    ) -> bool {
        let mut cut = false;
        if first_key_in_next_block.is_some() {
            if let Some(sub) = &self.sub_builder {
                let encoded = block_handle.encode();
                if self
                    .flush_policy
                    .update(last_key_in_current_block, &encoded, sub.block())
                {
                    self.close_partition();
                    cut = true;
                }
            }
        }

        let comparator = self.comparator.clone();
        let restart_interval = self.restart_interval;
        let sub = self
            .sub_builder
            .get_or_insert_with(|| ShortenedIndexBuilder::new(comparator, restart_interval));
        sub.add_entry(last_key_in_current_block, first_key_in_next_block, block_handle);
        self.sub_index_last_key = last_key_in_current_block.clone();

        if first_key_in_next_block.is_none() {
            self.close_partition();
        }
        cut
    }

    fn index_type(&self) -> IndexType {
        IndexType::TwoLevelIndexSearch
    }

    fn num_partitions(&self) -> usize {
        self.closed.len() + usize::from(self.sub_builder.is_some())
    }

    fn finish(mut self: Box<Self>) -> Result<Box<dyn BlockSequence>> {
        self.close_partition();
        let partitions = std::mem::take(&mut self.closed);
        Ok(Box::new(PartitionedBlockSequence::new(
            partitions,
            self.restart_interval,
        )))
    }
}

/// Creates the index builder for `index_type`.
pub fn new_index_builder(
    index_type: IndexType,
    comparator: InternalKeyComparator,
    restart_interval: usize,
    metadata_block_size: usize,
    block_size_deviation: usize,
) -> Box<dyn IndexBuilder> {
    match index_type {
        IndexType::BinarySearch => Box::new(ShortenedIndexBuilder::new(comparator, restart_interval)),
        IndexType::TwoLevelIndexSearch => Box::new(PartitionedIndexBuilder::new(
            comparator,
            restart_interval,
            metadata_block_size,
            block_size_deviation,
        )),
    }
}

/// Reader side of an index.
#[derive(Debug, Clone)]
pub enum IndexReader {
    /// A single index block.
    Flat(Block),
    /// The top-level block of a partitioned index.
    Partitioned(Block),
}

impl IndexReader {
    /// Iterator whose values are encoded data block handles.
    ///
    /// For a partitioned index, `partition_factory` opens partition blocks.
    pub fn iter(
        &self,
        comparator: Arc<dyn Comparator>,
        partition_factory: BlockIterFactory,
    ) -> Box<dyn InternalIterator> {
        match self {
            IndexReader::Flat(block) => Box::new(block.iter(comparator)),
            IndexReader::Partitioned(top) => Box::new(TwoLevelIterator::new(
                Box::new(top.iter(comparator)),
                partition_factory,
            )),
        }
    }

    /// Bytes held in memory.
    pub fn size(&self) -> usize {
        match self {
            IndexReader::Flat(block) | IndexReader::Partitioned(block) => block.size(),
        }
    }
}

/// Writes out a sequence as if block `i` landed right after block `i - 1`,
/// returning the partitions and the final block.
#[cfg(test)]
pub(crate) fn drain_sequence(mut seq: Box<dyn BlockSequence>) -> (Vec<Bytes>, Bytes) {
    let mut partitions = Vec::new();
    let mut offset = 0u64;
    let mut last = None;
    loop {
        match seq.next_block(last).unwrap() {
            FinishStep::Incomplete(block) => {
                assert!(!block.is_empty());
                last = Some(BlockHandle::new(offset, block.len() as u64));
                offset += block.len() as u64 + crate::sstable::format::BLOCK_TRAILER_SIZE as u64;
                partitions.push(block);
            }
            FinishStep::Complete(block) => return (partitions, block),
        }
    }
}
