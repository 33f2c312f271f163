//! Table builder.
//!
//! Builds a table file from internal keys added in comparator order.
//!
//! Usage:
//! ```no_run
//! use aidb_table::config::TableOptions;
//! use aidb_table::env::{Env, PosixEnv};
//! use aidb_table::key::{InternalKey, ValueType};
//! use aidb_table::sstable::{TableBuilder, TableBuilderOptions, TableContext};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let ctx = Arc::new(TableContext::new(TableOptions::default()).unwrap());
//! let file = PosixEnv.new_writable_file(Path::new("000001.sst")).unwrap();
//! let mut builder = TableBuilder::new(ctx, file, TableBuilderOptions::default());
//! let key = InternalKey::new(b"key1", 1, ValueType::Value);
//! builder.add(key.encode(), b"value1").unwrap();
//! builder.finish().unwrap();
//! ```

use crate::cache::CacheKey;
use crate::compression::CompressionType;
use crate::comparator::Comparator;
use crate::env::WritableFile;
use crate::error::{Error, Result};
use crate::key::{ParsedInternalKey, ValueType};
use crate::sstable::block::BlockBuilder;
use crate::sstable::block_codec::{block_trailer, compress_block, BlockContents};
use crate::sstable::context::TableContext;
use crate::sstable::filter_block::{new_filter_block_builder, FilterBlockBuilder};
use crate::sstable::flush_policy::{FlushBlockBySizePolicy, FlushBlockPolicy};
use crate::sstable::format::{BlockHandle, Footer, BLOCK_TRAILER_SIZE};
use crate::sstable::index::{new_index_builder, BlockSequence, FinishStep, IndexBuilder, IndexType};
use crate::sstable::properties::{
    BlockBasedTablePropertiesCollector, EntryType, InternalKeyPropertiesCollector, TableProperties,
    TablePropertiesCollector,
};
use crate::sstable::{COMPRESSION_DICT_BLOCK, PROPERTIES_BLOCK, RANGE_DEL_BLOCK};
use crate::util::coding::put_varint64;
use bytes::Bytes;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Per-table settings that are not shared through [`TableContext`].
#[derive(Debug, Clone, Default)]
pub struct TableBuilderOptions {
    /// Column family the table belongs to.
    pub column_family_id: u64,
    /// Column family name.
    pub column_family_name: String,
    /// Dictionary handed to the compressor; stored in the table when set.
    pub compression_dict: Vec<u8>,
    /// Overrides the compression from the table options.
    pub compression: Option<CompressionType>,
}

/// Appends blocks to the file and tracks the write offset.
struct BlockWriter {
    file: Box<dyn WritableFile>,
    offset: u64,
    cache_key_prefix: Vec<u8>,
}

impl BlockWriter {
    /// Writes `payload` as stored bytes tagged `ctype`.
    fn write_raw_block(
        &mut self,
        ctx: &TableContext,
        payload: &[u8],
        ctype: CompressionType,
    ) -> Result<BlockHandle> {
        let handle = BlockHandle::new(self.offset, payload.len() as u64);
        let trailer = block_trailer(payload, ctype, ctx.options.checksum);
        self.file.append(payload)?;
        self.file.append(&trailer)?;
        self.offset += (payload.len() + BLOCK_TRAILER_SIZE) as u64;

        if ctype != CompressionType::None {
            if let Some(cache) = &ctx.block_cache_compressed {
                let contents = BlockContents {
                    data: Bytes::copy_from_slice(payload),
                    compression: ctype,
                };
                let key = CacheKey::new(&self.cache_key_prefix, handle.offset);
                match cache.insert(key, Arc::new(contents), payload.len()) {
                    Ok(pinned) => cache.release(pinned),
                    Err(e) => log::debug!("compressed block not cached: {}", e),
                }
            }
        }
        Ok(handle)
    }

    /// Compresses `raw` when that pays off and writes it.
    fn write_block(
        &mut self,
        ctx: &TableContext,
        raw: &[u8],
        ctype: CompressionType,
        dict: &[u8],
    ) -> Result<BlockHandle> {
        let (payload, stored_type) = compress_block(
            raw,
            ctype,
            ctx.options.format_version,
            dict,
            ctx.options.verify_compression,
        )?;
        self.write_raw_block(ctx, &payload, stored_type)
    }

    /// Writes every block of `seq`; returns the handle of the final one.
    fn write_sequence(
        &mut self,
        ctx: &TableContext,
        mut seq: Box<dyn BlockSequence>,
        ctype: CompressionType,
        dict: &[u8],
    ) -> Result<(BlockHandle, u64)> {
        let mut last = None;
        let mut written = 0u64;
        loop {
            match seq.next_block(last)? {
                FinishStep::Incomplete(block) => {
                    let handle = self.write_block(ctx, &block, ctype, dict)?;
                    written += handle.size;
                    last = Some(handle);
                }
                FinishStep::Complete(block) => {
                    let handle = self.write_block(ctx, &block, ctype, dict)?;
                    written += handle.size;
                    return Ok((handle, written));
                }
            }
        }
    }
}

/// Builds one table file.
///
/// Keys are encoded internal keys and must be added in increasing order;
/// range deletions go to their own meta block. Once an operation fails the
/// builder keeps returning that error. Every builder must end with
/// [`finish`](Self::finish) or [`abandon`](Self::abandon).
pub struct TableBuilder {
    ctx: Arc<TableContext>,
    writer: BlockWriter,
    // First error; later calls return it.
    status: Option<Error>,
    data_block: BlockBuilder,
    range_del_block: BlockBuilder,
    // Taken by `finish`.
    index_builder: Option<Box<dyn IndexBuilder>>,
    filter_builder: Option<Box<dyn FilterBlockBuilder>>,
    flush_policy: Box<dyn FlushBlockPolicy>,
    collectors: Vec<Box<dyn TablePropertiesCollector>>,
    last_key: Vec<u8>,
    props: TableProperties,
    compression: CompressionType,
    compression_dict: Vec<u8>,
    closed: bool,
}

impl TableBuilder {
    /// Creates a builder writing to `file`.
    pub fn new(ctx: Arc<TableContext>, file: Box<dyn WritableFile>, opts: TableBuilderOptions) -> Self {
        let table_opts = &ctx.options;
        let index_builder = new_index_builder(
            table_opts.index_type,
            ctx.comparator.clone(),
            table_opts.index_block_restart_interval,
            table_opts.metadata_block_size,
            table_opts.block_size_deviation,
        );
        let mut filter_builder = ctx.filter_policy.as_ref().map(|policy| {
            new_filter_block_builder(
                Arc::clone(policy),
                ctx.prefix_extractor.clone(),
                table_opts.whole_key_filtering,
                table_opts.partition_filters,
                table_opts.index_block_restart_interval,
            )
        });
        if let Some(filter) = filter_builder.as_mut() {
            filter.start_block(0);
        }

        let mut collectors: Vec<Box<dyn TablePropertiesCollector>> = vec![
            Box::new(InternalKeyPropertiesCollector::default()),
            Box::new(BlockBasedTablePropertiesCollector::new(
                table_opts.index_type,
                table_opts.whole_key_filtering,
                ctx.prefix_extractor.is_some(),
            )),
        ];
        collectors.extend(ctx.collector_factories.iter().map(|f| f.create_collector()));

        let cache_key_prefix = match file.unique_id() {
            Some(id) => id,
            None => {
                let mut prefix = Vec::new();
                if let Some(cache) = &ctx.block_cache_compressed {
                    put_varint64(&mut prefix, cache.new_id());
                }
                prefix
            }
        };

        let compression = opts.compression.unwrap_or(table_opts.compression);
        let props = TableProperties {
            format_version: table_opts.format_version as u64,
            column_family_id: opts.column_family_id,
            column_family_name: opts.column_family_name,
            comparator_name: ctx.comparator.name().to_string(),
            filter_policy_name: ctx
                .filter_policy
                .as_ref()
                .map(|p| p.name().to_string())
                .unwrap_or_default(),
            prefix_extractor_name: ctx
                .prefix_extractor
                .as_ref()
                .map(|p| p.name().to_string())
                .unwrap_or_else(|| "nullptr".to_string()),
            compression_name: compression.name().to_string(),
            property_collectors_names: format!(
                "[{}]",
                collectors.iter().map(|c| c.name()).collect::<Vec<_>>().join(",")
            ),
            ..TableProperties::default()
        };

        Self {
            data_block: BlockBuilder::with_delta_encoding(
                table_opts.block_restart_interval,
                table_opts.use_delta_encoding,
            ),
            range_del_block: BlockBuilder::new(1),
            index_builder: Some(index_builder),
            filter_builder,
            flush_policy: Box::new(FlushBlockBySizePolicy::new(
                table_opts.block_size,
                table_opts.block_size_deviation,
            )),
            collectors,
            writer: BlockWriter {
                file,
                offset: 0,
                cache_key_prefix,
            },
            status: None,
            last_key: Vec::new(),
            props,
            compression,
            compression_dict: opts.compression_dict,
            closed: false,
            ctx,
        }
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if self.status.is_none() {
                self.status = Some(e.clone());
            }
        }
        result
    }

    fn check_status(&self) -> Result<()> {
        match &self.status {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    /// Adds an entry. `key` is an encoded internal key no smaller than any
    /// key added before; repeating the previous key is allowed.
    ///
    /// # Panics
    ///
    /// Panics if keys go backwards or the builder was already closed.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        assert!(!self.closed, "add after finish or abandon");
        self.check_status()?;

        let parsed = ParsedInternalKey::parse(key)?;
        let entry_type = EntryType::from(parsed.value_type);

        if parsed.value_type == ValueType::RangeDeletion {
            self.range_del_block.add(key, value);
            self.props.num_range_deletions += 1;
        } else {
            if self.props.num_entries > 0 {
                assert_ne!(
                    self.ctx.comparator.compare(key, &self.last_key),
                    Ordering::Less,
                    "keys must be added in non-decreasing order"
                );
            }

            if self.flush_policy.update(key, value, &self.data_block) {
                let handle = self.flush()?;
                self.add_index_entry(Some(key), handle);
            }

            if let Some(filter) = self.filter_builder.as_mut() {
                filter.add(parsed.user_key);
            }

            self.last_key.clear();
            self.last_key.extend_from_slice(key);
            self.data_block.add(key, value);
            self.props.num_entries += 1;
        }
        self.props.raw_key_size += key.len() as u64;
        self.props.raw_value_size += value.len() as u64;

        let file_size = self.writer.offset;
        for collector in &mut self.collectors {
            if let Err(e) = collector.add_user_key(parsed.user_key, value, entry_type, parsed.sequence, file_size) {
                log::warn!("property collector {} failed: {}", collector.name(), e);
            }
        }
        Ok(())
    }

    /// Writes the current data block.
    fn flush(&mut self) -> Result<BlockHandle> {
        debug_assert!(!self.data_block.is_empty());
        let result = self.writer.write_block(
            &self.ctx,
            self.data_block.finish(),
            self.compression,
            &self.compression_dict,
        );
        let handle = self.record(result)?;
        self.data_block.reset();
        self.props.num_data_blocks += 1;
        self.props.data_size = self.writer.offset;
        if let Some(filter) = self.filter_builder.as_mut() {
            filter.start_block(self.writer.offset);
        }
        log::debug!("flushed data block at {} ({} bytes)", handle.offset, handle.size);
        Ok(handle)
    }

    /// Adds the index entry of the block just flushed. Filter keys of the
    /// next block are only added after this, so the filter partitions line
    /// up with the index partitions.
    fn add_index_entry(&mut self, next_key: Option<&[u8]>, handle: BlockHandle) {
        let Some(index_builder) = self.index_builder.as_mut() else {
            return;
        };
        let starts_new_partition = index_builder.add_index_entry(&mut self.last_key, next_key, handle);
        if let Some(filter) = self.filter_builder.as_mut() {
            filter.on_index_entry(&self.last_key, starts_new_partition);
        }
    }

    /// Finishes the table: flushes the last block, writes filter, meta
    /// blocks, meta-index, index and footer, then syncs the file.
    ///
    /// Returns the file size.
    pub fn finish(&mut self) -> Result<u64> {
        assert!(!self.closed, "finish after finish or abandon");
        self.closed = true;
        self.check_status()?;
        let result = self.write_tail();
        self.record(result)
    }

    fn write_tail(&mut self) -> Result<u64> {
        if !self.data_block.is_empty() {
            let handle = self.flush()?;
            self.add_index_entry(None, handle);
        }

        let ctx = Arc::clone(&self.ctx);
        let mut meta_index: BTreeMap<String, BlockHandle> = BTreeMap::new();

        // Filter partitions and the filter itself, stored uncompressed.
        if let Some(filter) = self.filter_builder.take() {
            if !filter.is_empty() {
                let name = format!(
                    "{}{}",
                    filter.kind().meta_prefix(),
                    self.props.filter_policy_name
                );
                let (handle, size) =
                    self.writer
                        .write_sequence(&ctx, filter.finish()?, CompressionType::None, &[])?;
                self.props.filter_size = size;
                meta_index.insert(name, handle);
            }
        }

        // The index is written after the meta-index; only its size is
        // known here.
        let index_builder = self
            .index_builder
            .take()
            .ok_or_else(|| Error::invalid_state("index already finished"))?;
        let index_type = index_builder.index_type();
        let num_partitions = index_builder.num_partitions();
        let index_blocks = index_builder.finish()?;
        self.props.index_size = index_blocks.estimated_size() as u64;
        if index_type == IndexType::TwoLevelIndexSearch {
            self.props.index_partitions = num_partitions as u64;
            self.props.top_level_index_size = index_blocks.estimated_top_level_size() as u64;
        }

        // Properties.
        self.props.creation_time = ctx.env.now_micros() / 1_000_000;
        for collector in &mut self.collectors {
            if let Err(e) = collector.finish(&mut self.props.user_collected_properties) {
                log::warn!("property collector {} failed to finish: {}", collector.name(), e);
            }
            self.props.readable_properties.extend(collector.readable_properties());
        }
        let encoded = self.props.encode();
        let handle = self.writer.write_raw_block(&ctx, &encoded, CompressionType::None)?;
        meta_index.insert(PROPERTIES_BLOCK.to_string(), handle);

        if !self.compression_dict.is_empty() {
            let handle =
                self.writer
                    .write_raw_block(&ctx, &self.compression_dict, CompressionType::None)?;
            meta_index.insert(COMPRESSION_DICT_BLOCK.to_string(), handle);
        }

        if !self.range_del_block.is_empty() {
            let handle =
                self.writer
                    .write_raw_block(&ctx, self.range_del_block.finish(), CompressionType::None)?;
            meta_index.insert(RANGE_DEL_BLOCK.to_string(), handle);
        }

        let mut meta_index_block = BlockBuilder::new(1);
        for (name, handle) in &meta_index {
            meta_index_block.add(name.as_bytes(), &handle.encode());
        }
        let metaindex_handle =
            self.writer
                .write_raw_block(&ctx, meta_index_block.finish(), CompressionType::None)?;

        let (index_handle, _) = self.writer.write_sequence(
            &ctx,
            index_blocks,
            self.compression,
            &self.compression_dict,
        )?;

        let footer = Footer::new(
            ctx.options.format_version,
            ctx.options.checksum,
            metaindex_handle,
            index_handle,
        );
        let encoded = footer.encode();
        self.writer.file.append(&encoded)?;
        self.writer.offset += encoded.len() as u64;
        self.writer.file.flush()?;
        self.writer.file.sync()?;

        log::debug!(
            "finished table: {} entries in {} data blocks, {} bytes",
            self.props.num_entries,
            self.props.num_data_blocks,
            self.writer.offset
        );
        Ok(self.writer.offset)
    }

    /// Stops building; the caller deletes the partial file.
    pub fn abandon(&mut self) {
        assert!(!self.closed, "abandon after finish or abandon");
        self.closed = true;
    }

    /// The first error met, if any.
    pub fn status(&self) -> Result<()> {
        self.check_status()
    }

    /// Entries added so far, range deletions excluded.
    pub fn num_entries(&self) -> u64 {
        self.props.num_entries
    }

    /// Bytes written so far.
    pub fn file_size(&self) -> u64 {
        self.writer.offset
    }

    /// True if any collector asks for compaction.
    pub fn need_compact(&self) -> bool {
        self.collectors.iter().any(|c| c.need_compact())
    }

    /// Properties collected so far; complete after `finish`.
    pub fn table_properties(&self) -> &TableProperties {
        &self.props
    }
}

impl Drop for TableBuilder {
    fn drop(&mut self) {
        if !self.closed {
            log::warn!("table builder dropped without finish or abandon");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FilterConfig, TableOptions};
    use crate::env::{Env, PosixEnv};
    use crate::key::InternalKey;
    use crate::sstable::format::read_footer;
    use tempfile::TempDir;

    fn ikey(user_key: &str, seq: u64, value_type: ValueType) -> Vec<u8> {
        InternalKey::new(user_key.as_bytes(), seq, value_type).into_encoded()
    }

    fn builder(dir: &TempDir, options: TableOptions) -> (TableBuilder, std::path::PathBuf) {
        let path = dir.path().join("000001.sst");
        let ctx = Arc::new(TableContext::new(options).unwrap());
        let file = PosixEnv.new_writable_file(&path).unwrap();
        (TableBuilder::new(ctx, file, TableBuilderOptions::default()), path)
    }

    #[test]
    fn test_finish_writes_footer() {
        let dir = TempDir::new().unwrap();
        let (mut builder, path) = builder(&dir, TableOptions::default().block_size(128));
        for i in 0..200 {
            let key = ikey(&format!("key{:05}", i), 1, ValueType::Value);
            builder.add(&key, format!("value{}", i).as_bytes()).unwrap();
        }
        assert_eq!(builder.num_entries(), 200);
        let size = builder.finish().unwrap();
        assert_eq!(size, std::fs::metadata(&path).unwrap().len());

        let props = builder.table_properties();
        assert!(props.num_data_blocks > 1);
        assert!(props.index_size > 0);
        assert!(props.filter_size > 0);
        assert_eq!(props.index_type().unwrap(), Some(IndexType::BinarySearch));

        let file = PosixEnv.new_random_access_file(&path).unwrap();
        let footer = read_footer(file.as_ref(), size, None).unwrap();
        assert_eq!(footer.index_handle.end_offset() + Footer::NEW_ENCODED_LENGTH as u64, size);
    }

    #[test]
    #[should_panic(expected = "non-decreasing order")]
    fn test_out_of_order_add_panics() {
        let dir = TempDir::new().unwrap();
        let (mut builder, _) = builder(&dir, TableOptions::default());
        builder.add(&ikey("b", 1, ValueType::Value), b"").unwrap();
        builder.add(&ikey("a", 1, ValueType::Value), b"").unwrap();
    }

    #[test]
    fn test_repeated_key_accepted() {
        let dir = TempDir::new().unwrap();
        let (mut builder, path) = builder(&dir, TableOptions::default().block_size(16));
        let dup = ikey("dup", 5, ValueType::Value);
        builder.add(&ikey("a", 1, ValueType::Value), b"x").unwrap();
        builder.add(&dup, b"first").unwrap();
        // The tiny block size puts the repeat in its own block.
        builder.add(&dup, b"second").unwrap();
        builder.add(&ikey("z", 1, ValueType::Value), b"y").unwrap();
        builder.finish().unwrap();
        assert_eq!(builder.num_entries(), 4);

        let ctx = Arc::new(TableContext::new(TableOptions::default()).unwrap());
        let reader = crate::sstable::TableReader::open_path(ctx, &path).unwrap();
        let lookup = InternalKey::for_seek(b"dup", crate::key::MAX_SEQUENCE_NUMBER);
        assert_eq!(
            reader.get(&crate::sstable::ReadOptions::default(), lookup.encode()).unwrap(),
            crate::sstable::LookupResult::Found(b"first".to_vec())
        );
    }

    #[test]
    fn test_range_deletions_kept_apart() {
        let dir = TempDir::new().unwrap();
        let (mut builder, _) = builder(&dir, TableOptions::default().filter(FilterConfig::None));
        builder.add(&ikey("a", 5, ValueType::Value), b"1").unwrap();
        builder.add(&ikey("b", 4, ValueType::RangeDeletion), b"d").unwrap();
        builder.add(&ikey("c", 3, ValueType::Deletion), b"").unwrap();
        builder.finish().unwrap();

        let props = builder.table_properties();
        assert_eq!(props.num_entries, 2);
        assert_eq!(props.num_range_deletions, 1);
        assert_eq!(props.filter_size, 0);
        assert_eq!(props.user_u64(crate::sstable::properties::names::DELETED_KEYS), Some(1));
    }

    #[test]
    fn test_partitioned_index_properties() {
        let dir = TempDir::new().unwrap();
        let options = TableOptions::default()
            .block_size(64)
            .metadata_block_size(64)
            .index_type(IndexType::TwoLevelIndexSearch)
            .partition_filters(true);
        let (mut builder, _) = builder(&dir, options);
        for i in 0..500 {
            builder
                .add(&ikey(&format!("key{:05}", i), 1, ValueType::Value), b"v")
                .unwrap();
        }
        builder.finish().unwrap();
        let props = builder.table_properties();
        assert!(props.index_partitions > 1);
        assert!(props.top_level_index_size > 0);
        assert!(props.top_level_index_size < props.index_size);
    }

    #[test]
    fn test_abandon() {
        let dir = TempDir::new().unwrap();
        let (mut builder, _) = builder(&dir, TableOptions::default());
        builder.add(&ikey("a", 1, ValueType::Value), b"").unwrap();
        builder.abandon();
        assert!(builder.status().is_ok());
        assert_eq!(builder.num_entries(), 1);
    }
}
