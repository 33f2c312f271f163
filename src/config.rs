//! Configuration options for AiDb tables and file reclamation.
//!
//! Options are plain serde structs, so they can be loaded from JSON:
//!
//! ```no_run
//! use aidb_table::Options;
//!
//! let opts = Options::load("aidb.json").unwrap();
//! opts.validate().unwrap();
//! ```

use crate::compression::CompressionType;
use crate::error::{Error, Result};
use crate::filter::{BloomFilterPolicy, FilterPolicy};
use crate::slice_transform::{FixedPrefixTransform, SliceTransform};
use crate::sstable::format::{ChecksumType, LATEST_FORMAT_VERSION};
use crate::sstable::index::IndexType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Top-level options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Table layout and caching.
    pub table: TableOptions,
    /// Obsolete file reclamation.
    pub reclaim: ReclaimOptions,
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses options from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads options from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Serializes the options as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Sets the table options.
    pub fn table(mut self, table: TableOptions) -> Self {
        self.table = table;
        self
    }

    /// Sets the reclamation options.
    pub fn reclaim(mut self, reclaim: ReclaimOptions) -> Self {
        self.reclaim = reclaim;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> Result<()> {
        self.table.validate()?;
        self.reclaim.validate()
    }
}

/// Filter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterConfig {
    /// No filter blocks.
    None,
    /// Bloom filters.
    Bloom {
        /// Bits of filter per key.
        bits_per_key: usize,
        /// One filter per 2 KiB of data blocks instead of a full filter.
        block_based: bool,
    },
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig::Bloom {
            bits_per_key: 10,
            block_based: false,
        }
    }
}

/// Options for building and reading tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableOptions {
    /// Target uncompressed size of a data block.
    /// Default: 4KB
    pub block_size: usize,

    /// Percentage of `block_size` a block may fall short by before an
    /// entry that would overflow it starts a new block.
    /// Default: 10
    pub block_size_deviation: usize,

    /// Entries between restart points in data blocks.
    /// Default: 16
    pub block_restart_interval: usize,

    /// Entries between restart points in index blocks.
    /// Default: 1
    pub index_block_restart_interval: usize,

    /// Target size of an index or filter partition.
    /// Default: 4KB
    pub metadata_block_size: usize,

    /// Prefix-compress keys within data blocks.
    /// Default: true
    pub use_delta_encoding: bool,

    /// Index layout.
    /// Default: IndexType::BinarySearch
    pub index_type: IndexType,

    /// Partition filters along index partitions. Needs a two-level index.
    /// Default: false
    pub partition_filters: bool,

    /// Put whole user keys in the filter.
    /// Default: true
    pub whole_key_filtering: bool,

    /// Checksum stored in block trailers.
    /// Default: ChecksumType::Crc32
    pub checksum: ChecksumType,

    /// On-disk format version; 0 writes the legacy footer.
    /// Default: 2
    pub format_version: u32,

    /// Decompress every compressed block after writing it and compare.
    /// Default: false
    pub verify_compression: bool,

    /// Block compression.
    /// Default: CompressionType::Snappy when built with `snappy`
    pub compression: CompressionType,

    /// Filter policy.
    /// Default: Bloom with 10 bits per key, full filters
    pub filter: FilterConfig,

    /// Length of a fixed prefix extractor used for prefix filters.
    /// Default: None
    pub prefix_len: Option<usize>,

    /// Uncompressed block cache capacity in bytes; 0 disables it.
    /// Default: 8MB
    pub block_cache_size: usize,

    /// Compressed block cache capacity in bytes; 0 disables it.
    /// Default: 0
    pub block_cache_compressed_size: usize,

    /// Fail inserts instead of exceeding cache capacity.
    /// Default: false
    pub cache_strict_capacity: bool,

    /// Load index and filter when a table is opened.
    /// Default: true
    pub prefetch_index_and_filter_in_open: bool,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            block_size: 4 * 1024,
            block_size_deviation: 10,
            block_restart_interval: 16,
            index_block_restart_interval: 1,
            metadata_block_size: 4 * 1024,
            use_delta_encoding: true,
            index_type: IndexType::BinarySearch,
            partition_filters: false,
            whole_key_filtering: true,
            checksum: ChecksumType::Crc32,
            format_version: LATEST_FORMAT_VERSION,
            verify_compression: false,
            compression: CompressionType::default(),
            filter: FilterConfig::default(),
            prefix_len: None,
            block_cache_size: 8 * 1024 * 1024,
            block_cache_compressed_size: 0,
            cache_strict_capacity: false,
            prefetch_index_and_filter_in_open: true,
        }
    }
}

impl TableOptions {
    /// Sets the data block size.
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Sets the block size deviation percentage.
    pub fn block_size_deviation(mut self, deviation: usize) -> Self {
        self.block_size_deviation = deviation;
        self
    }

    /// Sets the data block restart interval.
    pub fn block_restart_interval(mut self, interval: usize) -> Self {
        self.block_restart_interval = interval;
        self
    }

    /// Sets the partition size of index and filter partitions.
    pub fn metadata_block_size(mut self, size: usize) -> Self {
        self.metadata_block_size = size;
        self
    }

    /// Sets the index layout.
    pub fn index_type(mut self, index_type: IndexType) -> Self {
        self.index_type = index_type;
        self
    }

    /// Enables or disables partitioned filters.
    pub fn partition_filters(mut self, value: bool) -> Self {
        self.partition_filters = value;
        self
    }

    /// Enables or disables whole-key filtering.
    pub fn whole_key_filtering(mut self, value: bool) -> Self {
        self.whole_key_filtering = value;
        self
    }

    /// Sets the block checksum.
    pub fn checksum(mut self, checksum: ChecksumType) -> Self {
        self.checksum = checksum;
        self
    }

    /// Sets the format version.
    pub fn format_version(mut self, version: u32) -> Self {
        self.format_version = version;
        self
    }

    /// Enables or disables compression verification.
    pub fn verify_compression(mut self, value: bool) -> Self {
        self.verify_compression = value;
        self
    }

    /// Sets the compression algorithm.
    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Sets the filter policy.
    pub fn filter(mut self, filter: FilterConfig) -> Self {
        self.filter = filter;
        self
    }

    /// Sets a fixed-length prefix extractor.
    pub fn prefix_len(mut self, len: Option<usize>) -> Self {
        self.prefix_len = len;
        self
    }

    /// Sets the uncompressed block cache size.
    pub fn block_cache_size(mut self, size: usize) -> Self {
        self.block_cache_size = size;
        self
    }

    /// Sets the compressed block cache size.
    pub fn block_cache_compressed_size(mut self, size: usize) -> Self {
        self.block_cache_compressed_size = size;
        self
    }

    /// Enables or disables strict cache capacity.
    pub fn cache_strict_capacity(mut self, value: bool) -> Self {
        self.cache_strict_capacity = value;
        self
    }

    /// Enables or disables loading index and filter at open.
    pub fn prefetch_index_and_filter_in_open(mut self, value: bool) -> Self {
        self.prefetch_index_and_filter_in_open = value;
        self
    }

    /// The filter policy these options describe.
    pub fn filter_policy(&self) -> Option<Arc<dyn FilterPolicy>> {
        match self.filter {
            FilterConfig::None => None,
            FilterConfig::Bloom {
                bits_per_key,
                block_based,
            } => Some(Arc::new(BloomFilterPolicy::new(bits_per_key, block_based))),
        }
    }

    /// The prefix extractor these options describe.
    pub fn prefix_extractor(&self) -> Option<Arc<dyn SliceTransform>> {
        self.prefix_len
            .map(|len| Arc::new(FixedPrefixTransform::new(len)) as Arc<dyn SliceTransform>)
    }

    /// Fixes up settings that cannot be combined.
    pub fn sanitize(&mut self) {
        if self.partition_filters && self.index_type != IndexType::TwoLevelIndexSearch {
            log::warn!("partition_filters needs a two-level index; disabling it");
            self.partition_filters = false;
        }
        if self.block_restart_interval == 0 {
            self.block_restart_interval = 1;
        }
        if self.index_block_restart_interval == 0 {
            self.index_block_restart_interval = 1;
        }
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::invalid_argument("block_size must be > 0"));
        }
        if self.block_size_deviation > 100 {
            return Err(Error::invalid_argument("block_size_deviation must be <= 100"));
        }
        if self.metadata_block_size == 0 {
            return Err(Error::invalid_argument("metadata_block_size must be > 0"));
        }
        if self.format_version > LATEST_FORMAT_VERSION {
            return Err(Error::not_supported(format!(
                "format_version {} is newer than {}",
                self.format_version, LATEST_FORMAT_VERSION
            )));
        }
        if self.format_version == 0 && self.checksum != ChecksumType::Crc32 {
            return Err(Error::invalid_argument(
                "format_version 0 only supports the CRC32 checksum",
            ));
        }
        if let FilterConfig::Bloom { bits_per_key: 0, .. } = self.filter {
            return Err(Error::invalid_argument("bits_per_key must be > 0"));
        }
        if self.prefix_len == Some(0) {
            return Err(Error::invalid_argument("prefix_len must be > 0"));
        }
        Ok(())
    }
}

/// Whether manifests and checkpoints below the current manifest are deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaFilePolicy {
    /// Keep every manifest and checkpoint.
    #[default]
    Retain,
    /// Delete manifests and checkpoints older than the current manifest.
    Reclaim,
}

/// Options for obsolete file reclamation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReclaimOptions {
    /// Data directories; the first holds the manifest and options files.
    /// Default: empty
    pub db_paths: Vec<PathBuf>,

    /// Directory of write-ahead logs.
    /// Default: None (the first db path)
    pub wal_dir: Option<PathBuf>,

    /// Directory of info logs.
    /// Default: None (the first db path)
    pub db_log_dir: Option<PathBuf>,

    /// Interval between full directory scans.
    /// Default: 6 hours
    pub delete_obsolete_files_period_micros: u64,

    /// Obsolete logs kept for reuse.
    /// Default: 0
    pub recycle_log_file_num: usize,

    /// Archived WALs older than this are deleted; 0 disables the TTL.
    /// Default: 0
    pub wal_ttl_seconds: u64,

    /// Archive size limit in MiB; 0 disables the limit.
    /// Default: 0
    pub wal_size_limit_mb: u64,

    /// Old info logs kept.
    /// Default: 1000
    pub keep_log_file_num: usize,

    /// Newest options files kept.
    /// Default: 2
    pub options_files_to_keep: usize,

    /// Two-phase commit: logs with outstanding prepare sections are kept.
    /// Default: false
    pub allow_2pc: bool,

    /// Manifest and checkpoint retention.
    /// Default: MetaFilePolicy::Retain
    pub meta_file_policy: MetaFilePolicy,

    /// Deletion rate for the delete scheduler; 0 deletes immediately.
    /// Default: 0
    pub delete_rate_bytes_per_sec: u64,
}

impl Default for ReclaimOptions {
    fn default() -> Self {
        Self {
            db_paths: Vec::new(),
            wal_dir: None,
            db_log_dir: None,
            delete_obsolete_files_period_micros: 6 * 60 * 60 * 1_000_000,
            recycle_log_file_num: 0,
            wal_ttl_seconds: 0,
            wal_size_limit_mb: 0,
            keep_log_file_num: 1000,
            options_files_to_keep: 2,
            allow_2pc: false,
            meta_file_policy: MetaFilePolicy::Retain,
            delete_rate_bytes_per_sec: 0,
        }
    }
}

impl ReclaimOptions {
    /// Options for a database living in `db_path`.
    pub fn for_path<P: Into<PathBuf>>(db_path: P) -> Self {
        Self {
            db_paths: vec![db_path.into()],
            ..Self::default()
        }
    }

    /// Sets the WAL directory.
    pub fn wal_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.wal_dir = Some(dir.into());
        self
    }

    /// Sets the info log directory.
    pub fn db_log_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.db_log_dir = Some(dir.into());
        self
    }

    /// Sets the number of logs kept for recycling.
    pub fn recycle_log_file_num(mut self, num: usize) -> Self {
        self.recycle_log_file_num = num;
        self
    }

    /// Sets the archived WAL TTL.
    pub fn wal_ttl_seconds(mut self, secs: u64) -> Self {
        self.wal_ttl_seconds = secs;
        self
    }

    /// Sets the archived WAL size limit.
    pub fn wal_size_limit_mb(mut self, mb: u64) -> Self {
        self.wal_size_limit_mb = mb;
        self
    }

    /// Sets the number of old info logs kept.
    pub fn keep_log_file_num(mut self, num: usize) -> Self {
        self.keep_log_file_num = num;
        self
    }

    /// Sets the number of options files kept.
    pub fn options_files_to_keep(mut self, num: usize) -> Self {
        self.options_files_to_keep = num;
        self
    }

    /// Enables or disables two-phase commit accounting.
    pub fn allow_2pc(mut self, value: bool) -> Self {
        self.allow_2pc = value;
        self
    }

    /// Sets the manifest and checkpoint retention policy.
    pub fn meta_file_policy(mut self, policy: MetaFilePolicy) -> Self {
        self.meta_file_policy = policy;
        self
    }

    /// Sets the delete scheduler rate.
    pub fn delete_rate_bytes_per_sec(mut self, rate: u64) -> Self {
        self.delete_rate_bytes_per_sec = rate;
        self
    }

    /// Directory of the manifest, options and temp files.
    pub fn db_dir(&self) -> Result<&Path> {
        self.db_paths
            .first()
            .map(PathBuf::as_path)
            .ok_or_else(|| Error::invalid_argument("db_paths must not be empty"))
    }

    /// Directory of write-ahead logs.
    pub fn wal_dir_or_default(&self) -> Result<&Path> {
        match &self.wal_dir {
            Some(dir) => Ok(dir),
            None => self.db_dir(),
        }
    }

    /// Directory of info logs.
    pub fn log_dir_or_default(&self) -> Result<&Path> {
        match &self.db_log_dir {
            Some(dir) => Ok(dir),
            None => self.db_dir(),
        }
    }

    /// Whether WALs are archived instead of deleted.
    pub fn archives_wal(&self) -> bool {
        self.wal_ttl_seconds > 0 || self.wal_size_limit_mb > 0
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.options_files_to_keep == 0 {
            return Err(Error::invalid_argument("options_files_to_keep must be > 0"));
        }
        Ok(())
    }
}
