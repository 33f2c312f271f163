//! Block-based table files.
//!
//! ## File Format
//!
//! ```text
//! [data block 1]
//! ...
//! [data block N]
//! [filter partitions, filter block]      // optional
//! [properties block]
//! [compression dictionary block]         // optional
//! [range deletion block]                 // optional
//! [meta-index block]                     // meta block name -> handle
//! [index partitions, index block]
//! [footer]                               // 48 bytes legacy, 53 bytes current
//! ```
//!
//! Every block is followed by a 5-byte trailer holding its compression type
//! and a checksum over the payload and the type byte.

pub mod block;
pub mod block_codec;
pub mod builder;
pub mod context;
pub mod filter_block;
pub mod flush_policy;
pub mod format;
pub mod index;
pub mod iterator;
pub mod properties;
pub mod reader;
pub mod table_cache;

pub use block::{Block, BlockBuilder, BlockIter};
pub use builder::{TableBuilder, TableBuilderOptions};
pub use context::TableContext;
pub use format::{BlockHandle, ChecksumType, Footer};
pub use index::IndexType;
pub use iterator::InternalIterator;
pub use properties::TableProperties;
pub use reader::{LookupResult, ReadOptions, TableReader};
pub use table_cache::TableCache;

/// Meta block holding the table properties.
pub const PROPERTIES_BLOCK: &str = "aidb.properties";

/// Meta block holding the compression dictionary.
pub const COMPRESSION_DICT_BLOCK: &str = "aidb.compression_dict";

/// Meta block holding range deletions.
pub const RANGE_DEL_BLOCK: &str = "aidb.range_del";
