//! # AiDb Table - Block-Based SSTables for an LSM-Tree Engine
//!
//! This crate holds the on-disk table layer of the AiDb storage engine and
//! the reclamation of files the engine no longer references.
//!
//! ## Architecture
//!
//! - **Block Codec**: prefix-compressed blocks with restart points, optional
//!   compression and a checksummed trailer
//! - **Filter Blocks**: block-based, full and partitioned Bloom filters
//! - **Index**: flat binary-search index or a partitioned two-level index
//! - **Table Builder**: streams sorted internal keys into a table file
//! - **Table Reader**: point lookups and iteration through the block caches
//! - **File Reclamation**: finds obsolete tables, logs and metadata files
//!   and deletes, schedules or archives them
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use aidb_table::env::{Env, PosixEnv};
//! use aidb_table::key::{InternalKey, ValueType, MAX_SEQUENCE_NUMBER};
//! use aidb_table::sstable::{LookupResult, ReadOptions, TableBuilder, TableBuilderOptions, TableContext, TableReader};
//! use aidb_table::config::TableOptions;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), aidb_table::Error> {
//! let ctx = Arc::new(TableContext::new(TableOptions::default())?);
//! let path = std::path::Path::new("./000001.sst");
//!
//! let file = PosixEnv.new_writable_file(path)?;
//! let mut builder = TableBuilder::new(Arc::clone(&ctx), file, TableBuilderOptions::default());
//! builder.add(InternalKey::new(b"apple", 1, ValueType::Value).encode(), b"red")?;
//! builder.add(InternalKey::new(b"banana", 2, ValueType::Value).encode(), b"yellow")?;
//! builder.finish()?;
//!
//! let reader = TableReader::open_path(ctx, path)?;
//! let lookup = InternalKey::for_seek(b"apple", MAX_SEQUENCE_NUMBER);
//! assert_eq!(reader.get(&ReadOptions::default(), lookup.encode())?, LookupResult::Found(b"red".to_vec()));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod cache;
pub mod comparator;
pub mod compression;
pub mod config;
pub mod env;
pub mod error;
pub mod files;
pub mod filter;
pub mod key;
pub mod slice_transform;
pub mod sstable;
pub mod util;

// Re-exports
pub use config::{Options, ReclaimOptions, TableOptions};
pub use error::{Error, Result};
pub use files::FileReclaimer;
pub use sstable::{TableBuilder, TableContext, TableReader};
