//! Filter policies for skipping table and block reads.
//!
//! A [`FilterPolicy`] turns a set of keys into a compact filter and later
//! answers "may this key be present". It offers two builder shapes: one
//! filter per key batch (`create_filter`, used by block-based filter
//! blocks) and an incremental [`FilterBitsBuilder`] (used by full and
//! partitioned filters).

pub mod bloom;

pub use bloom::{BloomFilter, BloomFilterPolicy};

/// Filter trait for key existence checking
pub trait Filter {
    /// Check if a key may exist (can have false positives)
    fn may_contain(&self, key: &[u8]) -> bool;

    /// Add a key to the filter
    fn add(&mut self, key: &[u8]);

    /// Get the serialized representation of the filter
    fn encode(&self) -> Vec<u8>;

    /// Create a filter from serialized data
    fn decode(data: &[u8]) -> crate::Result<Self>
    where
        Self: Sized;
}

/// Accumulates keys for one full filter.
pub trait FilterBitsBuilder: Send {
    /// Adds a key. Consecutive duplicates may be dropped.
    fn add_key(&mut self, key: &[u8]);

    /// Number of distinct keys added since the last `finish`.
    fn num_added(&self) -> usize;

    /// Builds the filter and resets the builder.
    fn finish(&mut self) -> Vec<u8>;
}

/// Queries one full filter.
pub trait FilterBitsReader: Send + Sync {
    /// False means the key is definitely absent.
    fn may_match(&self, key: &[u8]) -> bool;
}

/// Builds and reads filters.
pub trait FilterPolicy: Send + Sync {
    /// Name recorded in the meta-index; readers locate the filter with it.
    fn name(&self) -> &str;

    /// Builds one filter over `keys` (block-based layout).
    fn create_filter(&self, keys: &[Vec<u8>]) -> Vec<u8>;

    /// Queries a filter made by `create_filter`.
    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool;

    /// Incremental builder for full filters, or `None` if the policy only
    /// supports block-based filters.
    fn bits_builder(&self) -> Option<Box<dyn FilterBitsBuilder>>;

    /// Reader over a full filter.
    fn bits_reader(&self, contents: &[u8]) -> Box<dyn FilterBitsReader>;
}
