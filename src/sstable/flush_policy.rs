//! Decides when the current data block is full.

use crate::sstable::block::BlockBuilder;

/// Consulted before each key is added to a block.
pub trait FlushBlockPolicy: Send {
    /// True if `block` should be flushed before `key`/`value` go in.
    fn update(&mut self, key: &[u8], value: &[u8], block: &BlockBuilder) -> bool;
}

/// Flushes at `block_size`, or earlier when the block is already within
/// `block_size_deviation` percent of it and the next entry would overflow.
#[derive(Debug, Clone)]
pub struct FlushBlockBySizePolicy {
    block_size: usize,
    deviation_limit: usize,
}

impl FlushBlockBySizePolicy {
    /// Creates the policy. A deviation of 0 (or above 100) disables the
    /// early flush.
    pub fn new(block_size: usize, block_size_deviation: usize) -> Self {
        let deviation_limit = if block_size_deviation == 0 || block_size_deviation > 100 {
            0
        } else {
            (block_size * (100 - block_size_deviation)).div_ceil(100)
        };
        Self {
            block_size,
            deviation_limit,
        }
    }

    fn block_almost_full(&self, key: &[u8], value: &[u8], block: &BlockBuilder) -> bool {
        if self.deviation_limit == 0 {
            return false;
        }
        let curr_size = block.current_size_estimate();
        curr_size > self.deviation_limit
            && block.estimate_size_after_kv(key, value) > self.block_size
    }
}

impl FlushBlockPolicy for FlushBlockBySizePolicy {
    fn update(&mut self, key: &[u8], value: &[u8], block: &BlockBuilder) -> bool {
        if block.is_empty() {
            return false;
        }
        block.current_size_estimate() >= self.block_size
            || self.block_almost_full(key, value, block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_flushes_empty_block() {
        let mut policy = FlushBlockBySizePolicy::new(1, 10);
        let block = BlockBuilder::new(16);
        assert!(!policy.update(b"k", b"v", &block));
    }

    #[test]
    fn test_flush_at_block_size() {
        let mut policy = FlushBlockBySizePolicy::new(64, 0);
        let mut block = BlockBuilder::new(16);
        block.add(b"a", &[0u8; 40]);
        assert!(!policy.update(b"b", &[0u8; 100], &block));
        block.add(b"b", &[0u8; 40]);
        assert!(policy.update(b"c", b"", &block));
    }

    #[test]
    fn test_deviation_flushes_early() {
        let mut with_deviation = FlushBlockBySizePolicy::new(100, 10);
        let mut without = FlushBlockBySizePolicy::new(100, 0);
        let mut block = BlockBuilder::new(16);
        block.add(b"a", &[0u8; 80]);
        // ~95 bytes: past the 90-byte limit, and one more entry overflows.
        assert!(block.current_size_estimate() > 90 && block.current_size_estimate() < 100);
        assert!(with_deviation.update(b"b", &[0u8; 20], &block));
        assert!(!without.update(b"b", &[0u8; 20], &block));
    }
}
