//! Block format implementation for SSTable.
//!
//! A block contains multiple key-value entries and uses restart points
//! for efficient binary search and prefix compression.
//!
//! ```text
//! [Entry 1] ... [Entry N]
//! [Restart Point 1: fixed32] ... [Restart Point M: fixed32]
//! [Num Restarts: fixed32]
//! ```
//!
//! Each entry:
//! ```text
//! [shared_key_len: varint32]    // 0 at every restart point
//! [unshared_key_len: varint32]
//! [value_len: varint32]
//! [unshared_key: bytes]
//! [value: bytes]
//! ```

use crate::comparator::Comparator;
use crate::error::{Error, Result};
use crate::sstable::iterator::InternalIterator;
use crate::util::coding::{decode_fixed32, decode_varint32, put_fixed32, put_varint32};
use bytes::Bytes;
use std::cmp::Ordering;
use std::sync::Arc;

/// Builder for creating blocks with prefix compression.
#[derive(Debug)]
pub struct BlockBuilder {
    buffer: Vec<u8>,
    restarts: Vec<u32>,
    counter: usize,
    restart_interval: usize,
    use_delta_encoding: bool,
    last_key: Vec<u8>,
    finished: bool,
}

impl BlockBuilder {
    /// Create a new BlockBuilder. Every `restart_interval`-th key is stored
    /// in full.
    pub fn new(restart_interval: usize) -> Self {
        Self::with_delta_encoding(restart_interval, true)
    }

    /// Like `new`; with `use_delta_encoding` off every key is stored in full.
    pub fn with_delta_encoding(restart_interval: usize, use_delta_encoding: bool) -> Self {
        assert!(restart_interval >= 1, "restart interval must be at least 1");
        Self {
            buffer: Vec::new(),
            restarts: vec![0],
            counter: 0,
            restart_interval,
            use_delta_encoding,
            last_key: Vec::new(),
            finished: false,
        }
    }

    /// Add a key-value pair. Keys must be added in sorted order; the caller
    /// owns that contract.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        assert!(!self.finished, "Cannot add to finished block");
        debug_assert!(self.counter <= self.restart_interval);

        let shared = if self.counter >= self.restart_interval {
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
            0
        } else if self.use_delta_encoding {
            self.last_key
                .iter()
                .zip(key.iter())
                .take_while(|(a, b)| a == b)
                .count()
        } else {
            0
        };
        let non_shared = key.len() - shared;

        put_varint32(&mut self.buffer, shared as u32);
        put_varint32(&mut self.buffer, non_shared as u32);
        put_varint32(&mut self.buffer, value.len() as u32);
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);

        self.last_key.truncate(shared);
        self.last_key.extend_from_slice(&key[shared..]);
        debug_assert_eq!(self.last_key, key);
        self.counter += 1;
    }

    /// Appends the restart array and returns the block contents. The
    /// builder must be `reset` before reuse.
    pub fn finish(&mut self) -> &[u8] {
        if !self.finished {
            for &restart in &self.restarts {
                put_fixed32(&mut self.buffer, restart);
            }
            put_fixed32(&mut self.buffer, self.restarts.len() as u32);
            self.finished = true;
        }
        &self.buffer
    }

    /// Reset the builder for reuse
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.last_key.clear();
        self.finished = false;
    }

    /// Size the finished block would have right now.
    pub fn current_size_estimate(&self) -> usize {
        if self.finished {
            return self.buffer.len();
        }
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    /// Size estimate after adding one more entry; varint headers are
    /// counted at their fixed32 upper bound.
    pub fn estimate_size_after_kv(&self, key: &[u8], value: &[u8]) -> usize {
        let mut estimate = self.current_size_estimate() + key.len() + value.len();
        if self.counter >= self.restart_interval {
            estimate += 4;
        }
        estimate + 3 * 4
    }

    /// Check if the block is empty
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Last key added.
    pub fn last_key(&self) -> &[u8] {
        &self.last_key
    }
}

/// A parsed, immutable block.
#[derive(Debug, Clone)]
pub struct Block {
    data: Bytes,
    restart_offset: usize,
    num_restarts: u32,
}

impl Block {
    /// Parses block contents (trailer already stripped).
    pub fn new(data: Bytes) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::corruption("bad block contents: too small"));
        }
        let num_restarts = decode_fixed32(&data[data.len() - 4..]);
        let max_restarts_allowed = (data.len() - 4) / 4;
        if num_restarts as usize > max_restarts_allowed {
            return Err(Error::corruption(format!(
                "bad block contents: {} restarts in {} bytes",
                num_restarts,
                data.len()
            )));
        }
        let restart_offset = data.len() - (1 + num_restarts as usize) * 4;
        for index in 0..num_restarts as usize {
            let restart = decode_fixed32(&data[restart_offset + index * 4..]) as usize;
            if restart > restart_offset {
                return Err(Error::corruption(format!(
                    "bad block contents: restart point {} past entries ({} bytes)",
                    restart, restart_offset
                )));
            }
        }
        Ok(Self {
            data,
            restart_offset,
            num_restarts,
        })
    }

    /// Get the number of restart points
    pub fn num_restarts(&self) -> u32 {
        self.num_restarts
    }

    /// Size of the block contents in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    fn restart_point(&self, index: u32) -> usize {
        decode_fixed32(&self.data[self.restart_offset + index as usize * 4..]) as usize
    }

    /// Iterator ordered by `comparator`.
    pub fn iter(&self, comparator: Arc<dyn Comparator>) -> BlockIter {
        BlockIter {
            block: self.clone(),
            comparator,
            current: self.restart_offset,
            restart_index: self.num_restarts,
            key: Vec::new(),
            value_offset: 0,
            value_len: 0,
            err: None,
        }
    }
}

/// Decoded entry header: (shared, non_shared, value_len, offset of key delta).
fn decode_entry(data: &[u8], offset: usize, limit: usize) -> Option<(usize, usize, usize, usize)> {
    if offset >= limit {
        return None;
    }
    let mut p = offset;
    let (shared, n) = decode_varint32(&data[p..limit])?;
    p += n;
    let (non_shared, n) = decode_varint32(&data[p..limit])?;
    p += n;
    let (value_len, n) = decode_varint32(&data[p..limit])?;
    p += n;
    if limit - p < non_shared as usize + value_len as usize {
        return None;
    }
    Some((shared as usize, non_shared as usize, value_len as usize, p))
}

/// Iterator over a block's entries.
pub struct BlockIter {
    block: Block,
    comparator: Arc<dyn Comparator>,
    // Offset of the current entry; restart_offset when invalid.
    current: usize,
    // Restart block that `current` falls in.
    restart_index: u32,
    key: Vec<u8>,
    value_offset: usize,
    value_len: usize,
    err: Option<Error>,
}

impl BlockIter {
    fn next_entry_offset(&self) -> usize {
        self.value_offset + self.value_len
    }

    fn mark_invalid(&mut self) {
        self.current = self.block.restart_offset;
        self.restart_index = self.block.num_restarts;
    }

    fn corruption_error(&mut self) {
        self.mark_invalid();
        self.key.clear();
        self.value_len = 0;
        if self.err.is_none() {
            self.err = Some(Error::corruption("bad entry in block"));
        }
    }

    fn seek_to_restart_point(&mut self, index: u32) {
        self.key.clear();
        self.restart_index = index;
        // parse_next_key starts from the end of the current "value".
        self.value_offset = self.block.restart_point(index);
        self.value_len = 0;
    }

    fn parse_next_key(&mut self) -> bool {
        self.current = self.next_entry_offset();
        let limit = self.block.restart_offset;
        if self.current >= limit {
            self.mark_invalid();
            return false;
        }

        let Some((shared, non_shared, value_len, delta_offset)) =
            decode_entry(&self.block.data, self.current, limit)
        else {
            self.corruption_error();
            return false;
        };
        if shared > self.key.len() {
            self.corruption_error();
            return false;
        }

        self.key.truncate(shared);
        self.key
            .extend_from_slice(&self.block.data[delta_offset..delta_offset + non_shared]);
        self.value_offset = delta_offset + non_shared;
        self.value_len = value_len;

        while self.restart_index + 1 < self.block.num_restarts
            && self.block.restart_point(self.restart_index + 1) < self.current
        {
            self.restart_index += 1;
        }
        true
    }

    /// Full key stored at a restart point.
    fn restart_key(&self, index: u32) -> Option<&[u8]> {
        let offset = self.block.restart_point(index);
        let (shared, non_shared, _, delta_offset) =
            decode_entry(&self.block.data, offset, self.block.restart_offset)?;
        if shared != 0 {
            return None;
        }
        Some(&self.block.data[delta_offset..delta_offset + non_shared])
    }
}

impl InternalIterator for BlockIter {
    fn valid(&self) -> bool {
        self.current < self.block.restart_offset
    }

    fn seek_to_first(&mut self) {
        if self.block.num_restarts == 0 {
            self.mark_invalid();
            return;
        }
        self.seek_to_restart_point(0);
        self.parse_next_key();
    }

    fn seek_to_last(&mut self) {
        if self.block.num_restarts == 0 {
            self.mark_invalid();
            return;
        }
        self.seek_to_restart_point(self.block.num_restarts - 1);
        while self.parse_next_key() && self.next_entry_offset() < self.block.restart_offset {}
    }

    fn seek(&mut self, target: &[u8]) {
        if self.block.num_restarts == 0 {
            self.mark_invalid();
            return;
        }

        // Last restart point whose key is < target.
        let mut left = 0u32;
        let mut right = self.block.num_restarts - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            let ordering = match self.restart_key(mid) {
                Some(mid_key) => self.comparator.compare(mid_key, target),
                None => {
                    self.corruption_error();
                    return;
                }
            };
            if ordering == Ordering::Less {
                left = mid;
            } else {
                right = mid - 1;
            }
        }

        self.seek_to_restart_point(left);
        loop {
            if !self.parse_next_key() {
                return;
            }
            if self.comparator.compare(&self.key, target) != Ordering::Less {
                return;
            }
        }
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        self.parse_next_key();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        let original = self.current;
        while self.block.restart_point(self.restart_index) >= original {
            if self.restart_index == 0 {
                self.mark_invalid();
                return;
            }
            self.restart_index -= 1;
        }
        self.seek_to_restart_point(self.restart_index);
        while self.parse_next_key() && self.next_entry_offset() < original {}
    }

    fn key(&self) -> &[u8] {
        &self.key
    }

    fn value(&self) -> &[u8] {
        &self.block.data[self.value_offset..self.value_offset + self.value_len]
    }

    fn status(&self) -> Result<()> {
        match &self.err {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}
