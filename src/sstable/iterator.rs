//! Iterators over table contents.
//!
//! [`TwoLevelIterator`] walks an index iterator whose values are encoded
//! block handles and opens one inner iterator per handle. A partitioned
//! index is itself read through a two-level iterator, so a table scan over
//! a partitioned index is a two-level iterator nested inside another.

use crate::error::{Error, Result};
use std::sync::Arc;

/// Cursor over sorted key/value entries.
pub trait InternalIterator: Send {
    /// True when positioned at an entry.
    fn valid(&self) -> bool;

    /// Positions at the first entry.
    fn seek_to_first(&mut self);

    /// Positions at the last entry.
    fn seek_to_last(&mut self);

    /// Positions at the first entry with key >= `target`.
    fn seek(&mut self, target: &[u8]);

    /// Advances. Requires `valid()`.
    fn next(&mut self);

    /// Steps back. Requires `valid()`.
    fn prev(&mut self);

    /// Current key. Requires `valid()`.
    fn key(&self) -> &[u8];

    /// Current value. Requires `valid()`.
    fn value(&self) -> &[u8];

    /// First error met while iterating, if any.
    fn status(&self) -> Result<()>;
}

/// An iterator with no entries, optionally carrying an error.
#[derive(Debug, Default)]
pub struct EmptyIterator {
    err: Option<Error>,
}

impl EmptyIterator {
    /// An iterator that is always invalid and reports `err`.
    pub fn with_error(err: Error) -> Self {
        Self { err: Some(err) }
    }
}

impl InternalIterator for EmptyIterator {
    fn valid(&self) -> bool {
        false
    }
    fn seek_to_first(&mut self) {}
    fn seek_to_last(&mut self) {}
    fn seek(&mut self, _target: &[u8]) {}
    fn next(&mut self) {}
    fn prev(&mut self) {}
    fn key(&self) -> &[u8] {
        &[]
    }
    fn value(&self) -> &[u8] {
        &[]
    }
    fn status(&self) -> Result<()> {
        match &self.err {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

/// Opens the inner iterator for an encoded block handle.
pub type BlockIterFactory =
    Arc<dyn Fn(&[u8]) -> Result<Box<dyn InternalIterator>> + Send + Sync>;

/// Index iterator composed with lazily opened per-block iterators.
///
/// A failure opening a block stops the iteration and is reported by
/// `status()`; blocks past a corrupt one are not visited.
pub struct TwoLevelIterator {
    index_iter: Box<dyn InternalIterator>,
    data_iter: Option<Box<dyn InternalIterator>>,
    block_factory: BlockIterFactory,
    // Handle the current data iterator was opened from.
    data_block_handle: Vec<u8>,
    err: Option<Error>,
}

impl TwoLevelIterator {
    /// Creates an iterator over the blocks named by `index_iter`.
    pub fn new(index_iter: Box<dyn InternalIterator>, block_factory: BlockIterFactory) -> Self {
        Self {
            index_iter,
            data_iter: None,
            block_factory,
            data_block_handle: Vec::new(),
            err: None,
        }
    }

    fn init_data_block(&mut self) {
        if !self.index_iter.valid() {
            self.data_iter = None;
            return;
        }
        let handle = self.index_iter.value();
        if self.data_iter.is_some() && handle == self.data_block_handle.as_slice() {
            return;
        }
        match (self.block_factory)(handle) {
            Ok(iter) => {
                self.data_block_handle = handle.to_vec();
                self.data_iter = Some(iter);
            }
            Err(e) => {
                self.err = Some(e);
                self.data_iter = None;
            }
        }
    }

    fn data_valid(&self) -> bool {
        self.data_iter.as_ref().is_some_and(|it| it.valid())
    }

    fn save_data_error(&mut self) {
        if self.err.is_none() {
            if let Some(Err(e)) = self.data_iter.as_ref().map(|it| it.status()) {
                self.err = Some(e);
            }
        }
    }

    fn skip_empty_blocks_forward(&mut self) {
        while !self.data_valid() {
            self.save_data_error();
            if self.err.is_some() || !self.index_iter.valid() {
                self.data_iter = None;
                return;
            }
            self.index_iter.next();
            self.init_data_block();
            if let Some(it) = self.data_iter.as_mut() {
                it.seek_to_first();
            }
        }
    }

    fn skip_empty_blocks_backward(&mut self) {
        while !self.data_valid() {
            self.save_data_error();
            if self.err.is_some() || !self.index_iter.valid() {
                self.data_iter = None;
                return;
            }
            self.index_iter.prev();
            self.init_data_block();
            if let Some(it) = self.data_iter.as_mut() {
                it.seek_to_last();
            }
        }
    }
}

impl InternalIterator for TwoLevelIterator {
    fn valid(&self) -> bool {
        self.err.is_none() && self.data_valid()
    }

    fn seek_to_first(&mut self) {
        self.index_iter.seek_to_first();
        self.init_data_block();
        if let Some(it) = self.data_iter.as_mut() {
            it.seek_to_first();
        }
        self.skip_empty_blocks_forward();
    }

    fn seek_to_last(&mut self) {
        self.index_iter.seek_to_last();
        self.init_data_block();
        if let Some(it) = self.data_iter.as_mut() {
            it.seek_to_last();
        }
        self.skip_empty_blocks_backward();
    }

    fn seek(&mut self, target: &[u8]) {
        self.index_iter.seek(target);
        self.init_data_block();
        if let Some(it) = self.data_iter.as_mut() {
            it.seek(target);
        }
        self.skip_empty_blocks_forward();
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        if let Some(it) = self.data_iter.as_mut() {
            it.next();
        }
        self.skip_empty_blocks_forward();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        if let Some(it) = self.data_iter.as_mut() {
            it.prev();
        }
        self.skip_empty_blocks_backward();
    }

    fn key(&self) -> &[u8] {
        self.data_iter.as_ref().map_or(&[], |it| it.key())
    }

    fn value(&self) -> &[u8] {
        self.data_iter.as_ref().map_or(&[], |it| it.value())
    }

    fn status(&self) -> Result<()> {
        if let Some(e) = &self.err {
            return Err(e.clone());
        }
        self.index_iter.status()?;
        match &self.data_iter {
            Some(it) => it.status(),
            None => Ok(()),
        }
    }
}
