//! The user-facing iterator: wraps an index iterator, resolves values
//! through the engine, and applies the `Prefix` filter from
//! [`IteratorOptions`].

use bytes::Bytes;

use crate::engine::Engine;
use crate::error::Result;
use crate::index::IndexIterator;
use crate::options::IteratorOptions;

pub struct DbIterator<'a> {
    index_iter: Box<dyn IndexIterator>,
    engine: &'a Engine,
    options: IteratorOptions,
}

impl Engine {
    pub fn new_iterator(&self, options: IteratorOptions) -> DbIterator<'_> {
        let index_iter = self.index.iterator(options.reverse);
        let mut iter = DbIterator { index_iter, engine: self, options };
        iter.skip_to_prefix();
        iter
    }
}

impl<'a> DbIterator<'a> {
    pub fn rewind(&mut self) {
        self.index_iter.rewind();
        self.skip_to_prefix();
    }

    /// Seeks to the first key >= `key` (or, in reverse mode, <= `key`),
    /// then applies the prefix filter from that point on.
    pub fn seek(&mut self, key: &[u8]) {
        self.index_iter.seek(key);
        self.skip_to_prefix();
    }

    pub fn next(&mut self) {
        self.index_iter.next();
        self.skip_to_prefix();
    }

    pub fn valid(&self) -> bool {
        self.index_iter.valid()
    }

    pub fn key(&self) -> &[u8] {
        self.index_iter.key()
    }

    pub fn value(&self) -> Result<Bytes> {
        let pos = self.index_iter.value();
        self.engine.get_value_by_position(pos)
    }

    pub fn close(&mut self) {
        self.index_iter.close();
    }

    /// Advances past every key that doesn't start with `Options.prefix`.
    fn skip_to_prefix(&mut self) {
        if self.options.prefix.is_empty() {
            return;
        }
        while self.index_iter.valid() {
            let key = self.index_iter.key();
            if key.len() >= self.options.prefix.len() && key[..self.options.prefix.len()] == self.options.prefix[..] {
                break;
            }
            self.index_iter.next();
        }
    }
}
