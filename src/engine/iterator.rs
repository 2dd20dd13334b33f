//! User-facing iterator over the store

use crate::config::IteratorOptions;
use crate::error::{CaskError, Result};
use crate::index::{IndexIter, IndexIterator, Indexer};

use super::Engine;

/// Ordered cursor over live keys, optionally limited to a prefix
///
/// Keys come from the index; values are read from the log on demand.
pub struct EngineIterator<'a> {
    index_iter: IndexIter,
    engine: &'a Engine,
    options: IteratorOptions,
}

impl Engine {
    /// Iterator positioned on the first matching key
    pub fn iter(&self, options: IteratorOptions) -> EngineIterator<'_> {
        let index_iter = self.index.iterator(options.reverse);
        let mut iter = EngineIterator {
            index_iter,
            engine: self,
            options,
        };
        iter.skip_to_prefix();
        iter
    }
}

impl EngineIterator<'_> {
    /// Back to the first matching key
    pub fn rewind(&mut self) {
        self.index_iter.rewind();
        self.skip_to_prefix();
    }

    /// First matching key >= `key` (<= `key` when reversed)
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

    /// Current key; empty once the iterator is exhausted
    pub fn key(&self) -> &[u8] {
        self.index_iter.key()
    }

    /// Read the current key's value from the log
    pub fn value(&self) -> Result<Vec<u8>> {
        if !self.index_iter.valid() {
            return Err(CaskError::KeyNotFound);
        }
        let pos = self.index_iter.value();
        self.engine.state.read().read_value(self.index_iter.key(), &pos)
    }

    pub fn close(&mut self) {
        self.index_iter.close();
    }

    fn skip_to_prefix(&mut self) {
        let prefix = &self.options.prefix;
        if prefix.is_empty() {
            return;
        }
        while self.index_iter.valid() && !self.index_iter.key().starts_with(prefix) {
            self.index_iter.next();
        }
    }
}
