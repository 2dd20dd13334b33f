//! Index Module
//!
//! Maps every live key to the position of its most recent record.
//!
//! ## Responsibilities
//! - Point lookups for `get`
//! - Ordered, bidirectional iteration with seek
//! - Three interchangeable backends behind one contract
//!
//! ## Backends
//! - `BTree`: `BTreeMap` under an `RwLock`, snapshot iterators
//! - `Art`: adaptive radix tree under an `RwLock`, snapshot iterators
//! - `BPlusTree`: redb file in the store directory, iterators hold a read
//!   transaction until closed
//!
//! Backend choice is fixed when the store opens; [`Index`] dispatches with a
//! `match` rather than a trait object.

mod art;
mod bptree;
mod btree;

use std::path::Path;

use crate::config::IndexType;
use crate::data::LogRecordPos;
use crate::error::Result;

pub use art::{AdaptiveRadixTree, ArtIndex};
pub use bptree::{BPlusTreeIndex, BPlusTreeIterator, BPTREE_INDEX_FILE_NAME};
pub use btree::BTreeIndex;

/// Key → position map contract shared by all backends
pub trait Indexer: Send + Sync {
    /// Store `pos` for `key`; false if the backend rejected the update
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> bool;

    /// Position for `key`, if present
    fn get(&self, key: &[u8]) -> Option<LogRecordPos>;

    /// Remove `key`; true iff an entry existed and was removed
    fn delete(&self, key: &[u8]) -> bool;

    /// Number of keys
    fn size(&self) -> usize;

    /// Ordered iterator, descending when `reverse`
    fn iterator(&self, reverse: bool) -> IndexIter;

    /// Release backend resources
    fn close(&self) -> Result<()>;
}

/// Cursor over index entries
pub trait IndexIterator {
    /// Move to the first key (last when reversed)
    fn rewind(&mut self);

    /// Move to the first key >= `key` (<= `key` when reversed)
    fn seek(&mut self, key: &[u8]);

    /// Advance one entry
    fn next(&mut self);

    /// Whether the cursor is on an entry
    fn valid(&self) -> bool;

    /// Key under the cursor; empty once the cursor is exhausted
    fn key(&self) -> &[u8];

    /// Position under the cursor; file 0, offset 0 once exhausted
    fn value(&self) -> LogRecordPos;

    /// Release held resources; the iterator is invalid afterwards
    fn close(&mut self);
}

/// The configured index backend
pub enum Index {
    BTree(BTreeIndex),
    Art(ArtIndex),
    BPlusTree(BPlusTreeIndex),
}

impl Index {
    /// Build the backend selected by `index_type`
    ///
    /// `dir` and `sync_writes` only matter to the disk-backed backend.
    pub fn new(index_type: IndexType, dir: &Path, sync_writes: bool) -> Result<Self> {
        Ok(match index_type {
            IndexType::BTree => Index::BTree(BTreeIndex::new()),
            IndexType::Art => Index::Art(ArtIndex::new()),
            IndexType::BPlusTree => Index::BPlusTree(BPlusTreeIndex::open(dir, sync_writes)?),
        })
    }
}

impl Indexer for Index {
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> bool {
        match self {
            Index::BTree(index) => index.put(key, pos),
            Index::Art(index) => index.put(key, pos),
            Index::BPlusTree(index) => index.put(key, pos),
        }
    }

    fn get(&self, key: &[u8]) -> Option<LogRecordPos> {
        match self {
            Index::BTree(index) => index.get(key),
            Index::Art(index) => index.get(key),
            Index::BPlusTree(index) => index.get(key),
        }
    }

    fn delete(&self, key: &[u8]) -> bool {
        match self {
            Index::BTree(index) => index.delete(key),
            Index::Art(index) => index.delete(key),
            Index::BPlusTree(index) => index.delete(key),
        }
    }

    fn size(&self) -> usize {
        match self {
            Index::BTree(index) => index.size(),
            Index::Art(index) => index.size(),
            Index::BPlusTree(index) => index.size(),
        }
    }

    fn iterator(&self, reverse: bool) -> IndexIter {
        match self {
            Index::BTree(index) => index.iterator(reverse),
            Index::Art(index) => index.iterator(reverse),
            Index::BPlusTree(index) => index.iterator(reverse),
        }
    }

    fn close(&self) -> Result<()> {
        match self {
            Index::BTree(index) => index.close(),
            Index::Art(index) => index.close(),
            Index::BPlusTree(index) => index.close(),
        }
    }
}

// =============================================================================
// Iterators
// =============================================================================

/// Iterator returned by every backend
pub enum IndexIter {
    /// Point-in-time copy of an in-memory index
    Snapshot(SnapshotIterator),

    /// Cursor over a disk index read transaction
    BPlusTree(BPlusTreeIterator),
}

impl IndexIterator for IndexIter {
    fn rewind(&mut self) {
        match self {
            IndexIter::Snapshot(iter) => iter.rewind(),
            IndexIter::BPlusTree(iter) => iter.rewind(),
        }
    }

    fn seek(&mut self, key: &[u8]) {
        match self {
            IndexIter::Snapshot(iter) => iter.seek(key),
            IndexIter::BPlusTree(iter) => iter.seek(key),
        }
    }

    fn next(&mut self) {
        match self {
            IndexIter::Snapshot(iter) => iter.next(),
            IndexIter::BPlusTree(iter) => iter.next(),
        }
    }

    fn valid(&self) -> bool {
        match self {
            IndexIter::Snapshot(iter) => iter.valid(),
            IndexIter::BPlusTree(iter) => iter.valid(),
        }
    }

    fn key(&self) -> &[u8] {
        match self {
            IndexIter::Snapshot(iter) => iter.key(),
            IndexIter::BPlusTree(iter) => iter.key(),
        }
    }

    fn value(&self) -> LogRecordPos {
        match self {
            IndexIter::Snapshot(iter) => iter.value(),
            IndexIter::BPlusTree(iter) => iter.value(),
        }
    }

    fn close(&mut self) {
        match self {
            IndexIter::Snapshot(iter) => iter.close(),
            IndexIter::BPlusTree(iter) => iter.close(),
        }
    }
}

/// Sorted copy of an in-memory index
///
/// Entries are stored in iteration order, so a reverse iterator holds them
/// descending and every cursor move is an index bump.
pub struct SnapshotIterator {
    items: Vec<(Vec<u8>, LogRecordPos)>,
    current: usize,
    reverse: bool,
}

impl SnapshotIterator {
    /// `items` must already be in iteration order
    pub(crate) fn new(items: Vec<(Vec<u8>, LogRecordPos)>, reverse: bool) -> Self {
        Self {
            items,
            current: 0,
            reverse,
        }
    }
}

impl IndexIterator for SnapshotIterator {
    fn rewind(&mut self) {
        self.current = 0;
    }

    fn seek(&mut self, key: &[u8]) {
        self.current = if self.reverse {
            self.items.partition_point(|(k, _)| k.as_slice() > key)
        } else {
            self.items.partition_point(|(k, _)| k.as_slice() < key)
        };
    }

    fn next(&mut self) {
        self.current += 1;
    }

    fn valid(&self) -> bool {
        self.current < self.items.len()
    }

    fn key(&self) -> &[u8] {
        self.items
            .get(self.current)
            .map(|(k, _)| k.as_slice())
            .unwrap_or_default()
    }

    fn value(&self) -> LogRecordPos {
        self.items
            .get(self.current)
            .map(|(_, pos)| *pos)
            .unwrap_or(LogRecordPos { file_id: 0, offset: 0 })
    }

    fn close(&mut self) {
        self.items.clear();
        self.current = 0;
    }
}
