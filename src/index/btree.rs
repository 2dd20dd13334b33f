//! In-memory ordered tree index
//!
//! BTreeMap-based index with RwLock for concurrency.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::data::LogRecordPos;
use crate::error::Result;

use super::{IndexIter, Indexer, SnapshotIterator};

/// Byte-lexicographically ordered in-memory index
pub struct BTreeIndex {
    tree: RwLock<BTreeMap<Vec<u8>, LogRecordPos>>,
}

impl BTreeIndex {
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for BTreeIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Indexer for BTreeIndex {
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> bool {
        self.tree.write().insert(key, pos);
        true
    }

    fn get(&self, key: &[u8]) -> Option<LogRecordPos> {
        self.tree.read().get(key).copied()
    }

    fn delete(&self, key: &[u8]) -> bool {
        self.tree.write().remove(key).is_some()
    }

    fn size(&self) -> usize {
        self.tree.read().len()
    }

    fn iterator(&self, reverse: bool) -> IndexIter {
        let tree = self.tree.read();
        let items: Vec<_> = if reverse {
            tree.iter().rev().map(|(k, v)| (k.clone(), *v)).collect()
        } else {
            tree.iter().map(|(k, v)| (k.clone(), *v)).collect()
        };
        IndexIter::Snapshot(SnapshotIterator::new(items, reverse))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
