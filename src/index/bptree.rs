//! Disk-backed B+tree index
//!
//! Persists the key → position map in a redb file under the store directory,
//! so the index survives restarts without replaying the log. Every `put` and
//! `delete` is its own write transaction.

use std::ops::Bound;
use std::path::Path;

use redb::{
    Database, Durability, ReadOnlyTable, ReadTransaction, ReadableTable,
    ReadableTableMetadata, TableDefinition, WriteTransaction,
};

use crate::data::{decode_position, encode_position, LogRecordPos};
use crate::error::{CaskError, Result};

use super::{IndexIter, IndexIterator, Indexer};

/// File name of the index database inside the store directory
pub const BPTREE_INDEX_FILE_NAME: &str = "bptree-index";

const INDEX_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("caskkv-index");

fn index_error(err: impl Into<redb::Error>) -> CaskError {
    CaskError::Index(err.into().to_string())
}

/// B+tree index stored in its own transactional file
pub struct BPlusTreeIndex {
    db: Database,
    sync_writes: bool,
}

impl BPlusTreeIndex {
    /// Open or create the index file under `dir`
    pub fn open(dir: &Path, sync_writes: bool) -> Result<Self> {
        let db = Database::create(dir.join(BPTREE_INDEX_FILE_NAME)).map_err(index_error)?;

        // Make sure the table exists so readers never see TableDoesNotExist
        let txn = db.begin_write().map_err(index_error)?;
        txn.open_table(INDEX_TABLE).map_err(index_error)?;
        txn.commit().map_err(index_error)?;

        Ok(Self { db, sync_writes })
    }

    fn begin_write(&self) -> Result<WriteTransaction> {
        let mut txn = self.db.begin_write().map_err(index_error)?;
        txn.set_durability(if self.sync_writes {
            Durability::Immediate
        } else {
            Durability::Eventual
        });
        Ok(txn)
    }

    fn try_put(&self, key: &[u8], pos: &LogRecordPos) -> Result<()> {
        let txn = self.begin_write()?;
        {
            let mut table = txn.open_table(INDEX_TABLE).map_err(index_error)?;
            table
                .insert(key, encode_position(pos).as_slice())
                .map_err(index_error)?;
        }
        txn.commit().map_err(index_error)
    }

    fn try_get(&self, key: &[u8]) -> Result<Option<LogRecordPos>> {
        let txn = self.db.begin_read().map_err(index_error)?;
        let table = txn.open_table(INDEX_TABLE).map_err(index_error)?;
        match table.get(key).map_err(index_error)? {
            Some(guard) => Ok(Some(decode_position(guard.value())?)),
            None => Ok(None),
        }
    }

    fn try_delete(&self, key: &[u8]) -> Result<bool> {
        let txn = self.begin_write()?;
        let existed = {
            let mut table = txn.open_table(INDEX_TABLE).map_err(index_error)?;
            let removed = table.remove(key).map_err(index_error)?;
            removed.is_some()
        };
        txn.commit().map_err(index_error)?;
        Ok(existed)
    }

    fn try_size(&self) -> Result<usize> {
        let txn = self.db.begin_read().map_err(index_error)?;
        let table = txn.open_table(INDEX_TABLE).map_err(index_error)?;
        Ok(table.len().map_err(index_error)? as usize)
    }
}

impl Indexer for BPlusTreeIndex {
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> bool {
        match self.try_put(&key, &pos) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "disk index put failed");
                false
            }
        }
    }

    fn get(&self, key: &[u8]) -> Option<LogRecordPos> {
        self.try_get(key).unwrap_or_else(|e| {
            tracing::error!(error = %e, "disk index get failed");
            None
        })
    }

    fn delete(&self, key: &[u8]) -> bool {
        self.try_delete(key).unwrap_or_else(|e| {
            tracing::error!(error = %e, "disk index delete failed");
            false
        })
    }

    fn size(&self) -> usize {
        self.try_size().unwrap_or_else(|e| {
            tracing::error!(error = %e, "disk index size failed");
            0
        })
    }

    fn iterator(&self, reverse: bool) -> IndexIter {
        IndexIter::BPlusTree(BPlusTreeIterator::new(&self.db, reverse))
    }

    /// Make every committed transaction durable
    fn close(&self) -> Result<()> {
        let mut txn = self.db.begin_write().map_err(index_error)?;
        txn.set_durability(Durability::Immediate);
        txn.commit().map_err(index_error)
    }
}

// =============================================================================
// Iterator
// =============================================================================

/// Cursor over a read transaction of the disk index
///
/// The transaction stays open, pinning a consistent snapshot, until
/// [`IndexIterator::close`] is called or the iterator is dropped.
pub struct BPlusTreeIterator {
    table: Option<ReadOnlyTable<&'static [u8], &'static [u8]>>,
    _txn: Option<ReadTransaction>,
    reverse: bool,
    current: Option<(Vec<u8>, LogRecordPos)>,
}

impl BPlusTreeIterator {
    fn new(db: &Database, reverse: bool) -> Self {
        let opened = db.begin_read().map_err(index_error).and_then(|txn| {
            let table = txn.open_table(INDEX_TABLE).map_err(index_error)?;
            Ok((txn, table))
        });

        let (txn, table) = match opened {
            Ok((txn, table)) => (Some(txn), Some(table)),
            Err(e) => {
                tracing::error!(error = %e, "disk index iterator failed to open");
                (None, None)
            }
        };

        let mut iter = Self {
            table,
            _txn: txn,
            reverse,
            current: None,
        };
        iter.rewind();
        iter
    }

    /// Position on the first (or last, when `from_back`) entry in the bounds
    fn land(&mut self, lower: Bound<&[u8]>, upper: Bound<&[u8]>, from_back: bool) {
        let Some(table) = &self.table else {
            self.current = None;
            return;
        };

        let found = table.range::<&[u8]>((lower, upper)).map_err(index_error).and_then(|mut range| {
            let entry = if from_back { range.next_back() } else { range.next() };
            match entry {
                Some(entry) => {
                    let (key, value) = entry.map_err(index_error)?;
                    Ok(Some((key.value().to_vec(), decode_position(value.value())?)))
                }
                None => Ok(None),
            }
        });

        self.current = found.unwrap_or_else(|e| {
            tracing::error!(error = %e, "disk index iterator read failed");
            None
        });
    }
}

impl IndexIterator for BPlusTreeIterator {
    fn rewind(&mut self) {
        self.land(Bound::Unbounded, Bound::Unbounded, self.reverse);
    }

    fn seek(&mut self, key: &[u8]) {
        if self.reverse {
            self.land(Bound::Unbounded, Bound::Included(key), true);
        } else {
            self.land(Bound::Included(key), Bound::Unbounded, false);
        }
    }

    fn next(&mut self) {
        let Some((key, _)) = self.current.take() else {
            return;
        };
        if self.reverse {
            self.land(Bound::Unbounded, Bound::Excluded(key.as_slice()), true);
        } else {
            self.land(Bound::Excluded(key.as_slice()), Bound::Unbounded, false);
        }
    }

    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn key(&self) -> &[u8] {
        self.current.as_ref().map(|(k, _)| k.as_slice()).unwrap_or_default()
    }

    fn value(&self) -> LogRecordPos {
        self.current
            .as_ref()
            .map(|(_, pos)| *pos)
            .unwrap_or(LogRecordPos { file_id: 0, offset: 0 })
    }

    fn close(&mut self) {
        self.current = None;
        self.table = None;
        self._txn = None;
    }
}
