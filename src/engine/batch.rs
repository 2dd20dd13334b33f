//! Atomic write batches
//!
//! A batch stages puts and deletes in memory and commits them as one unit:
//!
//! ```text
//!   [seq|k1 Normal] [seq|k2 Deleted] ... [seq|txn-fin BatchFinished]
//!                                          ▲
//!              replay applies the batch only once this marker is seen
//! ```

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;

use crate::config::{IndexType, WriteBatchOptions};
use crate::data::{key_with_seq, LogRecord, LogRecordType};
use crate::error::{CaskError, Result};
use crate::index::Indexer;

use super::Engine;

/// Key of the marker record that closes a batch
const TXN_FIN_KEY: &[u8] = b"txn-fin";

/// Mutations staged for one atomic commit
pub struct WriteBatch<'a> {
    options: WriteBatchOptions,
    engine: &'a Engine,
    pending: Mutex<HashMap<Vec<u8>, LogRecord>>,
}

impl Engine {
    /// Start a new write batch
    ///
    /// Refused with `SeqNoUnavailable` when a pre-existing store using the
    /// disk index was not shut down cleanly, since the last used sequence
    /// number is then unknown.
    pub fn new_write_batch(&self, options: WriteBatchOptions) -> Result<WriteBatch<'_>> {
        if self.options.index_type == IndexType::BPlusTree
            && !self.seq_file_exists
            && !self.is_initial
        {
            return Err(CaskError::SeqNoUnavailable);
        }

        Ok(WriteBatch {
            options,
            engine: self,
            pending: Mutex::new(HashMap::new()),
        })
    }
}

impl WriteBatch<'_> {
    /// Stage `key` → `value`; replaces anything already staged for `key`
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(CaskError::EmptyKey);
        }

        let record = LogRecord::normal(key.to_vec(), value.to_vec());
        self.pending.lock().insert(key.to_vec(), record);
        Ok(())
    }

    /// Stage a delete of `key`
    ///
    /// A key the store does not have only drops whatever was staged for it.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(CaskError::EmptyKey);
        }

        let mut pending = self.pending.lock();
        if self.engine.index.get(key).is_none() {
            pending.remove(key);
            return Ok(());
        }

        pending.insert(key.to_vec(), LogRecord::deleted(key.to_vec()));
        Ok(())
    }

    /// Number of staged mutations
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Write every staged mutation to the log, then apply them to the index
    ///
    /// Steps:
    /// 1. Take the store lock exclusively and allocate a sequence number
    /// 2. Append each staged record with its key prefixed by that number
    /// 3. Append the finish marker, sync if configured
    /// 4. Apply the staged mutations to the index
    pub fn commit(&self) -> Result<()> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return Ok(());
        }
        if pending.len() > self.options.max_batch_num {
            return Err(CaskError::BatchTooLarge {
                pending: pending.len(),
                max: self.options.max_batch_num,
            });
        }

        let engine = self.engine;
        let mut state = engine.state.write();
        let seq_no = engine.seq_no.fetch_add(1, Ordering::SeqCst) + 1;

        let mut written = Vec::with_capacity(pending.len());
        for (key, record) in pending.iter() {
            let logged = LogRecord {
                key: key_with_seq(key, seq_no),
                value: record.value.clone(),
                rec_type: record.rec_type,
            };
            let pos = engine.append_log_record(&mut state, &logged)?;
            written.push((key, record.rec_type, pos));
        }

        let finished = LogRecord::batch_finished(key_with_seq(TXN_FIN_KEY, seq_no));
        engine.append_log_record(&mut state, &finished)?;

        if self.options.sync_writes {
            state.sync_active()?;
        }

        for (key, rec_type, pos) in written {
            match rec_type {
                LogRecordType::Normal => {
                    if !engine.index.put(key.clone(), pos) {
                        return Err(CaskError::IndexUpdateFailed);
                    }
                }
                LogRecordType::Deleted => {
                    engine.index.delete(key);
                }
                LogRecordType::BatchFinished => {}
            }
        }
        drop(state);

        tracing::debug!(seq_no, records = pending.len(), "write batch committed");
        pending.clear();
        Ok(())
    }
}
