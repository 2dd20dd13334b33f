//! Engine Module
//!
//! The store itself: owns the segments, the index and the directory.
//!
//! ## Responsibilities
//! - Append every mutation to the active segment, rotating at the size limit
//! - Keep the index pointing at the latest record of every live key
//! - Rebuild the index on open (hint file + log replay, or the disk index)
//! - Hand out write batches, iterators and run merges
//!
//! ## Concurrency Model
//!
//! ```text
//!   put / delete / batch commit          get / list_keys / fold
//!            │                                    │
//!            ▼                                    ▼
//!   state.write() ──────────────┐        index.get()  ──► state.read()
//!     append to active segment  │                             │
//!     index update              │                             ▼
//!   (one critical section)      │                    read record at pos
//!                               ▼
//!                   ┌──────────────────────┐
//!                   │ SegmentState         │
//!                   │  active: DataFile    │
//!                   │  older: {id → file}  │
//!                   └──────────────────────┘
//! ```
//!
//! Index updates for plain `put`/`delete` happen while the exclusive store
//! lock is still held, so an append and its index update are never
//! reordered against another writer.

mod batch;
mod iterator;
mod merge;
mod recovery;

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::config::{IndexType, Options};
use crate::data::{
    encode_log_record, key_with_seq, parse_key_with_seq, DataFile, LogRecord, LogRecordPos,
    LogRecordType, NON_TRANSACTION_SEQ_NO,
};
use crate::error::{CaskError, Result};
use crate::index::{Index, IndexIterator, Indexer};

pub use batch::WriteBatch;
pub use iterator::EngineIterator;

/// Name of the advisory lock file inside the store directory
pub const LOCK_FILE_NAME: &str = "flock";

/// Key of the record stored in the sequence number snapshot
const SEQ_NO_KEY: &[u8] = b"seq.no";

/// Segments owned by the store, guarded by the store-wide lock
pub(crate) struct SegmentState {
    /// Segment receiving appends; `None` until the first write
    active: Option<DataFile>,

    /// Sealed segments by id
    older: HashMap<u32, DataFile>,
}

impl SegmentState {
    fn data_file(&self, file_id: u32) -> Option<&DataFile> {
        match &self.active {
            Some(active) if active.file_id() == file_id => Some(active),
            _ => self.older.get(&file_id),
        }
    }

    /// Resolve `key`'s position to the value stored there
    fn read_value(&self, key: &[u8], pos: &LogRecordPos) -> Result<Vec<u8>> {
        let data_file = self
            .data_file(pos.file_id)
            .ok_or(CaskError::DataFileNotFound(pos.file_id))?;

        let (record, _) = data_file
            .read_log_record(pos.offset)?
            .ok_or(CaskError::UnexpectedEof {
                file_id: pos.file_id,
                offset: pos.offset,
            })?;

        let (stored_key, _) = parse_key_with_seq(&record.key)?;
        if stored_key != key {
            return Err(CaskError::Corruption(format!(
                "index entry points at another key's record in data file {} at offset {}",
                pos.file_id, pos.offset
            )));
        }
        if record.rec_type == LogRecordType::Deleted {
            return Err(CaskError::KeyNotFound);
        }
        Ok(record.value)
    }

    fn sync_active(&self) -> Result<()> {
        match &self.active {
            Some(active) => active.sync(),
            None => Ok(()),
        }
    }
}

/// Bitcask-style key-value store over one directory
///
/// ## Example
/// ```no_run
/// use caskkv::{Engine, Options};
///
/// let engine = Engine::open(Options::builder().dir_path("/tmp/caskkv").build())?;
/// engine.put(b"name", b"cask")?;
/// assert_eq!(engine.get(b"name")?, b"cask");
/// engine.close()?;
/// # Ok::<(), caskkv::CaskError>(())
/// ```
pub struct Engine {
    options: Options,

    /// Store-wide lock over the segment set
    state: RwLock<SegmentState>,

    /// Key → latest position; has its own internal locking
    index: Index,

    /// Last sequence number handed to a write batch
    seq_no: AtomicU64,

    /// Set while a merge is running
    merging: AtomicBool,

    /// A sequence number snapshot was found on open (disk index only)
    seq_file_exists: bool,

    /// The directory was missing or empty when opened
    is_initial: bool,

    /// Held for the lifetime of the engine; dropping it releases the lock
    _lock_file: File,
}

impl Engine {
    /// Open or create a store in `options.dir_path`
    ///
    /// On startup:
    /// 1. Validate options, create the directory if needed
    /// 2. Take the directory lock
    /// 3. Open the index, then promote a finished merge if one is waiting
    /// 4. Open every segment, the highest id becomes active
    /// 5. Rebuild the index (hint + replay), or trust the disk index and
    ///    only repair the active segment's tail
    pub fn open(options: Options) -> Result<Self> {
        check_options(&options)?;

        let dir = options.dir_path.clone();
        let is_initial = if dir.is_dir() {
            fs::read_dir(&dir)?.next().is_none()
        } else {
            fs::create_dir_all(&dir)?;
            true
        };

        let lock_file = recovery::lock_directory(&dir)?;

        let index = Index::new(options.index_type, &dir, options.sync_writes)?;
        let disk_index = (options.index_type == IndexType::BPlusTree).then_some(&index);
        merge::promote_merge_output(&dir, disk_index)?;

        let state = recovery::load_data_files(&dir)?;

        let (seq_no, seq_file_exists) = if options.index_type == IndexType::BPlusTree {
            match recovery::take_seq_no(&dir)? {
                Some(seq_no) => (seq_no, true),
                None => (NON_TRANSACTION_SEQ_NO, false),
            }
        } else {
            (NON_TRANSACTION_SEQ_NO, false)
        };

        let engine = Self {
            options,
            state: RwLock::new(state),
            index,
            seq_no: AtomicU64::new(seq_no),
            merging: AtomicBool::new(false),
            seq_file_exists,
            is_initial,
            _lock_file: lock_file,
        };

        if engine.options.index_type == IndexType::BPlusTree {
            engine.repair_active_tail()?;
        } else {
            engine.load_index_from_hint_file()?;
            let max_seq_no = engine.load_index_from_data_files()?;
            engine.seq_no.store(max_seq_no, Ordering::SeqCst);
        }

        tracing::info!(
            dir = %engine.options.dir_path.display(),
            index = ?engine.options.index_type,
            segments = engine.segment_count(),
            keys = engine.index.size(),
            fresh = engine.is_initial,
            "store opened"
        );

        Ok(engine)
    }

    /// Get the value stored for `key`
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(CaskError::EmptyKey);
        }

        let pos = self.index.get(key).ok_or(CaskError::KeyNotFound)?;
        self.state.read().read_value(key, &pos)
    }

    /// Store `value` under `key`
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(CaskError::EmptyKey);
        }

        let record = LogRecord::normal(key_with_seq(key, NON_TRANSACTION_SEQ_NO), value.to_vec());

        let mut state = self.state.write();
        let pos = self.append_log_record(&mut state, &record)?;
        if !self.index.put(key.to_vec(), pos) {
            return Err(CaskError::IndexUpdateFailed);
        }
        Ok(())
    }

    /// Remove `key`
    ///
    /// Fails with `KeyNotFound` without touching the log if the key is absent.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(CaskError::EmptyKey);
        }
        if self.index.get(key).is_none() {
            return Err(CaskError::KeyNotFound);
        }

        let record = LogRecord::deleted(key_with_seq(key, NON_TRANSACTION_SEQ_NO));

        let mut state = self.state.write();
        self.append_log_record(&mut state, &record)?;
        if !self.index.delete(key) {
            return Err(CaskError::KeyNotFound);
        }
        Ok(())
    }

    /// Every live key, in ascending order
    pub fn list_keys(&self) -> Vec<Vec<u8>> {
        let _state = self.state.read();

        let mut iter = self.index.iterator(false);
        let mut keys = Vec::with_capacity(self.index.size());
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        iter.close();
        keys
    }

    /// Visit every live key/value pair in ascending key order
    ///
    /// Stops early when `visitor` returns false. The store lock is held in
    /// shared mode throughout, so `visitor` must not write to this engine.
    pub fn fold<F>(&self, mut visitor: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let state = self.state.read();

        let mut iter = self.index.iterator(false);
        while iter.valid() {
            let value = state.read_value(iter.key(), &iter.value())?;
            if !visitor(iter.key(), &value) {
                break;
            }
            iter.next();
        }
        iter.close();
        Ok(())
    }

    /// Flush the active segment to stable storage
    pub fn sync(&self) -> Result<()> {
        self.state.read().sync_active()
    }

    /// Close the store
    ///
    /// With the disk index the current sequence number is written to the
    /// snapshot file first. The directory lock is released on return.
    pub fn close(self) -> Result<()> {
        let state = self.state.read();

        if self.options.index_type == IndexType::BPlusTree {
            self.write_seq_no_snapshot()?;
        }
        self.index.close()?;
        state.sync_active()?;

        tracing::info!(dir = %self.options.dir_path.display(), "store closed");
        Ok(())
    }

    // =========================================================================
    // Log Append
    // =========================================================================

    /// Append one record, returning where it landed
    ///
    /// Every write to the log goes through here with the store lock held
    /// exclusively.
    pub(crate) fn append_log_record(
        &self,
        state: &mut SegmentState,
        record: &LogRecord,
    ) -> Result<LogRecordPos> {
        let (buf, size) = encode_log_record(record);

        let needs_rotation = match &state.active {
            None => {
                state.active = Some(DataFile::open(&self.options.dir_path, 0)?);
                false
            }
            Some(active) => {
                active.write_offset() > 0
                    && active.write_offset() + size > self.options.data_file_size
            }
        };
        if needs_rotation {
            self.rotate_active(state)?;
        }

        let active = state
            .active
            .as_mut()
            .ok_or_else(|| CaskError::Corruption("no active data file".to_string()))?;

        let offset = active.write_offset();
        active.write(&buf)?;
        if self.options.sync_writes {
            active.sync()?;
        }

        Ok(LogRecordPos {
            file_id: active.file_id(),
            offset,
        })
    }

    /// Seal the active segment and start the next one
    fn rotate_active(&self, state: &mut SegmentState) -> Result<()> {
        let next_id = match &state.active {
            Some(active) => {
                active.sync()?;
                active.file_id() + 1
            }
            None => 0,
        };

        let new_active = DataFile::open(&self.options.dir_path, next_id)?;
        if let Some(sealed) = state.active.replace(new_active) {
            tracing::debug!(
                sealed = sealed.file_id(),
                size = sealed.write_offset(),
                active = next_id,
                "segment rotated"
            );
            state.older.insert(sealed.file_id(), sealed);
        }
        Ok(())
    }

    fn write_seq_no_snapshot(&self) -> Result<()> {
        let path = self.options.dir_path.join(crate::data::SEQ_NO_FILE_NAME);
        if path.exists() {
            fs::remove_file(&path)?;
        }

        let mut seq_file = DataFile::open_seq_no(&self.options.dir_path)?;
        let seq_no = self.seq_no.load(Ordering::SeqCst);
        let record = LogRecord::normal(SEQ_NO_KEY.to_vec(), seq_no.to_string().into_bytes());
        let (buf, _) = encode_log_record(&record);
        seq_file.write(&buf)?;
        seq_file.close()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn dir_path(&self) -> &Path {
        &self.options.dir_path
    }

    /// Number of live keys
    pub fn key_count(&self) -> usize {
        self.index.size()
    }

    /// Number of segment files, active included
    pub fn segment_count(&self) -> usize {
        let state = self.state.read();
        state.older.len() + usize::from(state.active.is_some())
    }

    /// Id of the segment receiving appends, if any
    pub fn active_file_id(&self) -> Option<u32> {
        self.state.read().active.as_ref().map(DataFile::file_id)
    }

    /// Last sequence number handed to a write batch
    pub fn seq_no(&self) -> u64 {
        self.seq_no.load(Ordering::SeqCst)
    }
}

fn check_options(options: &Options) -> Result<()> {
    if options.dir_path.as_os_str().is_empty() {
        return Err(CaskError::Config("database dir path is empty".to_string()));
    }
    if options.dir_path.file_name().is_none() {
        return Err(CaskError::Config(format!(
            "database dir path {} must end in a directory name",
            options.dir_path.display()
        )));
    }
    if options.data_file_size == 0 {
        return Err(CaskError::Config(
            "data file size must be greater than 0".to_string(),
        ));
    }
    Ok(())
}
