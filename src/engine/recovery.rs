//! Startup recovery
//!
//! Everything `Engine::open` does to turn a directory back into a store:
//! lock it, discover segments, rebuild the index from the hint file and the
//! log, and pick up the sequence number snapshot.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::Path;

use fs2::FileExt;

use crate::data::{
    decode_position, parse_key_with_seq, DataFile, LogRecordPos, LogRecordType,
    DATA_FILE_SUFFIX, HINT_FILE_NAME, MERGE_FINISHED_FILE_NAME, NON_TRANSACTION_SEQ_NO,
    SEQ_NO_FILE_NAME,
};
use crate::error::{CaskError, Result};
use crate::index::Indexer;

use super::merge::read_merge_marker;
use super::{Engine, SegmentState, LOCK_FILE_NAME};

/// Take the exclusive advisory lock on the store directory
pub(super) fn lock_directory(dir: &Path) -> Result<File> {
    let lock_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(dir.join(LOCK_FILE_NAME))?;

    lock_file
        .try_lock_exclusive()
        .map_err(|_| CaskError::DirectoryLocked(dir.to_path_buf()))?;
    Ok(lock_file)
}

/// Ids of every segment file in `dir`, ascending
pub(crate) fn data_file_ids(dir: &Path) -> Result<Vec<u32>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(stem) = name.strip_suffix(DATA_FILE_SUFFIX) {
            let id = stem
                .parse::<u32>()
                .map_err(|_| CaskError::DirectoryCorrupted(name.to_string()))?;
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Open every segment; the highest id becomes the active one
pub(super) fn load_data_files(dir: &Path) -> Result<SegmentState> {
    let ids = data_file_ids(dir)?;

    let mut state = SegmentState {
        active: None,
        older: HashMap::with_capacity(ids.len()),
    };
    for (i, &id) in ids.iter().enumerate() {
        let data_file = DataFile::open(dir, id)?;
        if i == ids.len() - 1 {
            state.active = Some(data_file);
        } else {
            state.older.insert(id, data_file);
        }
    }
    Ok(state)
}

/// Read and delete the sequence number snapshot
///
/// Deleting it means an unclean shutdown leaves no snapshot behind.
pub(super) fn take_seq_no(dir: &Path) -> Result<Option<u64>> {
    let path = dir.join(SEQ_NO_FILE_NAME);
    if !path.is_file() {
        return Ok(None);
    }

    let seq_no = {
        let seq_file = DataFile::open_seq_no(dir)?;
        match seq_file.read_log_record(0) {
            Ok(Some((record, _))) => Some(parse_decimal(&record.value, "sequence number")?),
            // Cut short by a crash during close
            Ok(None) | Err(CaskError::UnexpectedEof { .. }) => None,
            Err(e) => return Err(e),
        }
    };
    fs::remove_file(&path)?;
    Ok(seq_no)
}

pub(super) fn parse_decimal<T: std::str::FromStr>(value: &[u8], what: &str) -> Result<T> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| CaskError::Corruption(format!("malformed {}", what)))
}

/// A record replayed from the log, waiting for its batch to finish
struct PendingRecord {
    key: Vec<u8>,
    rec_type: LogRecordType,
    pos: LogRecordPos,
}

impl Engine {
    /// Seed the index with the positions recorded by the last merge
    pub(super) fn load_index_from_hint_file(&self) -> Result<()> {
        let dir = &self.options.dir_path;
        if !dir.join(HINT_FILE_NAME).is_file() {
            return Ok(());
        }

        let hint_file = DataFile::open_hint(dir)?;
        let mut offset = 0;
        while let Some((record, size)) = hint_file.read_log_record(offset)? {
            let pos = decode_position(&record.value)?;
            self.index.put(record.key, pos);
            offset += size;
        }
        Ok(())
    }

    /// Replay every segment the hint file does not cover
    ///
    /// Returns the highest sequence number seen. A torn record at the end of
    /// the active segment is cut off so new appends follow the last good one.
    pub(super) fn load_index_from_data_files(&self) -> Result<u64> {
        let dir = &self.options.dir_path;
        let non_merge_id = if dir.join(MERGE_FINISHED_FILE_NAME).is_file() {
            let id = read_merge_marker(dir)?
                .ok_or_else(|| CaskError::Corruption("incomplete merge marker".to_string()))?;
            Some(id)
        } else {
            None
        };

        let mut state = self.state.write();
        let active_id = state.active.as_ref().map(DataFile::file_id);

        let mut file_ids: Vec<u32> = state.older.keys().copied().chain(active_id).collect();
        file_ids.sort_unstable();

        let mut batches: HashMap<u64, Vec<PendingRecord>> = HashMap::new();
        let mut max_seq_no = NON_TRANSACTION_SEQ_NO;

        for file_id in file_ids {
            if non_merge_id.is_some_and(|id| file_id < id) {
                continue;
            }

            let data_file = state
                .data_file(file_id)
                .ok_or(CaskError::DataFileNotFound(file_id))?;

            let mut offset = 0;
            let cut_short = loop {
                let (record, size) = match data_file.read_log_record(offset) {
                    Ok(Some(read)) => read,
                    Ok(None) => break false,
                    Err(CaskError::UnexpectedEof { .. }) => break true,
                    Err(e) => return Err(e),
                };
                let pos = LogRecordPos { file_id, offset };
                let (real_key, seq_no) = parse_key_with_seq(&record.key)?;

                if seq_no == NON_TRANSACTION_SEQ_NO {
                    self.apply_replayed(real_key.to_vec(), record.rec_type, pos)?;
                } else if record.rec_type == LogRecordType::BatchFinished {
                    for pending in batches.remove(&seq_no).unwrap_or_default() {
                        self.apply_replayed(pending.key, pending.rec_type, pending.pos)?;
                    }
                } else {
                    batches.entry(seq_no).or_default().push(PendingRecord {
                        key: real_key.to_vec(),
                        rec_type: record.rec_type,
                        pos,
                    });
                }

                max_seq_no = max_seq_no.max(seq_no);
                offset += size;
            };

            finish_segment(&mut state, file_id, offset, cut_short, Some(file_id) == active_id)?;
        }

        if !batches.is_empty() {
            tracing::warn!(batches = batches.len(), "discarded unfinished write batches");
        }
        Ok(max_seq_no)
    }

    /// Find the end of the active segment's valid records and cut off the rest
    ///
    /// Used by the disk index, which skips log replay on open.
    pub(super) fn repair_active_tail(&self) -> Result<()> {
        let mut state = self.state.write();
        let Some(active) = state.active.as_ref() else {
            return Ok(());
        };
        let file_id = active.file_id();

        let mut offset = 0;
        let cut_short = loop {
            match active.read_log_record(offset) {
                Ok(Some((_, size))) => offset += size,
                Ok(None) => break false,
                Err(CaskError::UnexpectedEof { .. }) => break true,
                Err(e) => return Err(e),
            }
        };
        finish_segment(&mut state, file_id, offset, cut_short, true)
    }

    fn apply_replayed(
        &self,
        key: Vec<u8>,
        rec_type: LogRecordType,
        pos: LogRecordPos,
    ) -> Result<()> {
        match rec_type {
            LogRecordType::Normal => {
                if !self.index.put(key, pos) {
                    return Err(CaskError::IndexUpdateFailed);
                }
            }
            LogRecordType::Deleted => {
                self.index.delete(&key);
            }
            LogRecordType::BatchFinished => {}
        }
        Ok(())
    }
}

/// Deal with whatever follows the last readable record of a segment
///
/// Unreadable bytes are only a torn tail when no valid record follows them.
/// The active segment is truncated back to `valid_end`; a sealed segment
/// never has a torn tail.
fn finish_segment(
    state: &mut SegmentState,
    file_id: u32,
    valid_end: u64,
    cut_short: bool,
    is_active: bool,
) -> Result<()> {
    let data_file = state
        .data_file(file_id)
        .ok_or(CaskError::DataFileNotFound(file_id))?;
    let file_size = data_file.size()?;

    if valid_end < file_size && data_file.has_record_after(valid_end)? {
        return Err(CaskError::Corruption(format!(
            "unreadable record in data file {} at offset {} is followed by valid records",
            file_id, valid_end
        )));
    }

    if is_active {
        if let Some(active) = state.active.as_mut() {
            if valid_end < file_size {
                tracing::warn!(
                    file_id,
                    valid = valid_end,
                    file_size,
                    "truncating torn tail of active segment"
                );
                active.truncate(valid_end)?;
            } else {
                active.set_write_offset(valid_end);
            }
        }
    } else if cut_short {
        return Err(CaskError::Corruption(format!(
            "sealed data file {} ends with an incomplete record at offset {}",
            file_id, valid_end
        )));
    } else if valid_end < file_size {
        tracing::warn!(
            file_id,
            valid = valid_end,
            file_size,
            "zero padding in sealed segment"
        );
    }
    Ok(())
}
