//! Merge (compaction)
//!
//! Rewrites the live records of every sealed segment into a sibling
//! directory, then swaps the output in on the next open.
//!
//! ## Directory protocol
//! ```text
//!   <dir>-merge/
//!     ├── 000000000.data ...   compacted segments
//!     ├── hint                 key → position in the compacted segments
//!     └── merge                marker: first segment id NOT merged
//! ```
//!
//! The marker is written last. A merge directory without a complete one is
//! an interrupted merge and is discarded. With one, promotion on open:
//! 1. Delete old segments below the marker id and the old hint
//! 2. Move the new hint, then the segments
//! 3. Repoint a disk index at the merged segments
//! 4. Move the marker, remove the merge directory
//!
//! Step 1 only runs while the hint is still in the merge directory, and
//! the marker stays behind until everything else is done, so promotion
//! can be rerun after a crash at any point.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::{IndexType, Options};
use crate::data::{
    data_file_name, decode_position, encode_log_record, key_with_seq, parse_key_with_seq,
    DataFile, LogRecord, HINT_FILE_NAME, MERGE_FINISHED_FILE_NAME, NON_TRANSACTION_SEQ_NO,
};
use crate::error::{CaskError, Result};
use crate::index::{Index, Indexer};

use super::recovery::{data_file_ids, parse_decimal};
use super::Engine;

/// Key of the single record in the merge marker file
const MERGE_FINISHED_KEY: &[u8] = b"merge.finished";

const MERGE_DIR_SUFFIX: &str = "-merge";

/// Sibling staging directory used by merge: `<dir>-merge`
pub(crate) fn merge_dir_path(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.with_file_name(format!("{}{}", name, MERGE_DIR_SUFFIX))
}

/// Clears the single-flight flag when the merge ends, however it ends
struct MergeGuard<'a>(&'a AtomicBool);

impl Drop for MergeGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Engine {
    /// Compact every sealed segment into the merge directory
    ///
    /// Only the rotation at the start holds the store lock; reads and writes
    /// continue against the new active segment while records are rewritten.
    /// The output takes effect the next time the store is opened.
    pub fn merge(&self) -> Result<()> {
        let (non_merge_id, merge_ids, _guard) = {
            let mut state = self.state.write();
            let Some(active) = state.active.as_ref() else {
                return Ok(());
            };
            let active_is_empty = active.write_offset() == 0;

            if self.merging.swap(true, Ordering::SeqCst) {
                return Err(CaskError::MergeInProgress);
            }
            let guard = MergeGuard(&self.merging);

            if !active_is_empty {
                self.rotate_active(&mut state)?;
            }
            let non_merge_id = state
                .active
                .as_ref()
                .map(DataFile::file_id)
                .unwrap_or_default();

            let mut merge_ids: Vec<u32> = state.older.keys().copied().collect();
            merge_ids.sort_unstable();
            (non_merge_id, merge_ids, guard)
        };

        if merge_ids.is_empty() {
            return Ok(());
        }

        tracing::info!(segments = merge_ids.len(), non_merge_id, "merge started");

        let dir = &self.options.dir_path;
        let merge_dir = merge_dir_path(dir);
        if merge_dir.exists() {
            fs::remove_dir_all(&merge_dir)?;
        }

        let merge_engine = Engine::open(Options {
            dir_path: merge_dir.clone(),
            data_file_size: self.options.data_file_size,
            sync_writes: false,
            index_type: IndexType::BTree,
        })?;
        let mut hint_file = DataFile::open_hint(&merge_dir)?;

        let mut kept = 0usize;
        for file_id in merge_ids {
            let data_file = DataFile::open(dir, file_id)?;

            let mut offset = 0;
            while let Some((record, size)) = data_file.read_log_record(offset)? {
                let (real_key, _) = parse_key_with_seq(&record.key)?;

                let is_live = self
                    .index
                    .get(real_key)
                    .is_some_and(|pos| pos.file_id == file_id && pos.offset == offset);
                if is_live {
                    let rewritten = LogRecord::normal(
                        key_with_seq(real_key, NON_TRANSACTION_SEQ_NO),
                        record.value,
                    );
                    let pos = {
                        let mut merge_state = merge_engine.state.write();
                        merge_engine.append_log_record(&mut merge_state, &rewritten)?
                    };
                    hint_file.write_hint_record(real_key, &pos)?;
                    kept += 1;
                }
                offset += size;
            }
        }

        hint_file.close()?;
        merge_engine.sync()?;
        merge_engine.close()?;

        let mut marker = DataFile::open_merge_finished(&merge_dir)?;
        let record = LogRecord::normal(
            MERGE_FINISHED_KEY.to_vec(),
            non_merge_id.to_string().into_bytes(),
        );
        let (buf, _) = encode_log_record(&record);
        marker.write(&buf)?;
        marker.close()?;

        tracing::info!(kept, non_merge_id, "merge finished");
        Ok(())
    }
}

/// Id recorded in the merge marker under `dir`
///
/// `None` when the marker is empty or was cut short.
pub(super) fn read_merge_marker(dir: &Path) -> Result<Option<u32>> {
    let marker = DataFile::open_merge_finished(dir)?;
    match marker.read_log_record(0) {
        Ok(Some((record, _))) => Ok(Some(parse_decimal(&record.value, "merge marker")?)),
        Ok(None) | Err(CaskError::UnexpectedEof { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Swap a finished merge into `dir`
///
/// `disk_index` is the persistent index, if the store uses one; it is
/// repointed at the merged segments before the marker leaves the merge
/// directory. Returns the marker id when a merge was promoted by this call.
pub(super) fn promote_merge_output(
    dir: &Path,
    disk_index: Option<&Index>,
) -> Result<Option<u32>> {
    let merge_dir = merge_dir_path(dir);
    if !merge_dir.is_dir() {
        return Ok(None);
    }

    let marker = if merge_dir.join(MERGE_FINISHED_FILE_NAME).is_file() {
        read_merge_marker(&merge_dir)?
    } else {
        None
    };
    let Some(non_merge_id) = marker else {
        tracing::warn!(dir = %merge_dir.display(), "removing unfinished merge directory");
        fs::remove_dir_all(&merge_dir)?;
        return Ok(None);
    };

    let merged_hint = merge_dir.join(HINT_FILE_NAME);
    if merged_hint.is_file() {
        for file_id in data_file_ids(dir)? {
            if file_id < non_merge_id {
                fs::remove_file(dir.join(data_file_name(file_id)))?;
            }
        }
        let old_hint = dir.join(HINT_FILE_NAME);
        if old_hint.is_file() {
            fs::remove_file(&old_hint)?;
        }
        fs::rename(&merged_hint, &old_hint)?;
    }

    for file_id in data_file_ids(&merge_dir)? {
        let name = data_file_name(file_id);
        fs::rename(merge_dir.join(&name), dir.join(&name))?;
    }

    if let Some(index) = disk_index {
        refresh_index_from_hint(dir, index, non_merge_id)?;
    }

    fs::rename(
        merge_dir.join(MERGE_FINISHED_FILE_NAME),
        dir.join(MERGE_FINISHED_FILE_NAME),
    )?;
    fs::remove_dir_all(&merge_dir)?;

    tracing::info!(non_merge_id, "merge output promoted");
    Ok(Some(non_merge_id))
}

/// Point index entries at the merged segments
///
/// Only entries still pointing below `non_merge_id` are rewritten; newer
/// entries were written after the merge started and stay as they are.
/// Hint positions never change, so running this again after a crash
/// rewrites the same values.
fn refresh_index_from_hint(dir: &Path, index: &Index, non_merge_id: u32) -> Result<()> {
    if !dir.join(HINT_FILE_NAME).is_file() {
        return Ok(());
    }

    let hint_file = DataFile::open_hint(dir)?;
    let mut offset = 0;
    let mut refreshed = 0usize;
    while let Some((record, size)) = hint_file.read_log_record(offset)? {
        let stale = index
            .get(&record.key)
            .is_some_and(|current| current.file_id < non_merge_id);
        if stale {
            let pos = decode_position(&record.value)?;
            if !index.put(record.key, pos) {
                return Err(CaskError::IndexUpdateFailed);
            }
            refreshed += 1;
        }
        offset += size;
    }

    tracing::info!(refreshed, non_merge_id, "index refreshed from hint file");
    Ok(())
}
