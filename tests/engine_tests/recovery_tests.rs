//! Tests for startup recovery
//!
//! These tests verify:
//! - Reopen restores every value (every index backend)
//! - Torn tails are cut off and appends continue after the last good record
//! - Checksum failures and corrupted lengths abort open, leaving the files as they are
//! - Sealed segments never lose a cut-short tail silently
//! - Sequence numbers resume after replay or from the snapshot
//! - Unclean shutdown with the disk index disables write batches

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use caskkv::data::{data_file_name, encode_log_record, key_with_seq, LogRecord, SEQ_NO_FILE_NAME};
use caskkv::index::{BPlusTreeIndex, Indexer};
use caskkv::{CaskError, Engine, IndexType, Options, WriteBatchOptions};
use proptest::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

const ALL_INDEX_TYPES: [IndexType; 3] = [IndexType::BTree, IndexType::Art, IndexType::BPlusTree];

fn options(dir: &Path, index_type: IndexType) -> Options {
    Options::builder()
        .dir_path(dir)
        .data_file_size(4 * 1024)
        .index_type(index_type)
        .build()
}

fn append_raw(dir: &Path, file_id: u32, bytes: &[u8]) {
    let mut file = OpenOptions::new()
        .append(true)
        .open(dir.join(data_file_name(file_id)))
        .unwrap();
    file.write_all(bytes).unwrap();
    file.sync_all().unwrap();
}

// =============================================================================
// Reopen Tests
// =============================================================================

#[test]
fn test_reopen_restores_values_for_every_index() {
    for index_type in ALL_INDEX_TYPES {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("db");

        {
            let engine = Engine::open(options(&dir, index_type)).unwrap();
            for i in 0..300 {
                engine
                    .put(format!("key-{:04}", i).as_bytes(), format!("value-{}", i).as_bytes())
                    .unwrap();
            }
            for i in 0..50 {
                engine
                    .put(format!("key-{:04}", i).as_bytes(), b"updated")
                    .unwrap();
            }
            for i in 250..300 {
                engine.delete(format!("key-{:04}", i).as_bytes()).unwrap();
            }
            assert!(engine.segment_count() > 1);
            engine.close().unwrap();
        }

        let engine = Engine::open(options(&dir, index_type)).unwrap();
        assert_eq!(engine.key_count(), 250, "{:?}", index_type);
        for i in 0..50 {
            assert_eq!(engine.get(format!("key-{:04}", i).as_bytes()).unwrap(), b"updated");
        }
        for i in 50..250 {
            assert_eq!(
                engine.get(format!("key-{:04}", i).as_bytes()).unwrap(),
                format!("value-{}", i).as_bytes()
            );
        }
        for i in 250..300 {
            assert!(matches!(
                engine.get(format!("key-{:04}", i).as_bytes()),
                Err(CaskError::KeyNotFound)
            ));
        }
    }
}

#[test]
fn test_reopen_without_close_keeps_writes() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("db");

    {
        let engine = Engine::open(options(&dir, IndexType::BTree)).unwrap();
        engine.put(b"a", b"1").unwrap();
        engine.put(b"b", b"2").unwrap();
        // dropped without close
    }

    let engine = Engine::open(options(&dir, IndexType::BTree)).unwrap();
    assert_eq!(engine.get(b"a").unwrap(), b"1");
    assert_eq!(engine.get(b"b").unwrap(), b"2");
}

#[test]
fn test_reopen_continues_active_segment() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("db");

    {
        let engine = Engine::open(options(&dir, IndexType::BTree)).unwrap();
        engine.put(b"a", b"1").unwrap();
        engine.close().unwrap();
    }

    let engine = Engine::open(options(&dir, IndexType::BTree)).unwrap();
    engine.put(b"b", b"2").unwrap();
    assert_eq!(engine.segment_count(), 1);
    engine.close().unwrap();

    let engine = Engine::open(options(&dir, IndexType::BTree)).unwrap();
    assert_eq!(engine.get(b"a").unwrap(), b"1");
    assert_eq!(engine.get(b"b").unwrap(), b"2");
}

// =============================================================================
// Torn Tail / Corruption Tests
// =============================================================================

#[test]
fn test_torn_tail_is_truncated() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("db");

    let good_len = {
        let engine = Engine::open(options(&dir, IndexType::BTree)).unwrap();
        engine.put(b"a", b"1").unwrap();
        engine.put(b"b", b"2").unwrap();
        engine.close().unwrap();
        fs::metadata(dir.join(data_file_name(0))).unwrap().len()
    };

    // Half of a record, as if the process died mid-append
    let (torn, len) = encode_log_record(&LogRecord::normal(key_with_seq(b"c", 0), vec![3; 64]));
    append_raw(&dir, 0, &torn[..(len as usize) / 2]);

    {
        let engine = Engine::open(options(&dir, IndexType::BTree)).unwrap();
        assert_eq!(fs::metadata(dir.join(data_file_name(0))).unwrap().len(), good_len);
        assert!(matches!(engine.get(b"c"), Err(CaskError::KeyNotFound)));

        engine.put(b"d", b"4").unwrap();
        engine.close().unwrap();
    }

    let engine = Engine::open(options(&dir, IndexType::BTree)).unwrap();
    assert_eq!(engine.get(b"a").unwrap(), b"1");
    assert_eq!(engine.get(b"b").unwrap(), b"2");
    assert_eq!(engine.get(b"d").unwrap(), b"4");
}

#[test]
fn test_zero_padded_tail_is_truncated() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("db");

    {
        let engine = Engine::open(options(&dir, IndexType::BTree)).unwrap();
        engine.put(b"a", b"1").unwrap();
        engine.close().unwrap();
    }
    append_raw(&dir, 0, &[0u8; 128]);

    {
        let engine = Engine::open(options(&dir, IndexType::BTree)).unwrap();
        engine.put(b"b", b"2").unwrap();
        engine.close().unwrap();
    }

    let engine = Engine::open(options(&dir, IndexType::BTree)).unwrap();
    assert_eq!(engine.get(b"a").unwrap(), b"1");
    assert_eq!(engine.get(b"b").unwrap(), b"2");
}

#[test]
fn test_checksum_failure_aborts_open() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("db");

    {
        let engine = Engine::open(options(&dir, IndexType::BTree)).unwrap();
        engine.put(b"a", b"first").unwrap();
        engine.put(b"b", b"second").unwrap();
        engine.close().unwrap();
    }

    // First record: 7-byte header, then "\0a", then the value at offset 9
    let path = dir.join(data_file_name(0));
    let mut bytes = fs::read(&path).unwrap();
    assert_eq!(bytes[9], b'f');
    bytes[9] = b'F';
    fs::write(&path, &bytes).unwrap();

    assert!(matches!(
        Engine::open(options(&dir, IndexType::BTree)),
        Err(CaskError::ChecksumMismatch { file_id: 0, offset: 0 })
    ));
}

#[test]
fn test_corrupted_length_aborts_open_without_truncating() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("db");

    {
        let engine = Engine::open(options(&dir, IndexType::BTree)).unwrap();
        engine.put(b"a", b"1").unwrap();
        engine.put(b"b", b"2").unwrap();
        engine.put(b"c", b"3").unwrap();
        engine.close().unwrap();
    }

    // Value length of the first record: 4 crc, 1 type, 1 key length
    let path = dir.join(data_file_name(0));
    let original = fs::read(&path).unwrap();
    let mut bytes = original.clone();
    assert_eq!(bytes[6], 1);
    bytes[6] = 0x7f;
    fs::write(&path, &bytes).unwrap();

    assert!(matches!(
        Engine::open(options(&dir, IndexType::BTree)),
        Err(CaskError::Corruption(_))
    ));
    assert_eq!(fs::read(&path).unwrap(), bytes);

    // Nothing was lost: repairing the byte brings every record back
    fs::write(&path, &original).unwrap();
    let engine = Engine::open(options(&dir, IndexType::BTree)).unwrap();
    assert_eq!(engine.get(b"a").unwrap(), b"1");
    assert_eq!(engine.get(b"b").unwrap(), b"2");
    assert_eq!(engine.get(b"c").unwrap(), b"3");
}

#[test]
fn test_cut_short_sealed_segment_aborts_open() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("db");

    {
        let engine = Engine::open(options(&dir, IndexType::BTree)).unwrap();
        for i in 0..200 {
            engine.put(format!("key-{:04}", i).as_bytes(), &[b'v'; 32]).unwrap();
        }
        assert!(engine.segment_count() > 1);
        engine.close().unwrap();
    }

    let path = dir.join(data_file_name(0));
    let len = fs::metadata(&path).unwrap().len();
    OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(len - 1)
        .unwrap();

    assert!(matches!(
        Engine::open(options(&dir, IndexType::BTree)),
        Err(CaskError::Corruption(_))
    ));
}

#[test]
fn test_disk_index_store_truncates_torn_tail() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("db");

    let good_len = {
        let engine = Engine::open(options(&dir, IndexType::BPlusTree)).unwrap();
        engine.put(b"a", b"1").unwrap();
        engine.close().unwrap();
        fs::metadata(dir.join(data_file_name(0))).unwrap().len()
    };

    let (torn, len) = encode_log_record(&LogRecord::normal(key_with_seq(b"b", 0), vec![2; 64]));
    append_raw(&dir, 0, &torn[..(len as usize) / 2]);

    {
        let engine = Engine::open(options(&dir, IndexType::BPlusTree)).unwrap();
        assert_eq!(fs::metadata(dir.join(data_file_name(0))).unwrap().len(), good_len);
        engine.put(b"c", b"3").unwrap();
        engine.close().unwrap();
    }

    let engine = Engine::open(options(&dir, IndexType::BPlusTree)).unwrap();
    assert_eq!(engine.get(b"a").unwrap(), b"1");
    assert_eq!(engine.get(b"c").unwrap(), b"3");
    assert!(matches!(engine.get(b"b"), Err(CaskError::KeyNotFound)));
}

#[test]
fn test_index_entry_for_another_key_is_corruption() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("db");

    {
        let engine = Engine::open(options(&dir, IndexType::BPlusTree)).unwrap();
        engine.put(b"a", b"1").unwrap();
        engine.put(b"b", b"2").unwrap();
        engine.close().unwrap();
    }
    {
        let index = BPlusTreeIndex::open(&dir, true).unwrap();
        let b_pos = index.get(b"b").unwrap();
        assert!(index.put(b"a".to_vec(), b_pos));
        index.close().unwrap();
    }

    let engine = Engine::open(options(&dir, IndexType::BPlusTree)).unwrap();
    assert!(matches!(engine.get(b"a"), Err(CaskError::Corruption(_))));
    assert_eq!(engine.get(b"b").unwrap(), b"2");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_flipped_byte_in_log_aborts_open(
        index in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("db");
        {
            let engine = Engine::open(options(&dir, IndexType::BTree)).unwrap();
            engine.put(b"first", b"some value").unwrap();
            engine.put(b"second", b"another value").unwrap();
            engine.close().unwrap();
        }

        // Any byte of the first record; the second one follows it intact
        let first = LogRecord::normal(key_with_seq(b"first", 0), b"some value".to_vec());
        let (_, first_len) = encode_log_record(&first);
        let path = dir.join(data_file_name(0));
        let mut bytes = fs::read(&path).unwrap();
        bytes[index.index(first_len as usize)] ^= flip;
        fs::write(&path, &bytes).unwrap();

        prop_assert!(Engine::open(options(&dir, IndexType::BTree)).is_err());
    }
}

// =============================================================================
// Sequence Number Tests
// =============================================================================

#[test]
fn test_seq_no_resumes_after_replay() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("db");

    {
        let engine = Engine::open(options(&dir, IndexType::BTree)).unwrap();
        for i in 0..3 {
            let batch = engine.new_write_batch(WriteBatchOptions::default()).unwrap();
            batch.put(format!("k{}", i).as_bytes(), b"v").unwrap();
            batch.commit().unwrap();
        }
        assert_eq!(engine.seq_no(), 3);
        engine.close().unwrap();
    }

    let engine = Engine::open(options(&dir, IndexType::BTree)).unwrap();
    assert_eq!(engine.seq_no(), 3);

    let batch = engine.new_write_batch(WriteBatchOptions::default()).unwrap();
    batch.put(b"k3", b"v").unwrap();
    batch.commit().unwrap();
    assert_eq!(engine.seq_no(), 4);
}

#[test]
fn test_disk_index_seq_no_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("db");

    {
        let engine = Engine::open(options(&dir, IndexType::BPlusTree)).unwrap();
        let batch = engine.new_write_batch(WriteBatchOptions::default()).unwrap();
        batch.put(b"a", b"1").unwrap();
        batch.commit().unwrap();
        engine.close().unwrap();
    }
    assert!(dir.join(SEQ_NO_FILE_NAME).exists());

    let engine = Engine::open(options(&dir, IndexType::BPlusTree)).unwrap();
    assert!(!dir.join(SEQ_NO_FILE_NAME).exists());
    assert_eq!(engine.seq_no(), 1);
    assert_eq!(engine.get(b"a").unwrap(), b"1");

    let batch = engine.new_write_batch(WriteBatchOptions::default()).unwrap();
    batch.put(b"b", b"2").unwrap();
    batch.commit().unwrap();
    assert_eq!(engine.seq_no(), 2);
}

#[test]
fn test_disk_index_unclean_shutdown_refuses_batches() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("db");

    let mut opts = options(&dir, IndexType::BPlusTree);
    opts.sync_writes = true;

    {
        let engine = Engine::open(opts.clone()).unwrap();
        engine.put(b"a", b"1").unwrap();
        // dropped without close: no snapshot written
    }

    let engine = Engine::open(opts).unwrap();
    assert_eq!(engine.get(b"a").unwrap(), b"1");
    assert!(matches!(
        engine.new_write_batch(WriteBatchOptions::default()),
        Err(CaskError::SeqNoUnavailable)
    ));

    // Plain writes are unaffected
    engine.put(b"b", b"2").unwrap();
}

#[test]
fn test_fresh_disk_index_store_allows_batches() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(options(&temp_dir.path().join("db"), IndexType::BPlusTree)).unwrap();

    assert!(engine.new_write_batch(WriteBatchOptions::default()).is_ok());
}
