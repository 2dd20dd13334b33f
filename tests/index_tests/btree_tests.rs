//! Tests for the in-memory BTree index
//!
//! These tests verify:
//! - put/get/delete/size contract
//! - Snapshot iterators in both directions, with seek

use caskkv::data::LogRecordPos;
use caskkv::index::{BTreeIndex, IndexIterator, Indexer};

fn pos(file_id: u32, offset: u64) -> LogRecordPos {
    LogRecordPos { file_id, offset }
}

fn collect_keys(index: &BTreeIndex, reverse: bool) -> Vec<Vec<u8>> {
    let mut iter = index.iterator(reverse);
    let mut keys = Vec::new();
    while iter.valid() {
        keys.push(iter.key().to_vec());
        iter.next();
    }
    keys
}

// =============================================================================
// Basic Operations
// =============================================================================

#[test]
fn test_put_get_overwrite() {
    let index = BTreeIndex::new();

    assert!(index.put(b"a".to_vec(), pos(0, 0)));
    assert_eq!(index.get(b"a"), Some(pos(0, 0)));

    assert!(index.put(b"a".to_vec(), pos(1, 64)));
    assert_eq!(index.get(b"a"), Some(pos(1, 64)));
    assert_eq!(index.size(), 1);
}

#[test]
fn test_get_missing() {
    let index = BTreeIndex::new();
    assert_eq!(index.get(b"missing"), None);
}

#[test]
fn test_delete_reports_existence() {
    let index = BTreeIndex::new();
    index.put(b"a".to_vec(), pos(0, 0));

    assert!(index.delete(b"a"));
    assert!(!index.delete(b"a"));
    assert!(!index.delete(b"never"));
    assert_eq!(index.size(), 0);
}

// =============================================================================
// Iterator Tests
// =============================================================================

#[test]
fn test_iterator_orders_bytewise() {
    let index = BTreeIndex::new();
    for (i, key) in [&b"b"[..], b"a", b"ab", b"\xff", b"B"].iter().enumerate() {
        index.put(key.to_vec(), pos(0, i as u64));
    }

    let forward = collect_keys(&index, false);
    assert_eq!(
        forward,
        vec![b"B".to_vec(), b"a".to_vec(), b"ab".to_vec(), b"b".to_vec(), b"\xff".to_vec()]
    );

    let mut backward = collect_keys(&index, true);
    backward.reverse();
    assert_eq!(backward, forward);
}

#[test]
fn test_iterator_seek() {
    let index = BTreeIndex::new();
    for key in [&b"aa"[..], b"bb", b"cc", b"dd"] {
        index.put(key.to_vec(), pos(0, 0));
    }

    let mut iter = index.iterator(false);
    iter.seek(b"bc");
    assert!(iter.valid());
    assert_eq!(iter.key(), b"cc");

    iter.seek(b"zz");
    assert!(!iter.valid());

    let mut iter = index.iterator(true);
    iter.seek(b"bc");
    assert!(iter.valid());
    assert_eq!(iter.key(), b"bb");

    iter.seek(b"a");
    assert!(!iter.valid());

    iter.rewind();
    assert_eq!(iter.key(), b"dd");
}

#[test]
fn test_iterator_is_a_snapshot() {
    let index = BTreeIndex::new();
    index.put(b"a".to_vec(), pos(0, 1));

    let mut iter = index.iterator(false);
    index.put(b"b".to_vec(), pos(0, 2));
    index.delete(b"a");

    assert!(iter.valid());
    assert_eq!(iter.key(), b"a");
    assert_eq!(iter.value(), pos(0, 1));
    iter.next();
    assert!(!iter.valid());
}

#[test]
fn test_iterator_close_invalidates() {
    let index = BTreeIndex::new();
    index.put(b"a".to_vec(), pos(0, 0));

    let mut iter = index.iterator(false);
    iter.close();
    assert!(!iter.valid());
}

#[test]
fn test_exhausted_iterator_yields_empty_entry() {
    let index = BTreeIndex::new();
    index.put(b"a".to_vec(), pos(3, 9));

    let mut iter = index.iterator(false);
    iter.next();
    assert!(!iter.valid());
    assert_eq!(iter.key(), b"");
    assert_eq!(iter.value(), pos(0, 0));

    iter.close();
    assert_eq!(iter.key(), b"");
}
