//! Tests for the engine iterator
//!
//! These tests verify:
//! - Ascending / descending order for every index backend
//! - Prefix filtering, seek and rewind
//! - Values are read from the log

use caskkv::{CaskError, Engine, IndexType, IteratorOptions, Options};
use proptest::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

const ALL_INDEX_TYPES: [IndexType; 3] = [IndexType::BTree, IndexType::Art, IndexType::BPlusTree];

fn setup_engine(index_type: IndexType) -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(
        Options::builder()
            .dir_path(temp_dir.path().join("db"))
            .index_type(index_type)
            .build(),
    )
    .unwrap();
    (temp_dir, engine)
}

fn collect(engine: &Engine, options: IteratorOptions) -> Vec<Vec<u8>> {
    let mut iter = engine.iter(options);
    let mut keys = Vec::new();
    while iter.valid() {
        keys.push(iter.key().to_vec());
        iter.next();
    }
    iter.close();
    keys
}

fn fill(engine: &Engine) {
    for key in [
        &b"user:2"[..],
        b"order:1",
        b"user:10",
        b"user:1",
        b"order:2",
        b"zeta",
        b"alpha",
    ] {
        engine.put(key, &[key, b"!"].concat()).unwrap();
    }
}

// =============================================================================
// Ordering Tests
// =============================================================================

#[test]
fn test_forward_and_reverse_order() {
    for index_type in ALL_INDEX_TYPES {
        let (_temp, engine) = setup_engine(index_type);
        fill(&engine);

        let forward = collect(&engine, IteratorOptions::default());
        let expected: Vec<Vec<u8>> = vec![
            b"alpha".to_vec(),
            b"order:1".to_vec(),
            b"order:2".to_vec(),
            b"user:1".to_vec(),
            b"user:10".to_vec(),
            b"user:2".to_vec(),
            b"zeta".to_vec(),
        ];
        assert_eq!(forward, expected, "{:?}", index_type);

        let mut reverse = collect(
            &engine,
            IteratorOptions {
                reverse: true,
                ..Default::default()
            },
        );
        reverse.reverse();
        assert_eq!(reverse, expected, "{:?}", index_type);
    }
}

#[test]
fn test_prefix_filter() {
    for index_type in ALL_INDEX_TYPES {
        let (_temp, engine) = setup_engine(index_type);
        fill(&engine);

        let users = collect(
            &engine,
            IteratorOptions {
                prefix: b"user:".to_vec(),
                reverse: false,
            },
        );
        assert_eq!(
            users,
            vec![b"user:1".to_vec(), b"user:10".to_vec(), b"user:2".to_vec()],
            "{:?}",
            index_type
        );

        let orders_desc = collect(
            &engine,
            IteratorOptions {
                prefix: b"order:".to_vec(),
                reverse: true,
            },
        );
        assert_eq!(orders_desc, vec![b"order:2".to_vec(), b"order:1".to_vec()]);

        let none = collect(
            &engine,
            IteratorOptions {
                prefix: b"missing".to_vec(),
                reverse: false,
            },
        );
        assert!(none.is_empty());
    }
}

#[test]
fn test_seek_and_rewind() {
    let (_temp, engine) = setup_engine(IndexType::BTree);
    fill(&engine);

    let mut iter = engine.iter(IteratorOptions::default());
    iter.seek(b"p");
    assert_eq!(iter.key(), b"user:1");
    iter.next();
    assert_eq!(iter.key(), b"user:10");

    iter.rewind();
    assert_eq!(iter.key(), b"alpha");

    let mut iter = engine.iter(IteratorOptions {
        reverse: true,
        ..Default::default()
    });
    iter.seek(b"p");
    assert_eq!(iter.key(), b"order:2");

    let mut iter = engine.iter(IteratorOptions {
        prefix: b"user:".to_vec(),
        reverse: false,
    });
    iter.seek(b"user:11");
    assert_eq!(iter.key(), b"user:2");
    iter.next();
    assert!(!iter.valid());
}

#[test]
fn test_values_come_from_the_log() {
    for index_type in ALL_INDEX_TYPES {
        let (_temp, engine) = setup_engine(index_type);
        fill(&engine);
        engine.put(b"alpha", b"rewritten").unwrap();

        let mut iter = engine.iter(IteratorOptions::default());
        assert_eq!(iter.key(), b"alpha");
        assert_eq!(iter.value().unwrap(), b"rewritten");
        iter.next();
        assert_eq!(iter.value().unwrap(), b"order:1!");
    }
}

#[test]
fn test_empty_store_iterator() {
    for index_type in ALL_INDEX_TYPES {
        let (_temp, engine) = setup_engine(index_type);
        let iter = engine.iter(IteratorOptions::default());
        assert!(!iter.valid());
    }
}

#[test]
fn test_exhausted_iterator_behaves_the_same_for_every_index() {
    for index_type in ALL_INDEX_TYPES {
        let (_temp, engine) = setup_engine(index_type);
        engine.put(b"only", b"1").unwrap();

        let mut iter = engine.iter(IteratorOptions::default());
        iter.next();
        assert!(!iter.valid(), "{:?}", index_type);
        assert_eq!(iter.key(), b"", "{:?}", index_type);
        assert!(matches!(iter.value(), Err(CaskError::KeyNotFound)));
    }
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_iteration_matches_sorted_set(
        keys in proptest::collection::btree_set(proptest::collection::vec(1u8..8, 1..5), 1..60),
        prefix in proptest::collection::vec(1u8..8, 0..2),
        reverse in any::<bool>(),
    ) {
        let (_temp, engine) = setup_engine(IndexType::Art);
        for key in &keys {
            engine.put(key, key).unwrap();
        }

        let mut expected: Vec<Vec<u8>> = keys
            .iter()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect();
        if reverse {
            expected.reverse();
        }

        let actual = collect(&engine, IteratorOptions { prefix, reverse });
        prop_assert_eq!(actual, expected);
    }
}
