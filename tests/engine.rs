//! End-to-end engine scenarios: rotation, crash-safe restart, atomic
//! batch replay, torn-batch discard, and merge liveness.

use caskdb::record::{Record, RecordType, encode_composite_key};
use caskdb::{Engine, IndexType, Options, StorageError, WriteBatchOptions};

fn options(dir: &std::path::Path) -> Options {
    Options { dir_path: dir.to_path_buf(), ..Options::default() }
}

#[test]
fn basic_put_get() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(options(dir.path())).unwrap();

    engine.put(b"k", b"24").unwrap();
    assert_eq!(engine.get(b"k").unwrap(), "24".as_bytes());

    engine.put(b"k", b"25").unwrap();
    assert_eq!(engine.get(b"k").unwrap(), "25".as_bytes());

    assert!(matches!(engine.put(b"", b"x"), Err(StorageError::KeyIsEmpty)));
    assert!(matches!(engine.get(b""), Err(StorageError::KeyIsEmpty)));
}

#[test]
fn rotation_across_multiple_data_files() {
    let dir = tempfile::tempdir().unwrap();
    let opts = Options { data_file_size: 64 * 1024 * 1024, ..options(dir.path()) };
    let engine = Engine::open(opts).unwrap();

    let value = vec![b'x'; 1024];
    for i in 0..65_000u32 {
        engine.put(format!("key-{i:06}").as_bytes(), &value).unwrap();
    }

    assert_eq!(engine.get(b"key-064999").unwrap(), value.as_slice());

    let mut file_ids: Vec<u32> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_string_lossy().strip_suffix(".data").map(str::to_owned))
        .filter_map(|s| s.parse().ok())
        .collect();
    file_ids.sort_unstable();

    assert!(file_ids.len() >= 2);
    assert_eq!(file_ids[0], 0);
    for pair in file_ids.windows(2) {
        assert_eq!(pair[1], pair[0] + 1);
    }
}

#[test]
fn crash_safe_restart_keeps_every_key() {
    let dir = tempfile::tempdir().unwrap();
    let opts = Options { data_file_size: 64 * 1024 * 1024, ..options(dir.path()) };
    let value = vec![b'y'; 1024];

    {
        let engine = Engine::open(opts.clone()).unwrap();
        for i in 0..5_000u32 {
            engine.put(format!("key-{i:06}").as_bytes(), &value).unwrap();
        }
        engine.close().unwrap();
    }

    let engine = Engine::open(opts).unwrap();
    for i in 0..5_000u32 {
        assert_eq!(engine.get(format!("key-{i:06}").as_bytes()).unwrap(), value.as_slice());
    }
}

#[test]
fn atomic_batch_replay_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let opts = options(dir.path());

    {
        let engine = Engine::open(opts.clone()).unwrap();
        engine.put(b"a", b"1").unwrap();

        let batch = engine.new_write_batch(WriteBatchOptions::default());
        batch.put(b"b", b"2").unwrap();
        batch.delete(b"a").unwrap();
        batch.commit().unwrap();
        engine.close().unwrap();
    }

    let engine = Engine::open(opts).unwrap();
    assert!(matches!(engine.get(b"a"), Err(StorageError::KeyNotFound)));
    assert_eq!(engine.get(b"b").unwrap(), "2".as_bytes());
}

#[test]
fn torn_batch_is_fully_discarded_on_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let opts = options(dir.path());

    // Hand-craft a data file holding a batch's staged records under
    // sequence 1 but no closing TxnFinished marker, simulating a crash
    // mid-commit.
    std::fs::create_dir_all(dir.path()).unwrap();
    let data_path = dir.path().join("000000000.data");
    let mut bytes = Vec::new();
    for (key, value) in [(b"a".as_slice(), b"1".as_slice()), (b"b".as_slice(), b"2".as_slice())] {
        let composite = encode_composite_key(1, key);
        let record = Record::new(composite, value.to_vec(), RecordType::Normal);
        let (encoded, _) = record.encode();
        bytes.extend_from_slice(&encoded);
    }
    std::fs::write(&data_path, &bytes).unwrap();

    let engine = Engine::open(opts).unwrap();
    assert!(matches!(engine.get(b"a"), Err(StorageError::KeyNotFound)));
    assert!(matches!(engine.get(b"b"), Err(StorageError::KeyNotFound)));
    assert_eq!(engine.stat().unwrap().key_num, 0);
}

#[test]
fn merge_reclaims_space_and_preserves_live_keys() {
    let dir = tempfile::tempdir().unwrap();
    let opts = Options { data_file_size: 4 * 1024 * 1024, ..options(dir.path()) };
    let new_value = vec![b'w'; 128];

    {
        let engine = Engine::open(opts.clone()).unwrap();
        let value = vec![b'z'; 128];
        for i in 0..50_000u32 {
            engine.put(format!("key-{i:06}").as_bytes(), &value).unwrap();
        }
        for i in 0..10_000u32 {
            engine.delete(format!("key-{i:06}").as_bytes()).unwrap();
        }
        for i in 40_000..50_000u32 {
            engine.put(format!("key-{i:06}").as_bytes(), &new_value).unwrap();
        }

        engine.merge().unwrap();
        engine.close().unwrap();
    }

    let engine = Engine::open(opts).unwrap();
    assert_eq!(engine.list_keys().len(), 40_000);
    for i in 40_000..50_000u32 {
        assert_eq!(engine.get(format!("key-{i:06}").as_bytes()).unwrap(), new_value.as_slice());
    }
    for i in 0..10_000u32 {
        assert!(matches!(engine.get(format!("key-{i:06}").as_bytes()), Err(StorageError::KeyNotFound)));
    }
}

#[test]
fn repeated_merge_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let opts = Options { data_file_size: 4 * 1024 * 1024, ..options(dir.path()) };
    let engine = Engine::open(opts).unwrap();

    let value = vec![b'z'; 128];
    for i in 0..5_000u32 {
        engine.put(format!("key-{i:06}").as_bytes(), &value).unwrap();
    }

    engine.merge().unwrap();
    engine.merge().unwrap();

    for i in 0..5_000u32 {
        assert_eq!(engine.get(format!("key-{i:06}").as_bytes()).unwrap(), value.as_slice());
    }
}

#[test]
fn merge_with_persistent_bptree_index_preserves_real_index_and_seq_no() {
    let dir = tempfile::tempdir().unwrap();
    let opts = Options {
        index_type: IndexType::PersistentBPlusTree,
        data_file_size: 4 * 1024 * 1024,
        ..options(dir.path())
    };
    let value = vec![b'z'; 128];

    {
        let engine = Engine::open(opts.clone()).unwrap();
        for i in 0..5_000u32 {
            engine.put(format!("key-{i:06}").as_bytes(), &value).unwrap();
        }
        let batch = engine.new_write_batch(WriteBatchOptions::default());
        batch.put(b"batched", b"v").unwrap();
        batch.commit().unwrap();

        engine.merge().unwrap();
        engine.close().unwrap();
    }

    // A merge run against a live directory using the persistent B+ tree
    // index must not leave the scratch merge engine's own (empty) index
    // file or sequence counter behind to be promoted over the real ones.
    let engine = Engine::open(opts).unwrap();
    assert_eq!(engine.stat().unwrap().key_num, 5_001);
    for i in 0..5_000u32 {
        assert_eq!(engine.get(format!("key-{i:06}").as_bytes()).unwrap(), value.as_slice());
    }
    assert_eq!(engine.get(b"batched").unwrap(), b"v".as_slice());

    let batch = engine.new_write_batch(WriteBatchOptions::default());
    batch.put(b"after-reopen", b"v").unwrap();
    batch.commit().unwrap();
    assert_eq!(engine.get(b"after-reopen").unwrap(), b"v".as_slice());
}

#[test]
fn persistent_bptree_index_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let opts = Options { index_type: IndexType::PersistentBPlusTree, ..options(dir.path()) };

    {
        let engine = Engine::open(opts.clone()).unwrap();
        for i in 0..200u32 {
            engine.put(format!("key-{i:04}").as_bytes(), b"v").unwrap();
        }
        engine.close().unwrap();
    }

    let engine = Engine::open(opts).unwrap();
    assert_eq!(engine.stat().unwrap().key_num, 200);
    assert_eq!(engine.get(b"key-0042").unwrap(), b"v".as_slice());
}
