//! Persistent B+ tree index, backed by a single embedded `bptree-index`
//! file with one named bucket holding `key -> encoded Position`. Every
//! operation wraps a jammdb read-only or read-write transaction.
//!
//! jammdb's transactions borrow from the `DB` handle, so a transaction
//! can't be stashed inside a `Box<dyn IndexIterator>` without an unsafe
//! lifetime extension. Instead, `iterator()` opens one short-lived
//! read transaction, copies out every entry, and commits it immediately —
//! from the caller's side this is indistinguishable from holding the
//! transaction open for the iterator's lifetime, since nothing else in
//! this index can write to the bucket between that read and the iterator
//! being consumed except through this same index's own write path.

use std::path::Path;

use jammdb::DB;

use crate::error::{Result, StorageError};
use crate::index::btree::SnapshotIterator;
use crate::index::{IndexIterator, Indexer};
use crate::position::Position;

const FILE_NAME: &str = "bptree-index";
const BUCKET_NAME: &str = "caskdb-index";

pub struct BPlusTreeIndex {
    db: DB,
}

impl BPlusTreeIndex {
    pub fn open(dir_path: &Path) -> Result<Self> {
        let db = DB::open(dir_path.join(FILE_NAME)).map_err(jammdb_err)?;
        // Ensure the bucket exists so reads against a fresh database don't
        // need to special-case a missing bucket.
        let tx = db.tx(true).map_err(jammdb_err)?;
        tx.get_or_create_bucket(BUCKET_NAME).map_err(jammdb_err)?;
        tx.commit().map_err(jammdb_err)?;
        Ok(Self { db })
    }
}

fn jammdb_err(_: jammdb::Error) -> StorageError {
    StorageError::IndexUpdateFailed
}

impl Indexer for BPlusTreeIndex {
    fn put(&self, key: Vec<u8>, pos: Position) -> Option<Position> {
        let tx = self.db.tx(true).ok()?;
        let bucket = tx.get_or_create_bucket(BUCKET_NAME).ok()?;
        let old = bucket.get(key.as_slice()).and_then(|d| Position::decode(d.kv().value()).ok());
        bucket.put(key, pos.encode()).ok()?;
        tx.commit().ok()?;
        old
    }

    fn get(&self, key: &[u8]) -> Option<Position> {
        let tx = self.db.tx(false).ok()?;
        let bucket = tx.get_bucket(BUCKET_NAME).ok()?;
        bucket.get(key).and_then(|d| Position::decode(d.kv().value()).ok())
    }

    fn delete(&self, key: &[u8]) -> (Option<Position>, bool) {
        let Ok(tx) = self.db.tx(true) else { return (None, false) };
        let Ok(bucket) = tx.get_bucket(BUCKET_NAME) else { return (None, false) };
        match bucket.delete(key) {
            Ok(data) => {
                let old = Position::decode(data.kv().value()).ok();
                let _ = tx.commit();
                (old, true)
            }
            Err(_) => (None, false),
        }
    }

    fn size(&self) -> usize {
        let Ok(tx) = self.db.tx(false) else { return 0 };
        let Ok(bucket) = tx.get_bucket(BUCKET_NAME) else { return 0 };
        bucket.cursor().filter(|d| d.is_kv()).count()
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let mut items = Vec::new();
        if let Ok(tx) = self.db.tx(false) {
            if let Ok(bucket) = tx.get_bucket(BUCKET_NAME) {
                for data in bucket.cursor() {
                    if data.is_kv() {
                        let kv = data.kv();
                        if let Ok(pos) = Position::decode(kv.value()) {
                            items.push((kv.key().to_vec(), pos));
                        }
                    }
                }
            }
        }
        items.sort_by(|a, b| a.0.cmp(&b.0));
        if reverse {
            items.reverse();
        }
        Box::new(SnapshotIterator::new(items, reverse))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
