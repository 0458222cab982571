//! Atomic multi-key writes.
//!
//! Operations are staged locally and only touch the log and the index at
//! [`WriteBatch::commit`] time. A single incrementing engine-wide sequence
//! number tags every record in the batch plus a trailing `TxnFinished`
//! marker, so a crash mid-commit leaves an index-visible batch either
//! fully applied or not at all (see [`crate::engine::Engine`]'s replay).

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::Ordering;

use crate::engine::Engine;
use crate::error::{Result, StorageError};
use crate::options::WriteBatchOptions;
use crate::record::{Record, RecordType, encode_composite_key};

enum PendingOp {
    Put(Vec<u8>),
    Delete,
}

pub struct WriteBatch<'a> {
    engine: &'a Engine,
    pending: Mutex<BTreeMap<Vec<u8>, PendingOp>>,
    options: WriteBatchOptions,
}

impl Engine {
    pub fn new_write_batch(&self, options: WriteBatchOptions) -> WriteBatch<'_> {
        WriteBatch { engine: self, pending: Mutex::new(BTreeMap::new()), options }
    }
}

impl<'a> WriteBatch<'a> {
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(StorageError::KeyIsEmpty);
        }
        let mut pending = self.pending.lock().expect("write batch lock poisoned");
        if pending.len() >= self.options.max_batch_num && !pending.contains_key(key) {
            return Err(StorageError::ExceedsMaxBatchNum);
        }
        pending.insert(key.to_vec(), PendingOp::Put(value.to_vec()));
        Ok(())
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(StorageError::KeyIsEmpty);
        }
        let mut pending = self.pending.lock().expect("write batch lock poisoned");
        if pending.get(key).is_none() && self.engine.index.get(key).is_none() {
            return Ok(());
        }
        if pending.len() >= self.options.max_batch_num && !pending.contains_key(key) {
            return Err(StorageError::ExceedsMaxBatchNum);
        }
        pending.insert(key.to_vec(), PendingOp::Delete);
        Ok(())
    }

    /// Assigns a single sequence number to the whole batch, appends one
    /// record per pending op plus a closing `TxnFinished` marker, then
    /// applies the batch to the index in the same order. The staged buffer
    /// is cleared whether or not any ops were pending.
    pub fn commit(&self) -> Result<()> {
        let mut pending = self.pending.lock().expect("write batch lock poisoned");
        if pending.is_empty() {
            return Ok(());
        }

        let _commit_guard = self.engine.batch_commit_lock.lock().expect("batch commit lock poisoned");
        // Held across the whole append-then-apply section below so a
        // concurrent Get/Stat/iterator value resolution can never observe
        // the batch half-applied to the index.
        let _rw_guard = self.engine.rw_lock.write().expect("engine lock poisoned");
        let seq_no = self.engine.seq_no.fetch_add(1, Ordering::SeqCst) + 1;

        let mut positions = Vec::with_capacity(pending.len());
        for (key, op) in pending.iter() {
            let composite = encode_composite_key(seq_no, key);
            let record = match op {
                PendingOp::Put(value) => Record::new(composite, value.clone(), RecordType::Normal),
                PendingOp::Delete => Record::new(composite, Vec::new(), RecordType::Deleted),
            };
            let pos = self.engine.append_log_record(&record)?;
            positions.push((key.clone(), matches!(op, PendingOp::Put(_)), pos));
        }

        let finish_key = encode_composite_key(seq_no, &[]);
        let finish_record = Record::new(finish_key, Vec::new(), RecordType::TxnFinished);
        self.engine.append_log_record(&finish_record)?;

        if self.options.sync_writes {
            self.engine.sync()?;
        }

        for (key, is_put, pos) in positions {
            if is_put {
                if let Some(old) = self.engine.index.put(key, pos) {
                    self.engine.reclaim_size.fetch_add(u64::from(old.size), Ordering::SeqCst);
                }
            } else {
                self.engine.reclaim_size.fetch_add(u64::from(pos.size), Ordering::SeqCst);
                let (old, _) = self.engine.index.delete(&key);
                if let Some(old) = old {
                    self.engine.reclaim_size.fetch_add(u64::from(old.size), Ordering::SeqCst);
                }
            }
        }

        pending.clear();
        Ok(())
    }
}
