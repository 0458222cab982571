//! Configuration accepted by [`crate::engine::Engine::open`] and by
//! write batches and iterators.

use std::path::PathBuf;

use crate::error::{Result, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    /// Ordered in-memory tree (`BTreeMap`).
    OrderedTree,
    /// Hand-rolled adaptive radix tree, in-memory.
    Art,
    /// Persistent B+ tree backed by a single embedded file.
    PersistentBPlusTree,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub dir_path: PathBuf,
    pub data_file_size: i64,
    pub sync_writes: bool,
    /// Force an fsync once this many bytes have been written since the last
    /// sync. `0` disables byte-interval fsync.
    pub bytes_per_sync: u64,
    pub index_type: IndexType,
    pub mmap_at_startup: bool,
    /// Reclaimable-bytes / total-bytes ratio callers compare against before
    /// invoking merge. Not enforced inside `merge` itself.
    pub data_file_merge_ratio: f32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dir_path: PathBuf::new(),
            data_file_size: 256 * 1024 * 1024,
            sync_writes: false,
            bytes_per_sync: 0,
            index_type: IndexType::OrderedTree,
            mmap_at_startup: false,
            data_file_merge_ratio: 0.5,
        }
    }
}

impl Options {
    pub fn validate(&self) -> Result<()> {
        if self.dir_path.as_os_str().is_empty() {
            return Err(StorageError::InvalidOptions("dir_path must not be empty".into()));
        }
        if self.data_file_size <= 0 {
            return Err(StorageError::InvalidOptions("data_file_size must be greater than 0".into()));
        }
        if !(0.0..=1.0).contains(&self.data_file_merge_ratio) {
            return Err(StorageError::InvalidOptions("data_file_merge_ratio must be within [0, 1]".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    pub prefix: Vec<u8>,
    pub reverse: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct WriteBatchOptions {
    pub max_batch_num: usize,
    pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> Self {
        Self { max_batch_num: 10_000, sync_writes: true }
    }
}
