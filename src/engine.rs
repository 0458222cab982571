//! Open/close, Put/Get/Delete, active-file rotation, and crash-safe
//! startup recovery.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use bytes::Bytes;
use fs4::fs_std::FileExt as _;
use tracing::{debug, warn};

use crate::data_file::{DATA_FILE_SUFFIX, DataFile, ReadOutcome, SEQ_NO_FILE_NAME};
use crate::error::{Result, StorageError};
use crate::index::{self, Indexer};
use crate::io::IOKind;
use crate::merge::{self, get_non_merge_boundary};
use crate::options::{IndexType, Options};
use crate::position::Position;
use crate::record::{NON_TXN_SEQ_NO, Record, RecordType, encode_composite_key, parse_composite_key};

const FLOCK_NAME: &str = "flock";

#[derive(Debug, Clone, Copy, Default)]
pub struct Stat {
    pub key_num: usize,
    pub data_file_num: usize,
    pub reclaim_size: u64,
    pub disk_size: u64,
}

pub struct Engine {
    pub(crate) options: Options,
    pub(crate) active_file: RwLock<DataFile>,
    pub(crate) older_files: RwLock<HashMap<u32, DataFile>>,
    pub(crate) index: Box<dyn Indexer>,
    pub(crate) batch_commit_lock: Mutex<()>,
    /// Guards visibility of Put/Delete/batch-commit against Get/Stat/Fold
    /// and iterator value resolution: writers hold it exclusively across
    /// their whole append-then-index-apply section, readers hold it shared
    /// while resolving a value. The index itself stays outside this lock;
    /// each variant guards its own mutations. This lock exists only to
    /// make a multi-key batch commit atomic from a reader's point of view.
    pub(crate) rw_lock: RwLock<()>,
    merging_lock: Mutex<()>,
    pub(crate) seq_no: AtomicU64,
    pub(crate) reclaim_size: AtomicU64,
    bytes_write: AtomicU64,
    lock_file: fs::File,
    is_initial: bool,
}

impl Engine {
    pub fn open(options: Options) -> Result<Self> {
        options.validate()?;

        let mut is_initial = false;
        if !options.dir_path.exists() {
            fs::create_dir_all(&options.dir_path)?;
            is_initial = true;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(options.dir_path.join(FLOCK_NAME))?;
        lock_file.try_lock_exclusive().map_err(|_| StorageError::DatabaseInUse)?;

        let mut saw_other_entry = false;
        for entry in fs::read_dir(&options.dir_path)? {
            let entry = entry?;
            if entry.file_name() != FLOCK_NAME {
                saw_other_entry = true;
                break;
            }
        }
        if !saw_other_entry {
            is_initial = true;
        }

        merge::load_merge_files(&options.dir_path)?;

        let io_kind = if options.mmap_at_startup { IOKind::MemoryMap } else { IOKind::Standard };
        let (file_ids, active_file, older_files) = load_data_files(&options.dir_path, io_kind)?;

        let index = index::new_indexer(options.index_type, &options.dir_path)?;

        let engine = Self {
            options,
            active_file: RwLock::new(active_file),
            older_files: RwLock::new(older_files),
            index,
            batch_commit_lock: Mutex::new(()),
            rw_lock: RwLock::new(()),
            merging_lock: Mutex::new(()),
            seq_no: AtomicU64::new(0),
            reclaim_size: AtomicU64::new(0),
            bytes_write: AtomicU64::new(0),
            lock_file,
            is_initial,
        };

        if engine.options.index_type != IndexType::PersistentBPlusTree {
            engine.load_index_from_hint_file()?;
            let current_seq = engine.load_index_from_data_files(&file_ids)?;
            if current_seq > 0 {
                engine.seq_no.store(current_seq, Ordering::SeqCst);
            }
            if engine.options.mmap_at_startup {
                engine.reset_io_type()?;
            }
        } else {
            engine.load_seq_no()?;
            let size = engine.active_file.read().expect("active file lock poisoned").file_size()?;
            engine.active_file.read().expect("active file lock poisoned").set_write_off(size);
        }

        Ok(engine)
    }

    pub fn is_initial(&self) -> bool {
        self.is_initial
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(StorageError::KeyIsEmpty);
        }
        let composite = encode_composite_key(NON_TXN_SEQ_NO, key);
        let record = Record::new(composite, value.to_vec(), RecordType::Normal);

        let _guard = self.rw_lock.write().expect("engine lock poisoned");
        let pos = self.append_log_record(&record)?;
        if let Some(old) = self.index.put(key.to_vec(), pos) {
            self.reclaim_size.fetch_add(u64::from(old.size), Ordering::SeqCst);
        }
        Ok(())
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(StorageError::KeyIsEmpty);
        }

        let _guard = self.rw_lock.write().expect("engine lock poisoned");
        if self.index.get(key).is_none() {
            return Ok(());
        }
        let composite = encode_composite_key(NON_TXN_SEQ_NO, key);
        let record = Record::new(composite, Vec::new(), RecordType::Deleted);
        let pos = self.append_log_record(&record)?;
        self.reclaim_size.fetch_add(u64::from(pos.size), Ordering::SeqCst);

        let (old, _removed) = self.index.delete(key);
        if let Some(old) = old {
            self.reclaim_size.fetch_add(u64::from(old.size), Ordering::SeqCst);
        }
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Result<Bytes> {
        if key.is_empty() {
            return Err(StorageError::KeyIsEmpty);
        }
        let _guard = self.rw_lock.read().expect("engine lock poisoned");
        let pos = self.index.get(key).ok_or(StorageError::KeyNotFound)?;
        self.read_record_at_position(pos)
    }

    /// Shared-locked entry point for resolving a [`Position`] from outside
    /// `get` itself: the iterator and `fold` call this once per value so a
    /// concurrent batch commit's write guard can't be observed half-applied.
    pub(crate) fn get_value_by_position(&self, pos: Position) -> Result<Bytes> {
        let _guard = self.rw_lock.read().expect("engine lock poisoned");
        self.read_record_at_position(pos)
    }

    fn read_record_at_position(&self, pos: Position) -> Result<Bytes> {
        let record = match self.read_at(pos.file_id, pos.offset as u64)? {
            ReadOutcome::Record { record, .. } => record,
            ReadOutcome::Eof => return Err(StorageError::CorruptedRecord),
        };
        if record.rec_type == RecordType::Deleted {
            return Err(StorageError::KeyNotFound);
        }
        Ok(record.value)
    }

    /// Reads and decodes the record at `(file_id, offset)`, resolving
    /// whether it lives in the active file or one of the older files.
    pub(crate) fn read_at(&self, file_id: u32, offset: u64) -> Result<ReadOutcome> {
        let active = self.active_file.read().expect("active file lock poisoned");
        if active.file_id() == file_id {
            return active.read_log_record(offset);
        }
        drop(active);
        let older = self.older_files.read().expect("older files lock poisoned");
        let file = older.get(&file_id).ok_or(StorageError::DataFileNotFound(file_id))?;
        file.read_log_record(offset)
    }

    /// Appends one record to the active file, rotating it first if the
    /// write would exceed `data_file_size`. Not exposed to callers other
    /// than [`crate::batch::WriteBatch`] and [`crate::merge`]: Put/Delete
    /// build the record for the caller.
    pub(crate) fn append_log_record(&self, record: &Record) -> Result<Position> {
        if self.options.dir_path.as_os_str().is_empty() {
            return Err(StorageError::InvalidOptions("dir_path must not be empty".into()));
        }
        let (encoded, size) = record.encode();
        let size = size as u64;

        let mut active = self.active_file.write().expect("active file lock poisoned");
        if active.write_off() + size > self.options.data_file_size as u64 {
            active.sync()?;
            let old_id = active.file_id();
            let new_file = DataFile::open(&self.options.dir_path, old_id + 1, IOKind::Standard)?;
            let old_active = std::mem::replace(&mut *active, new_file);
            self.older_files.write().expect("older files lock poisoned").insert(old_id, old_active);
        }

        let write_off = active.write_off();
        active.write(&encoded)?;

        let bytes_write = self.bytes_write.fetch_add(size, Ordering::SeqCst) + size;
        let need_sync = self.options.sync_writes
            || (self.options.bytes_per_sync > 0 && bytes_write >= self.options.bytes_per_sync);
        if need_sync {
            active.sync()?;
            self.bytes_write.store(0, Ordering::SeqCst);
        }

        Ok(Position::new(active.file_id(), write_off as i64, size as u32))
    }

    pub fn stat(&self) -> Result<Stat> {
        let _guard = self.rw_lock.read().expect("engine lock poisoned");
        Ok(Stat {
            key_num: self.index.size(),
            data_file_num: self.older_files.read().expect("older files lock poisoned").len() + 1,
            reclaim_size: self.reclaim_size.load(Ordering::SeqCst),
            disk_size: crate::util::dir_size(&self.options.dir_path)?,
        })
    }

    pub fn sync(&self) -> Result<()> {
        self.active_file.read().expect("active file lock poisoned").sync()
    }

    /// Every live key, in index order.
    pub fn list_keys(&self) -> Vec<Vec<u8>> {
        let mut iter = self.index.iterator(false);
        iter.rewind();
        let mut keys = Vec::with_capacity(self.index.size());
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        keys
    }

    /// Invokes `f` with every live `(key, value)` pair in index order,
    /// stopping early the first time `f` returns `false`.
    pub fn fold(&self, mut f: impl FnMut(&[u8], &[u8]) -> Result<bool>) -> Result<()> {
        let mut iter = self.index.iterator(false);
        iter.rewind();
        while iter.valid() {
            let pos = iter.value();
            let value = self.get_value_by_position(pos)?;
            if !f(iter.key(), &value)? {
                break;
            }
            iter.next();
        }
        Ok(())
    }

    pub fn merge(&self) -> Result<()> {
        merge::run_merge(self)
    }

    pub(crate) fn merging_lock(&self) -> &Mutex<()> {
        &self.merging_lock
    }

    pub fn close(&self) -> Result<()> {
        let result = self.close_inner();
        let _ = self.lock_file.unlock();
        result
    }

    /// Persists `seqNo` into `seq-no` only for the persistent B+ tree index:
    /// every other variant rebuilds `seqNo` by replaying the log, and a
    /// stray `seq-no` file left by this engine would otherwise get promoted
    /// into a merge target directory and override its real sequence number
    /// on the next open (the merge's throwaway secondary engine closes too).
    fn close_inner(&self) -> Result<()> {
        self.index.close()?;

        let active = self.active_file.read().expect("active file lock poisoned");
        if self.options.index_type == IndexType::PersistentBPlusTree {
            let seq_no_file = DataFile::open_seq_no_file(&self.options.dir_path)?;
            let seq_no = self.seq_no.load(Ordering::SeqCst);
            let record = Record::new(Vec::new(), seq_no.to_string().into_bytes(), RecordType::Normal);
            let (encoded, _) = record.encode();
            seq_no_file.write(&encoded)?;
            seq_no_file.sync()?;
        }
        active.sync()?;
        Ok(())
    }

    fn load_index_from_hint_file(&self) -> Result<()> {
        let hint_path = self.options.dir_path.join(crate::data_file::HINT_FILE_NAME);
        if !hint_path.exists() {
            return Ok(());
        }
        let hint_file = DataFile::open_hint_file(&self.options.dir_path)?;
        let mut offset = 0u64;
        loop {
            match hint_file.read_log_record(offset)? {
                ReadOutcome::Eof => break,
                ReadOutcome::Record { record, size } => {
                    let pos = Position::decode(&record.value)?;
                    self.index.put(record.key, pos);
                    offset += size;
                }
            }
        }
        Ok(())
    }

    /// Replays every data file with id >= the non-merge boundary, applying
    /// non-transactional records immediately and staging transactional
    /// ones until their `TxnFinished` marker arrives. Returns the highest
    /// sequence number observed (0 if none). Torn batches (buffered records
    /// whose sequence never sees a `TxnFinished`) are discarded by simply
    /// never being applied.
    fn load_index_from_data_files(&self, file_ids: &[u32]) -> Result<u64> {
        if file_ids.is_empty() {
            return Ok(0);
        }
        let boundary = get_non_merge_boundary(&self.options.dir_path)?.unwrap_or(0);
        let mut staged: HashMap<u64, Vec<(Record, Position)>> = HashMap::new();
        let mut max_seq = 0u64;
        let last_id = *file_ids.last().expect("checked non-empty above");

        for &file_id in file_ids {
            if file_id < boundary {
                continue;
            }
            let mut offset = 0u64;
            loop {
                let (record, size) = match self.read_at(file_id, offset)? {
                    ReadOutcome::Eof => break,
                    ReadOutcome::Record { record, size } => (record, size),
                };
                let pos = Position::new(file_id, offset as i64, size as u32);
                let (seq, user_key) = parse_composite_key(&record.key)?;
                max_seq = max_seq.max(seq);

                if seq == NON_TXN_SEQ_NO {
                    self.apply_to_index(user_key, record.rec_type, pos);
                } else if record.rec_type == RecordType::TxnFinished {
                    if let Some(buffered) = staged.remove(&seq) {
                        for (buffered_record, buffered_pos) in buffered {
                            let (_, key) = parse_composite_key(&buffered_record.key)?;
                            self.apply_to_index(key, buffered_record.rec_type, buffered_pos);
                        }
                    }
                } else {
                    staged.entry(seq).or_default().push((record, pos));
                }

                offset += size;
            }
            if file_id == last_id {
                self.active_file.read().expect("active file lock poisoned").set_write_off(offset);
            }
        }

        if !staged.is_empty() {
            debug!(torn_batches = staged.len(), "discarding batches with no TxnFinished marker");
        }

        Ok(max_seq)
    }

    fn apply_to_index(&self, user_key: &[u8], rec_type: RecordType, pos: Position) {
        match rec_type {
            RecordType::Normal => {
                if let Some(old) = self.index.put(user_key.to_vec(), pos) {
                    self.reclaim_size.fetch_add(u64::from(old.size), Ordering::SeqCst);
                }
            }
            RecordType::Deleted => {
                self.reclaim_size.fetch_add(u64::from(pos.size), Ordering::SeqCst);
                let (old, _) = self.index.delete(user_key);
                if let Some(old) = old {
                    self.reclaim_size.fetch_add(u64::from(old.size), Ordering::SeqCst);
                }
            }
            RecordType::TxnFinished => {}
        }
    }

    fn load_seq_no(&self) -> Result<()> {
        let path = self.options.dir_path.join(SEQ_NO_FILE_NAME);
        if !path.exists() {
            return Ok(());
        }
        let file = DataFile::open_seq_no_file(&self.options.dir_path)?;
        if let ReadOutcome::Record { record, .. } = file.read_log_record(0)? {
            let seq_no: u64 = std::str::from_utf8(&record.value)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| StorageError::DataDirectoryCorrupted("malformed seq-no file".into()))?;
            self.seq_no.store(seq_no, Ordering::SeqCst);
        }
        fs::remove_file(&path)?;
        Ok(())
    }

    fn reset_io_type(&self) -> Result<()> {
        self.active_file
            .write()
            .expect("active file lock poisoned")
            .set_io_manager(&self.options.dir_path, IOKind::Standard)?;
        for file in self.older_files.write().expect("older files lock poisoned").values_mut() {
            file.set_io_manager(&self.options.dir_path, IOKind::Standard)?;
        }
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "error while closing engine");
        }
    }
}

/// Enumerates `*.data` in `dir`, sorts ascending by file id, and opens
/// each one. The highest id becomes the active file; the rest are older.
/// An empty directory gets a fresh file id 0.
fn load_data_files(dir: &PathBuf, io_kind: IOKind) -> Result<(Vec<u32>, DataFile, HashMap<u32, DataFile>)> {
    let mut file_ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(id_str) = name.strip_suffix(DATA_FILE_SUFFIX) {
            let id = id_str
                .parse::<u32>()
                .map_err(|_| StorageError::DataDirectoryCorrupted(format!("bad data file name: {name}")))?;
            file_ids.push(id);
        }
    }
    file_ids.sort_unstable();

    if file_ids.is_empty() {
        let active = DataFile::open(dir, 0, IOKind::Standard)?;
        return Ok((file_ids, active, HashMap::new()));
    }

    let mut older_files = HashMap::new();
    let mut active = None;
    for (i, &id) in file_ids.iter().enumerate() {
        let file = DataFile::open(dir, id, io_kind)?;
        if i == file_ids.len() - 1 {
            active = Some(file);
        } else {
            older_files.insert(id, file);
        }
    }

    Ok((file_ids, active.expect("non-empty file_ids yields an active file"), older_files))
}
