//! A single append-only file: owns a file id, the current write offset,
//! and an [`IOManager`] attached to the underlying bytes.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::Result;
use crate::io::{IOKind, IOManager, new_io_manager};
use crate::record::{Decoded, MAX_HEADER_SIZE, Record};

pub const DATA_FILE_SUFFIX: &str = ".data";
pub const HINT_FILE_NAME: &str = "hint-index";
pub const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";
pub const SEQ_NO_FILE_NAME: &str = "seq-no";

pub enum ReadOutcome {
    Record { record: Record, size: u64 },
    Eof,
}

pub struct DataFile {
    file_id: u32,
    write_off: RwLock<u64>,
    io_manager: Box<dyn IOManager>,
}

/// Zero-padded file name for file id `file_id`, e.g. `000000003.data`.
pub fn data_file_name(dir: &Path, file_id: u32) -> PathBuf {
    dir.join(format!("{file_id:09}{DATA_FILE_SUFFIX}"))
}

impl DataFile {
    pub fn open(dir: &Path, file_id: u32, io_kind: IOKind) -> Result<Self> {
        let path = data_file_name(dir, file_id);
        let io_manager = new_io_manager(&path, io_kind)?;
        Ok(Self { file_id, write_off: RwLock::new(0), io_manager })
    }

    fn open_named(dir: &Path, name: &str) -> Result<Self> {
        let io_manager = new_io_manager(&dir.join(name), IOKind::Standard)?;
        Ok(Self { file_id: 0, write_off: RwLock::new(0), io_manager })
    }

    pub fn open_hint_file(dir: &Path) -> Result<Self> {
        Self::open_named(dir, HINT_FILE_NAME)
    }

    pub fn open_merge_finished_file(dir: &Path) -> Result<Self> {
        Self::open_named(dir, MERGE_FINISHED_FILE_NAME)
    }

    pub fn open_seq_no_file(dir: &Path) -> Result<Self> {
        Self::open_named(dir, SEQ_NO_FILE_NAME)
    }

    pub fn file_size(&self) -> Result<u64> {
        self.io_manager.size()
    }

    pub fn write_off(&self) -> u64 {
        *self.write_off.read().expect("write_off lock poisoned")
    }

    pub fn set_write_off(&self, offset: u64) {
        *self.write_off.write().expect("write_off lock poisoned") = offset;
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Reads and decodes one record starting at `offset`. The header is
    /// read first (clamped to the file's size), then the key/value payload
    /// is read once the declared sizes are known.
    pub fn read_log_record(&self, offset: u64) -> Result<ReadOutcome> {
        let file_size = self.file_size()?;
        if offset >= file_size {
            return Ok(ReadOutcome::Eof);
        }

        let header_cap = (MAX_HEADER_SIZE as u64).min(file_size - offset) as usize;
        let mut header_buf = vec![0u8; header_cap];
        let n = self.io_manager.read(&mut header_buf, offset)?;
        header_buf.truncate(n);

        // We don't yet know the full record length; decode() on the header
        // window alone will fail with CorruptedRecord if key/value run past
        // it, so fall through to a second, precisely sized read below.
        match Record::decode(&header_buf) {
            Ok(Decoded::Eof) => Ok(ReadOutcome::Eof),
            Ok(Decoded::Record { record, consumed }) => Ok(ReadOutcome::Record { record, size: consumed as u64 }),
            Err(_) => self.read_log_record_wide(offset, file_size),
        }
    }

    /// Fallback for records whose key+value spill past the header-sized
    /// read: re-read with a window sized to the rest of the file.
    fn read_log_record_wide(&self, offset: u64, file_size: u64) -> Result<ReadOutcome> {
        let cap = (file_size - offset) as usize;
        let mut buf = vec![0u8; cap];
        let n = self.io_manager.read(&mut buf, offset)?;
        buf.truncate(n);
        match Record::decode(&buf)? {
            Decoded::Eof => Ok(ReadOutcome::Eof),
            Decoded::Record { record, consumed } => Ok(ReadOutcome::Record { record, size: consumed as u64 }),
        }
    }

    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        let n = self.io_manager.write(buf)?;
        *self.write_off.write().expect("write_off lock poisoned") += n as u64;
        Ok(n)
    }

    /// Writes a `(key -> encoded Position)` entry to a hint file, reusing
    /// the record codec for uniformity (the record's type and CRC are
    /// cosmetic here).
    pub fn write_hint_record(&self, key: Vec<u8>, pos: crate::position::Position) -> Result<()> {
        let record = Record::new(key, pos.encode(), crate::record::RecordType::Normal);
        let (encoded, _) = record.encode();
        self.write(&encoded)?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.io_manager.sync()
    }

    pub fn set_io_manager(&mut self, dir: &Path, io_kind: IOKind) -> Result<()> {
        self.io_manager = new_io_manager(&data_file_name(dir, self.file_id), io_kind)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{NON_TXN_SEQ_NO, RecordType, encode_composite_key};

    #[test]
    fn write_then_read_back_several_records() {
        let dir = tempfile::tempdir().unwrap();
        let file = DataFile::open(dir.path(), 1, IOKind::Standard).unwrap();

        let mut offsets = Vec::new();
        for (k, v) in [("a", "1"), ("b", "2"), ("c", "3")] {
            offsets.push(file.write_off());
            let key = encode_composite_key(NON_TXN_SEQ_NO, k.as_bytes());
            let record = Record::new(key, v.as_bytes().to_vec(), RecordType::Normal);
            let (encoded, _) = record.encode();
            file.write(&encoded).unwrap();
        }

        for (offset, (k, v)) in offsets.into_iter().zip([("a", "1"), ("b", "2"), ("c", "3")]) {
            match file.read_log_record(offset).unwrap() {
                ReadOutcome::Record { record, .. } => {
                    let (_, user_key) = crate::record::parse_composite_key(&record.key).unwrap();
                    assert_eq!(user_key, k.as_bytes());
                    assert_eq!(record.value, v.as_bytes());
                }
                ReadOutcome::Eof => panic!("expected a record"),
            }
        }
    }

    #[test]
    fn reading_past_the_end_is_eof() {
        let dir = tempfile::tempdir().unwrap();
        let file = DataFile::open(dir.path(), 1, IOKind::Standard).unwrap();
        match file.read_log_record(0).unwrap() {
            ReadOutcome::Eof => {}
            ReadOutcome::Record { .. } => panic!("expected EOF"),
        }
    }
}
