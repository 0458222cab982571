//! File I/O manager: sequential append, positional read, fsync, size.
//!
//! Kept intentionally thin: a trivially replaceable seam between a data
//! file and the underlying bytes. Two variants are provided: a standard
//! `File`-backed one for normal operation, and a memory-mapped one used
//! only to speed up the startup replay (`MMapAtStartup`); every file is
//! switched back to standard I/O once replay completes.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use memmap2::Mmap;

use crate::error::Result;

pub trait IOManager: Send + Sync {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize>;
    fn write(&self, buf: &[u8]) -> Result<usize>;
    fn sync(&self) -> Result<()>;
    fn size(&self) -> Result<u64>;
}

pub struct StandardIO {
    file: Mutex<File>,
}

impl StandardIO {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        Ok(Self { file: Mutex::new(file) })
    }
}

impl IOManager for StandardIO {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut file = self.file.lock().expect("data file mutex poisoned");
        file.seek(SeekFrom::Start(offset))?;
        let mut total = 0;
        while total < buf.len() {
            match file.read(&mut buf[total..])? {
                0 => break,
                n => total += n,
            }
        }
        Ok(total)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut file = self.file.lock().expect("data file mutex poisoned");
        file.write_all(buf)?;
        Ok(buf.len())
    }

    fn sync(&self) -> Result<()> {
        let file = self.file.lock().expect("data file mutex poisoned");
        file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        let file = self.file.lock().expect("data file mutex poisoned");
        Ok(file.metadata()?.len())
    }
}

/// Read-only, memory-mapped view of a file, used only while replaying data
/// files at startup when `MMapAtStartup` is set. Writes are not supported:
/// `reset_io_type` swaps every file back to [`StandardIO`] before the
/// engine accepts its first write.
pub struct MmapIO {
    mmap: Mmap,
}

impl MmapIO {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).read(true).write(true).open(path)?;
        // SAFETY: the mapped file is exclusively owned by this process for
        // the engine directory's lifetime (guarded by the advisory flock),
        // and this mapping is read-only and dropped before any writer
        // touches the file again.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { mmap })
    }
}

impl IOManager for MmapIO {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let offset = offset as usize;
        if offset >= self.mmap.len() {
            return Ok(0);
        }
        let available = &self.mmap[offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }

    fn write(&self, _buf: &[u8]) -> Result<usize> {
        Err(crate::error::StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "MmapIO is read-only",
        )))
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.mmap.len() as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IOKind {
    Standard,
    MemoryMap,
}

pub fn new_io_manager(path: &Path, kind: IOKind) -> Result<Box<dyn IOManager>> {
    match kind {
        IOKind::Standard => Ok(Box::new(StandardIO::open(path)?)),
        IOKind::MemoryMap => Ok(Box::new(MmapIO::open(path)?)),
    }
}
