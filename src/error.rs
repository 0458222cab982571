//! Error kinds surfaced by the engine.
//!
//! I/O errors are propagated unchanged (wrapped via `#[from]`); everything
//! else names one of the failure kinds in the design notes, not an
//! implementation detail.

use std::io;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("key is empty")]
    KeyIsEmpty,

    #[error("key not found")]
    KeyNotFound,

    #[error("data file not found for file id {0}")]
    DataFileNotFound(u32),

    #[error("data directory is corrupted: {0}")]
    DataDirectoryCorrupted(String),

    #[error("corrupted record: CRC mismatch or truncated record")]
    CorruptedRecord,

    #[error("failed to update index")]
    IndexUpdateFailed,

    #[error("database directory is already in use by another process")]
    DatabaseInUse,

    #[error("merge already in progress")]
    MergeInProgress,

    #[error("reclaimable ratio has not reached the configured merge threshold")]
    MergeRatioUnreached,

    #[error("invalid database options: {0}")]
    InvalidOptions(String),

    #[error("exceeded the maximum number of pending operations for a write batch")]
    ExceedsMaxBatchNum,

    #[error("filesystem error")]
    Io(#[from] io::Error),
}
