//! Small filesystem helpers shared by the engine and merge paths.

use std::fs;
use std::path::Path;

use crate::error::Result;

/// Total on-disk size, in bytes, of every regular file directly inside `dir`.
pub fn dir_size(dir: &Path) -> Result<u64> {
    let mut total = 0u64;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_file() {
            total += metadata.len();
        }
    }
    Ok(total)
}

pub fn parse_decimal_u32(bytes: &[u8]) -> Result<u32> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| crate::error::StorageError::DataDirectoryCorrupted("expected a decimal ASCII file id".into()))
}
