//! `Position` locates exactly one record in the log: which file, what byte
//! offset, and how many bytes it occupies.

use crate::error::{Result, StorageError};
use crate::varint::{decode_varint, encode_varint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub file_id: u32,
    pub offset: i64,
    pub size: u32,
}

impl Position {
    pub fn new(file_id: u32, offset: i64, size: u32) -> Self {
        Self { file_id, offset, size }
    }

    /// Serialized form used in the hint file and the persistent B+ tree
    /// index: `varint(fileId) || varint(offset) || varint(size)`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(20);
        encode_varint(i64::from(self.file_id), &mut buf);
        encode_varint(self.offset, &mut buf);
        encode_varint(i64::from(self.size), &mut buf);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let (file_id, n1) = decode_varint(data)?;
        let (offset, n2) = decode_varint(&data[n1..])?;
        let (size, _n3) = decode_varint(&data[n1 + n2..])?;
        if file_id < 0 || size < 0 {
            return Err(StorageError::CorruptedRecord);
        }
        Ok(Position { file_id: file_id as u32, offset, size: size as u32 })
    }
}
