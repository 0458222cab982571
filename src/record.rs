//! The on-disk record format.
//!
//! ```text
//! | crc32 (LE, 4B) | type (1B) | keySize (varint) | valSize (varint) | key | value |
//! ```
//!
//! The CRC covers every byte after itself (type through value). `key` here
//! is the *composite key*: a varint-encoded sequence number followed by the
//! raw user key (see [`encode_composite_key`]). Sequence `0` is reserved for
//! non-transactional writes.

use bytes::Bytes;

use crate::crc32::crc32;
use crate::error::{Result, StorageError};
use crate::varint::{decode_varint, encode_varint};

/// Sequence number reserved for writes made outside a write batch.
pub const NON_TXN_SEQ_NO: u64 = 0;

/// Upper bound on the fixed part of a record's header: crc(4) + type(1) +
/// two ten-byte varints. Real headers are almost always much smaller.
pub const MAX_HEADER_SIZE: usize = 4 + 1 + 10 + 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    Normal,
    Deleted,
    TxnFinished,
}

impl RecordType {
    pub fn as_byte(self) -> u8 {
        match self {
            RecordType::Normal => 0,
            RecordType::Deleted => 1,
            RecordType::TxnFinished => 2,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(RecordType::Normal),
            1 => Ok(RecordType::Deleted),
            2 => Ok(RecordType::TxnFinished),
            _ => Err(StorageError::CorruptedRecord),
        }
    }
}

/// One record as written to or read from a data file. `key` is the
/// composite key (sequence number prefix + user key), not the raw user key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Bytes,
    pub rec_type: RecordType,
}

/// Outcome of decoding a record out of a byte window.
pub enum Decoded {
    Record { record: Record, consumed: usize },
    /// The header was an all-zero hole: crc, keySize and valSize were all
    /// zero, which is how an unwritten tail of a file reads back. Treated
    /// as a clean end of the written log, not a corruption.
    Eof,
}

impl Record {
    pub fn new(key: Vec<u8>, value: impl Into<Bytes>, rec_type: RecordType) -> Self {
        Self { key, value: value.into(), rec_type }
    }

    /// Encodes this record, returning the bytes and their length.
    pub fn encode(&self) -> (Vec<u8>, usize) {
        let mut body = Vec::with_capacity(1 + 10 + 10 + self.key.len() + self.value.len());
        body.push(self.rec_type.as_byte());
        encode_varint(self.key.len() as i64, &mut body);
        encode_varint(self.value.len() as i64, &mut body);
        body.extend_from_slice(&self.key);
        body.extend_from_slice(&self.value);

        let crc = crc32(&body);
        let mut encoded = Vec::with_capacity(4 + body.len());
        encoded.extend_from_slice(&crc.to_le_bytes());
        encoded.extend_from_slice(&body);
        let len = encoded.len();
        (encoded, len)
    }

    /// Decodes one record from the front of `data`. `data` may be a window
    /// clamped to the end of the file; a record whose declared sizes run
    /// past the end of `data` is reported as [`StorageError::CorruptedRecord`]
    /// (a torn tail), not as [`Decoded::Eof`].
    pub fn decode(data: &[u8]) -> Result<Decoded> {
        if data.len() < 4 {
            return Err(StorageError::CorruptedRecord);
        }
        let crc_stored = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);

        if data.len() < 5 {
            return Err(StorageError::CorruptedRecord);
        }
        let type_byte = data[4];
        let (key_size, key_size_len) = decode_varint(&data[5..])?;
        let (val_size, val_size_len) = decode_varint(&data[5 + key_size_len..])?;

        if crc_stored == 0 && type_byte == 0 && key_size == 0 && val_size == 0 {
            return Ok(Decoded::Eof);
        }

        if key_size < 0 || val_size < 0 {
            return Err(StorageError::CorruptedRecord);
        }
        let key_size = key_size as usize;
        let val_size = val_size as usize;

        let header_len = 1 + key_size_len + val_size_len;
        let total_len = 4 + header_len + key_size + val_size;
        if data.len() < total_len {
            return Err(StorageError::CorruptedRecord);
        }

        let body = &data[4..total_len];
        if crc32(body) != crc_stored {
            return Err(StorageError::CorruptedRecord);
        }

        let key_start = 4 + header_len;
        let value_start = key_start + key_size;
        let record = Record {
            key: data[key_start..value_start].to_vec(),
            value: Bytes::copy_from_slice(&data[value_start..total_len]),
            rec_type: RecordType::from_byte(type_byte)?,
        };

        Ok(Decoded::Record { record, consumed: total_len })
    }
}

/// Builds the on-disk composite key: `varint(sequence) || user_key`.
pub fn encode_composite_key(seq_no: u64, user_key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(10 + user_key.len());
    encode_varint(seq_no as i64, &mut out);
    out.extend_from_slice(user_key);
    out
}

/// Splits a composite key back into its sequence number and user key.
pub fn parse_composite_key(composite: &[u8]) -> Result<(u64, &[u8])> {
    let (seq_no, consumed) = decode_varint(composite)?;
    if seq_no < 0 {
        return Err(StorageError::CorruptedRecord);
    }
    Ok((seq_no as u64, &composite[consumed..]))
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(RecordType::Normal; "normal")]
    #[test_case(RecordType::Deleted; "deleted")]
    #[test_case(RecordType::TxnFinished; "txn finished")]
    fn record_type_byte_round_trips(rec_type: RecordType) {
        assert_eq!(RecordType::from_byte(rec_type.as_byte()).unwrap(), rec_type);
    }

    #[test]
    fn round_trips_a_normal_record() {
        let key = encode_composite_key(NON_TXN_SEQ_NO, b"hello");
        let record = Record::new(key, b"world".to_vec(), RecordType::Normal);
        let (encoded, len) = record.encode();
        assert_eq!(encoded.len(), len);

        match Record::decode(&encoded).unwrap() {
            Decoded::Record { record: decoded, consumed } => {
                assert_eq!(decoded, record);
                assert_eq!(consumed, len);
            }
            Decoded::Eof => panic!("expected a record"),
        }
    }

    #[test]
    fn round_trips_an_empty_value_tombstone() {
        let key = encode_composite_key(7, b"gone");
        let record = Record::new(key, Vec::new(), RecordType::Deleted);
        let (encoded, _) = record.encode();
        match Record::decode(&encoded).unwrap() {
            Decoded::Record { record: decoded, .. } => assert_eq!(decoded, record),
            Decoded::Eof => panic!("expected a record"),
        }
    }

    #[test]
    fn txn_finished_has_no_user_key() {
        let key = encode_composite_key(5, &[]);
        let record = Record::new(key.clone(), Vec::new(), RecordType::TxnFinished);
        let (encoded, _) = record.encode();
        match Record::decode(&encoded).unwrap() {
            Decoded::Record { record: decoded, .. } => {
                let (seq, user_key) = parse_composite_key(&decoded.key).unwrap();
                assert_eq!(seq, 5);
                assert!(user_key.is_empty());
            }
            Decoded::Eof => panic!("expected a record"),
        }
        assert_eq!(key, encode_composite_key(5, &[]));
    }

    #[test]
    fn all_zero_header_is_eof() {
        let zeros = [0u8; MAX_HEADER_SIZE];
        match Record::decode(&zeros).unwrap() {
            Decoded::Eof => {}
            Decoded::Record { .. } => panic!("expected EOF"),
        }
    }

    #[test]
    fn crc_mismatch_is_corrupted() {
        let record = Record::new(b"k".to_vec(), b"v".to_vec(), RecordType::Normal);
        let (mut encoded, _) = record.encode();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xff;
        assert!(matches!(Record::decode(&encoded), Err(StorageError::CorruptedRecord)));
    }

    #[test]
    fn truncated_tail_is_corrupted_not_eof() {
        let record = Record::new(b"k".to_vec(), b"v".to_vec(), RecordType::Normal);
        let (encoded, _) = record.encode();
        let torn = &encoded[..encoded.len() - 2];
        assert!(matches!(Record::decode(torn), Err(StorageError::CorruptedRecord)));
    }

    #[test]
    fn composite_key_round_trips() {
        let composite = encode_composite_key(42, b"user-key");
        let (seq, user_key) = parse_composite_key(&composite).unwrap();
        assert_eq!(seq, 42);
        assert_eq!(user_key, b"user-key");
    }
}
