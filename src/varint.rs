//! Signed (zig-zag) varint encoding.
//!
//! Every size and position field on disk (key/value lengths, the
//! composite-key sequence number, and `Position`'s `fileId`/`offset`/`size`)
//! is stored as a zig-zag varint, matching the original on-disk layout
//! even though none of these quantities are ever negative in practice.

use crate::error::StorageError;

/// Maximum bytes a zig-zag varint of an `i64` can occupy.
pub const MAX_VARINT_LEN: usize = 10;

fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Appends the zig-zag varint encoding of `value` to `buf`, returning the
/// number of bytes written.
pub fn encode_varint(value: i64, buf: &mut Vec<u8>) -> usize {
    let mut zigzagged = zigzag_encode(value);
    let start = buf.len();
    loop {
        let mut byte = (zigzagged & 0x7f) as u8;
        zigzagged >>= 7;
        if zigzagged != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if zigzagged == 0 {
            break;
        }
    }
    buf.len() - start
}

/// Decodes a zig-zag varint from the front of `data`, returning the value
/// and the number of bytes consumed.
pub fn decode_varint(data: &[u8]) -> Result<(i64, usize), StorageError> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    for (i, &byte) in data.iter().enumerate().take(MAX_VARINT_LEN) {
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok((zigzag_decode(result), i + 1));
        }
        shift += 7;
    }
    Err(StorageError::CorruptedRecord)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_small_and_large_values() {
        for value in [0i64, 1, -1, 127, 128, -128, i64::MAX, i64::MIN, 1 << 40] {
            let mut buf = Vec::new();
            encode_varint(value, &mut buf);
            let (decoded, consumed) = decode_varint(&buf).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(consumed, buf.len());
        }
    }

    #[test]
    fn truncated_input_is_corrupted() {
        let mut buf = Vec::new();
        encode_varint(1 << 40, &mut buf);
        buf.truncate(buf.len() - 1);
        assert!(decode_varint(&buf).is_err());
    }

    #[test]
    fn proptest_round_trips_any_i64() {
        use proptest::prelude::*;

        proptest!(|(value: i64)| {
            let mut buf = Vec::new();
            let written = encode_varint(value, &mut buf);
            let (decoded, consumed) = decode_varint(&buf).unwrap();
            prop_assert_eq!(decoded, value);
            prop_assert_eq!(consumed, written);
        });
    }
}
