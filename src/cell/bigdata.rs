//! `db` (big-data) decode/encode.
//!
//! Values larger than one cell's payload are split into a chain of plain
//! data cells, indexed by a segment-offset table that a `db` record
//! points to. Decoding concatenates the segments up to the value's
//! declared length; encoding is the inverse split.

use crate::error::{HiveError, Result};
use crate::utils::{read_u16_le, read_u32_le};

/// Maximum bytes the reference implementation puts in one segment before
/// starting a new one (spec's "values larger than 16,344 bytes" cutoff).
pub const SEGMENT_SIZE: usize = 16_344;

const HEADER_SIZE: usize = 8;

/// Decoded `db` record header: segment count plus the offset of the
/// segment-offset table cell. Resolving the table and each segment's
/// bytes is the hive reader's job, since it requires following cell
/// offsets this module doesn't have access to.
#[derive(Debug, Clone)]
pub struct BigDataHeader {
    pub segment_count: u16,
    pub segment_list_offset: u32,
}

impl BigDataHeader {
    /// Decodes a `db` record header from cell payload bytes.
    pub fn decode(data: &[u8], offset: u32) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(HiveError::TruncatedData {
                offset,
                expected: HEADER_SIZE,
                actual: data.len(),
            });
        }
        if &data[0..2] != b"db" {
            return Err(HiveError::invalid_signature(b"db", &data[0..2]));
        }
        let segment_count = read_u16_le(data, 0x02)?;
        let segment_list_offset = read_u32_le(data, 0x04)?;
        Ok(BigDataHeader {
            segment_count,
            segment_list_offset,
        })
    }

    /// Encodes the header back to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE);
        out.extend_from_slice(b"db");
        out.extend_from_slice(&self.segment_count.to_le_bytes());
        out.extend_from_slice(&self.segment_list_offset.to_le_bytes());
        out
    }

    pub fn encoded_size(&self) -> usize {
        HEADER_SIZE
    }
}

/// Decodes the flat table of segment cell offsets that `segment_list_offset`
/// points to (a plain data cell, `segment_count` little-endian u32s).
pub fn decode_segment_table(data: &[u8], count: u16, offset: u32) -> Result<Vec<u32>> {
    let expected = count as usize * 4;
    if data.len() < expected {
        return Err(HiveError::TruncatedData {
            offset,
            expected,
            actual: data.len(),
        });
    }
    (0..count as usize)
        .map(|i| read_u32_le(data, i * 4))
        .collect()
}

/// Encodes a segment offset table.
pub fn encode_segment_table(offsets: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(offsets.len() * 4);
    for offset in offsets {
        out.extend_from_slice(&offset.to_le_bytes());
    }
    out
}

/// Concatenates segment payloads up to `declared_length` bytes. `strict`
/// controls what happens when the segments come up short: strict mode
/// reports corruption, tolerant mode returns whatever bytes it has.
pub fn concatenate_segments(
    segments: &[&[u8]],
    declared_length: usize,
    offset: u32,
    strict: bool,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(declared_length.min(1 << 20));
    for segment in segments {
        if out.len() >= declared_length {
            break;
        }
        let remaining = declared_length - out.len();
        let take = remaining.min(segment.len());
        out.extend_from_slice(&segment[..take]);
    }
    if out.len() < declared_length {
        if strict {
            return Err(HiveError::TruncatedData {
                offset,
                expected: declared_length,
                actual: out.len(),
            });
        }
    }
    Ok(out)
}

/// Splits `data` into `SEGMENT_SIZE`-byte chunks for encoding as a chain
/// of plain data cells referenced by a fresh `db` record.
pub fn split_into_segments(data: &[u8]) -> Vec<&[u8]> {
    data.chunks(SEGMENT_SIZE).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let header = BigDataHeader {
            segment_count: 3,
            segment_list_offset: 0x500,
        };
        let encoded = header.encode();
        assert_eq!(encoded.len(), header.encoded_size());
        let decoded = BigDataHeader::decode(&encoded, 0).unwrap();
        assert_eq!(decoded.segment_count, 3);
        assert_eq!(decoded.segment_list_offset, 0x500);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut data = vec![0u8; HEADER_SIZE];
        data[0..2].copy_from_slice(b"XX");
        assert!(BigDataHeader::decode(&data, 0).is_err());
    }

    #[test]
    fn segment_table_round_trip() {
        let offsets = vec![0x10, 0x20, 0x30];
        let encoded = encode_segment_table(&offsets);
        let decoded = decode_segment_table(&encoded, 3, 0).unwrap();
        assert_eq!(decoded, offsets);
    }

    #[test]
    fn concatenation_truncates_to_declared_length() {
        let a = [1u8, 2, 3, 4];
        let b = [5u8, 6, 7, 8];
        let out = concatenate_segments(&[&a, &b], 6, 0, true).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn strict_mode_rejects_short_concatenation() {
        let a = [1u8, 2];
        assert!(concatenate_segments(&[&a], 10, 0, true).is_err());
    }

    #[test]
    fn tolerant_mode_returns_partial_data() {
        let a = [1u8, 2];
        let out = concatenate_segments(&[&a], 10, 0, false).unwrap();
        assert_eq!(out, vec![1, 2]);
    }

    #[test]
    fn split_round_trips_through_concatenate() {
        let data: Vec<u8> = (0..(SEGMENT_SIZE * 2 + 10)).map(|i| (i % 251) as u8).collect();
        let segments = split_into_segments(&data);
        assert_eq!(segments.len(), 3);
        let rebuilt = concatenate_segments(&segments, data.len(), 0, true).unwrap();
        assert_eq!(rebuilt, data);
    }
}
