//! Hive bin (`hbin`) block decode/encode.
//!
//! Hive bins are 4KB-aligned blocks that hold a header followed by a
//! sequence of cells. This module parses one hbin's header and walks its
//! cells; [`crate::serializer`] uses [`encode_header`] and
//! [`pack_cells`] when writing bins back out.

use crate::error::{HiveError, Result};
use crate::utils::read_u32_le;

/// Expected signature for hive bins.
pub const HBIN_SIGNATURE: &[u8; 4] = b"hbin";

/// Size of an hbin header.
pub const HBIN_HEADER_SIZE: usize = 0x20;

/// Hbins are always a multiple of this size.
pub const HBIN_ALIGNMENT: u32 = 0x1000;

/// Decoded hbin header.
#[derive(Debug, Clone)]
pub struct HbinHeader {
    /// Offset of this hbin from the start of the hive-bins area.
    pub offset: u32,
    /// Size of this hbin in bytes, including the header.
    pub size: u32,
    pub reserved: [u32; 2],
    pub timestamp: u64,
    pub spare: u32,
}

impl HbinHeader {
    /// Decodes an hbin header, validating it sits where the caller
    /// expected (hbins are walked sequentially, so their declared offset
    /// must match the running total of bytes consumed so far).
    pub fn decode(data: &[u8], expected_offset: u32) -> Result<Self> {
        if data.len() < HBIN_HEADER_SIZE {
            return Err(HiveError::TruncatedData {
                offset: expected_offset,
                expected: HBIN_HEADER_SIZE,
                actual: data.len(),
            });
        }
        let signature: [u8; 4] = data[0..4].try_into().unwrap();
        if &signature != HBIN_SIGNATURE {
            return Err(HiveError::invalid_signature(HBIN_SIGNATURE, &signature));
        }
        let offset = read_u32_le(data, 0x04)?;
        if offset != expected_offset {
            return Err(HiveError::corrupt(format!(
                "hbin offset mismatch: expected {expected_offset:#x}, found {offset:#x}"
            )));
        }
        let size = read_u32_le(data, 0x08)?;
        let reserved = [read_u32_le(data, 0x0C)?, read_u32_le(data, 0x10)?];
        let timestamp =
            u64::from(read_u32_le(data, 0x14)?) | (u64::from(read_u32_le(data, 0x18)?) << 32);
        let spare = read_u32_le(data, 0x1C)?;

        Ok(HbinHeader {
            offset,
            size,
            reserved,
            timestamp,
            spare,
        })
    }

    /// Encodes this header back to bytes.
    pub fn encode(&self) -> [u8; HBIN_HEADER_SIZE] {
        let mut out = [0u8; HBIN_HEADER_SIZE];
        out[0..4].copy_from_slice(HBIN_SIGNATURE);
        out[4..8].copy_from_slice(&self.offset.to_le_bytes());
        out[8..12].copy_from_slice(&self.size.to_le_bytes());
        out[12..16].copy_from_slice(&self.reserved[0].to_le_bytes());
        out[16..20].copy_from_slice(&self.reserved[1].to_le_bytes());
        out[20..24].copy_from_slice(&(self.timestamp as u32).to_le_bytes());
        out[24..28].copy_from_slice(&((self.timestamp >> 32) as u32).to_le_bytes());
        out[28..32].copy_from_slice(&self.spare.to_le_bytes());
        out
    }

    /// Size of the cell area, excluding this header.
    pub fn data_size(&self) -> u32 {
        self.size.saturating_sub(HBIN_HEADER_SIZE as u32)
    }
}

/// Builds a fresh hbin header for the serializer.
pub fn new_header(offset: u32, size: u32, timestamp: u64) -> HbinHeader {
    HbinHeader {
        offset,
        size,
        reserved: [0, 0],
        timestamp,
        spare: 0,
    }
}

/// Encodes the signed 32-bit size prefix that precedes every cell's
/// payload. Negative means allocated, matching [`CellInfo::is_allocated`].
pub fn encode_cell_size(payload_len: usize, allocated: bool) -> [u8; 4] {
    let total = (payload_len + 4) as i32;
    let signed = if allocated { -total } else { total };
    signed.to_le_bytes()
}

/// Concatenates cells (payload bytes, not yet size-prefixed) into one
/// hbin's data area, prefixing each with its allocated-cell size field.
/// Used by the full-rewrite serializer once it has encoded every record
/// destined for a given bin.
pub fn pack_cells(payloads: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for payload in payloads {
        out.extend_from_slice(&encode_cell_size(payload.len(), true));
        out.extend_from_slice(payload);
    }
    out
}

/// Iterator over cells within one hbin's data area.
pub struct HbinCellIterator<'a> {
    data: &'a [u8],
    offset: usize,
    hbin_offset: u32,
}

impl<'a> HbinCellIterator<'a> {
    /// `data` is the hbin's data area, with the header already stripped.
    /// `hbin_offset` is this hbin's offset from the first hbin, used to
    /// compute absolute cell offsets.
    pub fn new(data: &'a [u8], hbin_offset: u32) -> Self {
        Self {
            data,
            offset: 0,
            hbin_offset,
        }
    }
}

impl<'a> Iterator for HbinCellIterator<'a> {
    type Item = Result<CellInfo<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset + 4 > self.data.len() {
            return None;
        }

        let size = match read_u32_le(self.data, self.offset) {
            Ok(s) => s as i32,
            Err(e) => return Some(Err(e)),
        };
        if size == 0 {
            return None;
        }

        let abs_size = size.unsigned_abs() as usize;
        if abs_size < 4 {
            return Some(Err(HiveError::invalid_cell_size(
                size,
                self.hbin_offset + self.offset as u32,
            )));
        }

        let cell_offset = self.hbin_offset + self.offset as u32;
        let data_start = self.offset + 4;
        let data_end = self.offset + abs_size;
        if data_end > self.data.len() {
            return Some(Err(HiveError::TruncatedData {
                offset: cell_offset,
                expected: abs_size,
                actual: self.data.len() - self.offset,
            }));
        }

        let cell_info = CellInfo {
            offset: cell_offset,
            size: abs_size as u32,
            is_allocated: size < 0,
            data: &self.data[data_start..data_end],
        };

        self.offset = data_end;
        Some(Ok(cell_info))
    }
}

/// One cell's location, allocation state, and payload bytes.
#[derive(Debug)]
pub struct CellInfo<'a> {
    /// Offset from the first hbin (what NK/VK/list fields call a "cell
    /// offset").
    pub offset: u32,
    /// Total cell size including the 4-byte size prefix.
    pub size: u32,
    /// False for cells on the free list.
    pub is_allocated: bool,
    /// Payload bytes, excluding the size prefix.
    pub data: &'a [u8],
}

impl<'a> CellInfo<'a> {
    /// The cell's 2-byte record signature, if it has one (free cells and
    /// zero-length cells don't).
    pub fn cell_type(&self) -> Option<[u8; 2]> {
        if self.data.len() >= 2 {
            Some([self.data[0], self.data[1]])
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let header = new_header(0, 0x1000, 0);
        let encoded = header.encode();
        let decoded = HbinHeader::decode(&encoded, 0).unwrap();
        assert_eq!(decoded.size, 0x1000);
        assert_eq!(decoded.data_size(), 0x1000 - HBIN_HEADER_SIZE as u32);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut data = vec![0u8; HBIN_HEADER_SIZE];
        data[0..4].copy_from_slice(b"XXXX");
        assert!(HbinHeader::decode(&data, 0).is_err());
    }

    #[test]
    fn rejects_offset_mismatch() {
        let header = new_header(0x1000, 0x1000, 0);
        let encoded = header.encode();
        assert!(HbinHeader::decode(&encoded, 0).is_err());
    }

    #[test]
    fn cell_iterator_walks_allocated_and_free_cells() {
        let mut data = Vec::new();
        data.extend_from_slice(&encode_cell_size(4, true));
        data.extend_from_slice(b"nkAB");
        data.extend_from_slice(&(12i32).to_le_bytes()); // free cell, 8 bytes payload
        data.extend_from_slice(&[0u8; 8]);

        let cells: Vec<_> = HbinCellIterator::new(&data, 0).collect::<Result<_>>().unwrap();
        assert_eq!(cells.len(), 2);
        assert!(cells[0].is_allocated);
        assert!(!cells[1].is_allocated);
        assert_eq!(cells[1].offset, 8);
    }

    #[test]
    fn pack_cells_produces_signed_size_prefixes() {
        let packed = pack_cells(&[b"nkAB".to_vec(), b"vkCD".to_vec()]);
        let cells: Vec<_> = HbinCellIterator::new(&packed, 0).collect::<Result<_>>().unwrap();
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].data, b"nkAB");
        assert_eq!(cells[1].data, b"vkCD");
    }
}
