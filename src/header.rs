//! Registry hive base block decode/encode.
//!
//! The base block is the first 4096 bytes of a hive file: version,
//! sequence numbers, the root key's cell offset, and a checksum over
//! the rest of the block.

use crate::error::{HiveError, Result};
use crate::utils::{calculate_checksum, read_fixed_ascii, read_u32_le};
use std::fmt;
use tracing::warn;

/// Size of the base block.
pub const BASE_BLOCK_SIZE: usize = 4096;

/// Expected signature.
pub const REGF_SIGNATURE: &[u8; 4] = b"regf";

const FILE_NAME_OFFSET: usize = 0x30;
const FILE_NAME_LENGTH: usize = 64;
const CHECKSUM_OFFSET: usize = 0x1FC;

/// Decoded base block.
#[derive(Debug, Clone)]
pub struct BaseBlock {
    pub primary_sequence: u32,
    pub secondary_sequence: u32,
    pub last_written: u64,
    pub major_version: u32,
    pub minor_version: u32,
    pub file_type: u32,
    pub file_format: u32,
    pub root_cell_offset: u32,
    pub hive_bins_data_size: u32,
    pub clustering_factor: u32,
    pub file_name: String,
    pub checksum: u32,
}

impl BaseBlock {
    /// Decodes a base block. When `strict` is false, a checksum mismatch
    /// is logged and tolerated instead of rejected — the rest of the
    /// hive may still be perfectly readable.
    pub fn decode(data: &[u8], strict: bool) -> Result<Self> {
        if data.len() < BASE_BLOCK_SIZE {
            return Err(HiveError::HiveTooSmall {
                size: data.len(),
                minimum: BASE_BLOCK_SIZE,
            });
        }

        let signature: [u8; 4] = data[0..4].try_into().unwrap();
        if &signature != REGF_SIGNATURE {
            return Err(HiveError::invalid_signature(REGF_SIGNATURE, &signature));
        }

        let primary_sequence = read_u32_le(data, 0x04)?;
        let secondary_sequence = read_u32_le(data, 0x08)?;
        let last_written =
            u64::from(read_u32_le(data, 0x0C)?) | (u64::from(read_u32_le(data, 0x10)?) << 32);
        let major_version = read_u32_le(data, 0x14)?;
        let minor_version = read_u32_le(data, 0x18)?;
        let file_type = read_u32_le(data, 0x1C)?;
        let file_format = read_u32_le(data, 0x20)?;
        let root_cell_offset = read_u32_le(data, 0x24)?;
        let hive_bins_data_size = read_u32_le(data, 0x28)?;
        let clustering_factor = read_u32_le(data, 0x2C)?;
        let file_name = read_fixed_ascii(
            &data[FILE_NAME_OFFSET..FILE_NAME_OFFSET + FILE_NAME_LENGTH * 2],
            FILE_NAME_LENGTH * 2,
        );
        let checksum = read_u32_le(data, CHECKSUM_OFFSET)?;

        let calculated = calculate_checksum(data);
        if checksum != calculated {
            if strict {
                return Err(HiveError::ChecksumMismatch {
                    expected: checksum,
                    calculated,
                });
            }
            warn!(expected = checksum, calculated, "base block checksum mismatch, continuing in tolerant mode");
        }

        if major_version != 1 || !(3..=6).contains(&minor_version) {
            return Err(HiveError::UnsupportedVersion {
                major: major_version,
                minor: minor_version,
            });
        }

        Ok(BaseBlock {
            primary_sequence,
            secondary_sequence,
            last_written,
            major_version,
            minor_version,
            file_type,
            file_format,
            root_cell_offset,
            hive_bins_data_size,
            clustering_factor,
            file_name,
            checksum,
        })
    }

    /// Encodes this base block, padding to [`BASE_BLOCK_SIZE`] and
    /// recomputing the checksum over the freshly written bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; BASE_BLOCK_SIZE];
        out[0..4].copy_from_slice(REGF_SIGNATURE);
        out[0x04..0x08].copy_from_slice(&self.primary_sequence.to_le_bytes());
        out[0x08..0x0C].copy_from_slice(&self.secondary_sequence.to_le_bytes());
        out[0x0C..0x10].copy_from_slice(&(self.last_written as u32).to_le_bytes());
        out[0x10..0x14].copy_from_slice(&((self.last_written >> 32) as u32).to_le_bytes());
        out[0x14..0x18].copy_from_slice(&self.major_version.to_le_bytes());
        out[0x18..0x1C].copy_from_slice(&self.minor_version.to_le_bytes());
        out[0x1C..0x20].copy_from_slice(&self.file_type.to_le_bytes());
        out[0x20..0x24].copy_from_slice(&self.file_format.to_le_bytes());
        out[0x24..0x28].copy_from_slice(&self.root_cell_offset.to_le_bytes());
        out[0x28..0x2C].copy_from_slice(&self.hive_bins_data_size.to_le_bytes());
        out[0x2C..0x30].copy_from_slice(&self.clustering_factor.to_le_bytes());
        // file_name intentionally left zeroed: this crate never fabricates
        // a stored name for a hive it did not open with one.

        let checksum = calculate_checksum(&out);
        out[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_le_bytes());
        out
    }

    /// True when primary and secondary sequence numbers agree, meaning
    /// the hive was closed cleanly (no pending transaction-log replay).
    pub fn is_consistent(&self) -> bool {
        self.primary_sequence == self.secondary_sequence
    }

    /// Bumps both sequence numbers together, matching what a clean save
    /// does (a crash mid-write would leave them mismatched, which this
    /// crate has no journal to recover from — see open questions).
    pub fn bump_sequence(&mut self) {
        self.primary_sequence = self.primary_sequence.wrapping_add(1);
        self.secondary_sequence = self.primary_sequence;
    }

    pub fn last_written_datetime(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        let (secs, nanos) = crate::utils::filetime_to_unix(self.last_written);
        chrono::DateTime::from_timestamp(secs, nanos)
    }
}

impl fmt::Display for BaseBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "regf v{}.{}, root={:#x}, {} bytes of hive bins, consistent={}",
            self.major_version,
            self.minor_version,
            self.root_cell_offset,
            self.hive_bins_data_size,
            self.is_consistent()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BaseBlock {
        BaseBlock {
            primary_sequence: 1,
            secondary_sequence: 1,
            last_written: 0,
            major_version: 1,
            minor_version: 5,
            file_type: 0,
            file_format: 1,
            root_cell_offset: 0x20,
            hive_bins_data_size: 0x2000,
            clustering_factor: 1,
            file_name: String::new(),
            checksum: 0,
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let block = sample();
        let encoded = block.encode();
        let decoded = BaseBlock::decode(&encoded, true).unwrap();
        assert_eq!(decoded.root_cell_offset, 0x20);
        assert_eq!(decoded.minor_version, 5);
        assert!(decoded.is_consistent());
    }

    #[test]
    fn too_small_is_rejected() {
        let data = vec![0u8; 100];
        assert!(matches!(
            BaseBlock::decode(&data, true).unwrap_err(),
            HiveError::HiveTooSmall { .. }
        ));
    }

    #[test]
    fn strict_mode_rejects_checksum_mismatch() {
        let mut encoded = sample().encode();
        encoded[CHECKSUM_OFFSET] ^= 0xFF;
        assert!(matches!(
            BaseBlock::decode(&encoded, true).unwrap_err(),
            HiveError::ChecksumMismatch { .. }
        ));
    }

    #[test]
    fn tolerant_mode_accepts_checksum_mismatch() {
        let mut encoded = sample().encode();
        encoded[CHECKSUM_OFFSET] ^= 0xFF;
        assert!(BaseBlock::decode(&encoded, false).is_ok());
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let mut block = sample();
        block.minor_version = 2;
        let encoded = block.encode();
        assert!(matches!(
            BaseBlock::decode(&encoded, true).unwrap_err(),
            HiveError::UnsupportedVersion { .. }
        ));
    }

    #[test]
    fn bump_sequence_keeps_halves_equal() {
        let mut block = sample();
        block.bump_sequence();
        assert_eq!(block.primary_sequence, 2);
        assert!(block.is_consistent());
    }
}
