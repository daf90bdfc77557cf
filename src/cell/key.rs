//! `nk` (key node) decode/encode.
//!
//! A key node is the identity of a registry key: its name, its parent,
//! and offsets to its subkey list, value list, security descriptor, and
//! class name. Every NK except the hive's root carries a valid parent
//! offset; the root is distinguished by [`KeyNodeFlags::ROOT_KEY`].

use crate::cell::KeyNodeFlags;
use crate::error::{HiveError, Result};
use crate::utils::{
    decode_utf16le, decode_windows1252, encode_utf16le, encode_windows1252, read_u16_le,
    read_u32_le,
};

/// Registry key names may not exceed this many characters (spec §3).
pub const MAX_NAME_LEN: usize = 255;

/// Size of the fixed-width portion of an NK record, before the variable
/// length name (and, when present, class name — not modeled here since
/// this crate treats class names as unsupported opaque offsets, per the
/// open `class name extraction` scope left to callers).
const KEY_NODE_FIXED_SIZE: usize = 0x4C;

/// Sentinel used on disk for "no such cell" (subkey list, value list,
/// security descriptor, or class name offset).
pub const NO_OFFSET: u32 = 0xFFFF_FFFF;

/// Decoded `nk` record.
#[derive(Debug, Clone)]
pub struct KeyNode {
    /// Flags (volatile, root, compressed-name, ...).
    pub flags: KeyNodeFlags,
    /// Last-written FILETIME.
    pub last_written: u64,
    /// Offset of the parent NK, or [`NO_OFFSET`] for the root.
    pub parent_offset: u32,
    /// Declared subkey count (stable children only).
    pub subkey_count: u32,
    /// Declared volatile subkey count (always 0 on disk).
    pub volatile_subkey_count: u32,
    /// Offset of the subkey list cell, or [`NO_OFFSET`] if childless.
    pub subkey_list_offset: u32,
    /// Offset of the volatile subkey list (unused on disk, kept for
    /// round-trip fidelity).
    pub volatile_subkey_list_offset: u32,
    /// Declared value count.
    pub value_count: u32,
    /// Offset of the value list cell, or [`NO_OFFSET`] if valueless.
    pub value_list_offset: u32,
    /// Offset of this key's (possibly shared) security descriptor.
    pub security_offset: u32,
    /// Offset of the class name cell, or [`NO_OFFSET`].
    pub class_name_offset: u32,
    pub max_subkey_name_len: u32,
    pub max_subkey_class_len: u32,
    pub max_value_name_len: u32,
    pub max_value_data_len: u32,
    /// Length of the class name in bytes (0 if none).
    pub class_name_length: u16,
    /// Key name, already decoded (Windows-1252 or UTF-16LE per
    /// [`KeyNodeFlags::COMP_NAME`]).
    pub name: String,
}

impl KeyNode {
    /// Decodes an `nk` record from cell payload bytes (the cell's size
    /// prefix is not included).
    pub fn decode(data: &[u8], offset: u32) -> Result<Self> {
        if data.len() < KEY_NODE_FIXED_SIZE {
            return Err(HiveError::TruncatedData {
                offset,
                expected: KEY_NODE_FIXED_SIZE,
                actual: data.len(),
            });
        }
        if &data[0..2] != b"nk" {
            return Err(HiveError::invalid_signature(b"nk", &data[0..2]));
        }

        let flags = KeyNodeFlags::new(read_u16_le(data, 0x02)?);
        let last_written = crate::utils::read_filetime_le(data, 0x04)?;
        let parent_offset = read_u32_le(data, 0x10)?;
        let subkey_count = read_u32_le(data, 0x14)?;
        let volatile_subkey_count = read_u32_le(data, 0x18)?;
        let subkey_list_offset = read_u32_le(data, 0x1C)?;
        let volatile_subkey_list_offset = read_u32_le(data, 0x20)?;
        let value_count = read_u32_le(data, 0x24)?;
        let value_list_offset = read_u32_le(data, 0x28)?;
        let security_offset = read_u32_le(data, 0x2C)?;
        let class_name_offset = read_u32_le(data, 0x30)?;
        let max_subkey_name_len = read_u32_le(data, 0x34)?;
        let max_subkey_class_len = read_u32_le(data, 0x38)?;
        let max_value_name_len = read_u32_le(data, 0x3C)?;
        let max_value_data_len = read_u32_le(data, 0x40)?;
        let name_length = read_u16_le(data, 0x48)?;
        let class_name_length = read_u16_le(data, 0x4A)?;

        let name = if name_length > 0 {
            let name_end = KEY_NODE_FIXED_SIZE + name_length as usize;
            if name_end > data.len() {
                return Err(HiveError::TruncatedData {
                    offset,
                    expected: name_end,
                    actual: data.len(),
                });
            }
            let name_bytes = &data[KEY_NODE_FIXED_SIZE..name_end];
            if flags.is_compressed() {
                decode_windows1252(name_bytes)
            } else {
                if name_bytes.len() % 2 != 0 {
                    return Err(HiveError::InvalidUtf16 { offset });
                }
                decode_utf16le(name_bytes, offset)?
            }
        } else {
            String::new()
        };

        if name.chars().count() > MAX_NAME_LEN {
            return Err(HiveError::corrupt(format!(
                "key name at offset {offset:#x} exceeds {MAX_NAME_LEN} characters"
            )));
        }

        Ok(KeyNode {
            flags,
            last_written,
            parent_offset,
            subkey_count,
            volatile_subkey_count,
            subkey_list_offset,
            volatile_subkey_list_offset,
            value_count,
            value_list_offset,
            security_offset,
            class_name_offset,
            max_subkey_name_len,
            max_subkey_class_len,
            max_value_name_len,
            max_value_data_len,
            class_name_length,
            name,
        })
    }

    /// Encodes this record (without the cell size prefix). A name whose
    /// node carries [`KeyNodeFlags::COMP_NAME`] is re-encoded compressed
    /// (Windows-1252) as long as every character still fits a single
    /// byte; otherwise the flag is cleared and the name falls back to
    /// UTF-16LE, since writing a mismatched flag/encoding pair would
    /// desync decode on the next open.
    pub fn encode(&self) -> Vec<u8> {
        let compressed = self.flags.is_compressed() && self.name.chars().all(|c| (c as u32) <= 0xFF);
        let name_bytes = if compressed {
            encode_compressed_name(&self.name)
        } else {
            encode_utf16le(&self.name, false)
        };
        let flags = if compressed {
            self.flags.0
        } else {
            self.flags.0 & !KeyNodeFlags::COMP_NAME
        };
        let mut out = Vec::with_capacity(KEY_NODE_FIXED_SIZE + name_bytes.len());
        out.extend_from_slice(b"nk");
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&self.last_written.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // access bits, unused
        out.extend_from_slice(&self.parent_offset.to_le_bytes());
        out.extend_from_slice(&self.subkey_count.to_le_bytes());
        out.extend_from_slice(&self.volatile_subkey_count.to_le_bytes());
        out.extend_from_slice(&self.subkey_list_offset.to_le_bytes());
        out.extend_from_slice(&self.volatile_subkey_list_offset.to_le_bytes());
        out.extend_from_slice(&self.value_count.to_le_bytes());
        out.extend_from_slice(&self.value_list_offset.to_le_bytes());
        out.extend_from_slice(&self.security_offset.to_le_bytes());
        out.extend_from_slice(&self.class_name_offset.to_le_bytes());
        out.extend_from_slice(&self.max_subkey_name_len.to_le_bytes());
        out.extend_from_slice(&self.max_subkey_class_len.to_le_bytes());
        out.extend_from_slice(&self.max_value_name_len.to_le_bytes());
        out.extend_from_slice(&self.max_value_data_len.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // work var, unused
        out.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.class_name_length.to_le_bytes());
        out.extend_from_slice(&name_bytes);
        out
    }

    /// Predicts [`Self::encode`]'s output length without building it.
    pub fn encoded_size(&self) -> usize {
        let compressed = self.flags.is_compressed() && self.name.chars().all(|c| (c as u32) <= 0xFF);
        let name_len = if compressed {
            encode_compressed_name(&self.name).len()
        } else {
            encode_utf16le(&self.name, false).len()
        };
        KEY_NODE_FIXED_SIZE + name_len
    }

    /// Builds a fresh, childless, valueless key node (used by the AST
    /// and the edit applier when materializing a new key).
    pub fn new_empty(name: &str, parent_offset: u32, last_written: u64) -> Self {
        KeyNode {
            flags: KeyNodeFlags::new(0),
            last_written,
            parent_offset,
            subkey_count: 0,
            volatile_subkey_count: 0,
            subkey_list_offset: NO_OFFSET,
            volatile_subkey_list_offset: NO_OFFSET,
            value_count: 0,
            value_list_offset: NO_OFFSET,
            security_offset: NO_OFFSET,
            class_name_offset: NO_OFFSET,
            max_subkey_name_len: 0,
            max_subkey_class_len: 0,
            max_value_name_len: 0,
            max_value_data_len: 0,
            class_name_length: 0,
            name: name.to_string(),
        }
    }

    /// True if the declared subkey count is nonzero.
    pub fn has_subkeys(&self) -> bool {
        self.subkey_count > 0
    }

    /// True if the declared value count is nonzero.
    pub fn has_values(&self) -> bool {
        self.value_count > 0
    }

    /// True if [`KeyNodeFlags::ROOT_KEY`] is set.
    pub fn is_root(&self) -> bool {
        self.flags.is_root()
    }
}

/// Validates a key or value name component before it is stored, matching
/// the 255-character limit named in spec §3.
pub fn validate_name_length(name: &str) -> Result<()> {
    if name.chars().count() > MAX_NAME_LEN {
        return Err(HiveError::InvalidArgument(format!(
            "name '{name}' exceeds {MAX_NAME_LEN} characters"
        )));
    }
    Ok(())
}

fn encode_compressed_name(name: &str) -> Vec<u8> {
    encode_windows1252(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_buffer() {
        let data = vec![0u8; KEY_NODE_FIXED_SIZE - 1];
        assert!(KeyNode::decode(&data, 0).is_err());
    }

    #[test]
    fn rejects_bad_signature() {
        let mut data = vec![0u8; KEY_NODE_FIXED_SIZE];
        data[0..2].copy_from_slice(b"xx");
        assert!(KeyNode::decode(&data, 0).is_err());
    }

    #[test]
    fn encode_decode_round_trip() {
        let node = KeyNode::new_empty("Software", NO_OFFSET, 0x01D8_0000_0000_0000);
        let encoded = node.encode();
        assert_eq!(encoded.len(), node.encoded_size());
        let decoded = KeyNode::decode(&encoded, 0).unwrap();
        assert_eq!(decoded.name, "Software");
        assert_eq!(decoded.parent_offset, NO_OFFSET);
        assert_eq!(decoded.subkey_count, 0);
    }

    #[test]
    fn compressed_name_decodes_as_windows1252() {
        let mut data = vec![0u8; KEY_NODE_FIXED_SIZE];
        data[0..2].copy_from_slice(b"nk");
        data[2..4].copy_from_slice(&KeyNodeFlags::COMP_NAME.to_le_bytes());
        let name = b"\xe4\xf6\xfc"; // "äöü" Windows-1252
        data[0x48..0x4A].copy_from_slice(&(name.len() as u16).to_le_bytes());
        data.extend_from_slice(name);
        let decoded = KeyNode::decode(&data, 0).unwrap();
        assert_eq!(decoded.name, "äöü");
    }

    #[test]
    fn name_length_limit_is_enforced() {
        assert!(validate_name_length(&"a".repeat(255)).is_ok());
        assert!(validate_name_length(&"a".repeat(256)).is_err());
    }

    #[test]
    fn compressed_flag_round_trips_for_latin1_name() {
        let mut node = KeyNode::new_empty("Software", NO_OFFSET, 0);
        node.flags = KeyNodeFlags::new(KeyNodeFlags::COMP_NAME);
        let encoded = node.encode();
        assert_eq!(encoded.len(), node.encoded_size());
        let decoded = KeyNode::decode(&encoded, 0).unwrap();
        assert!(decoded.flags.is_compressed());
        assert_eq!(decoded.name, "Software");
    }

    #[test]
    fn compressed_flag_is_dropped_for_non_latin1_name() {
        let mut node = KeyNode::new_empty("日本語", NO_OFFSET, 0);
        node.flags = KeyNodeFlags::new(KeyNodeFlags::COMP_NAME);
        let encoded = node.encode();
        assert_eq!(encoded.len(), node.encoded_size());
        let decoded = KeyNode::decode(&encoded, 0).unwrap();
        assert!(!decoded.flags.is_compressed());
        assert_eq!(decoded.name, "日本語");
    }
}
