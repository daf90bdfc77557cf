//! `vk` (value key) decode/encode, and the typed value payload
//! ([`ValueData`]) that lives in the cell a `vk` points to (or, for
//! small payloads, inline in the `vk` itself).

use crate::cell::ValueType;
use crate::error::{HiveError, Result};
use crate::utils::{decode_utf16le, decode_windows1252, encode_utf16le, read_u16_le, read_u32_le};
use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use std::io::Cursor;

const VALUE_KEY_FIXED_SIZE: usize = 0x14;

/// Value name is stored ASCII/Windows-1252 rather than UTF-16LE.
const FLAG_NAME_IS_ASCII: u16 = 0x0001;

/// High bit of the on-disk data-length field: data lives inline in the
/// `data_offset` field rather than in a separate cell.
const INLINE_FLAG: u32 = 0x8000_0000;

/// Decoded `vk` record. `name` is the empty string for the key's unnamed
/// "default" value — callers that need a display form (`@` in a path,
/// `(Default)` in `.reg` text) apply that at the edge, not here.
#[derive(Debug, Clone)]
pub struct ValueKey {
    /// Raw data type tag.
    pub data_type: ValueType,
    /// Length of the value's data in bytes (inline flag masked off).
    pub data_length: u32,
    /// True if the low 4 bytes of `data_offset` hold the data directly.
    pub is_inline: bool,
    /// Either the 4 inline data bytes (as a little-endian u32) or the
    /// offset of the data cell.
    pub data_offset: u32,
    /// Name-encoding flag as stored on disk (bit 0 only is meaningful).
    pub flags: u16,
    /// Value name, empty for the default value.
    pub name: String,
}

impl ValueKey {
    /// Decodes a `vk` record from cell payload bytes.
    pub fn decode(data: &[u8], offset: u32) -> Result<Self> {
        if data.len() < VALUE_KEY_FIXED_SIZE {
            return Err(HiveError::TruncatedData {
                offset,
                expected: VALUE_KEY_FIXED_SIZE,
                actual: data.len(),
            });
        }
        if &data[0..2] != b"vk" {
            return Err(HiveError::invalid_signature(b"vk", &data[0..2]));
        }

        let name_length = read_u16_le(data, 0x02)?;
        let raw_length = read_u32_le(data, 0x04)?;
        let is_inline = raw_length & INLINE_FLAG != 0;
        let data_length = raw_length & !INLINE_FLAG;
        if is_inline && data_length > 4 {
            return Err(HiveError::InvalidInlineLength {
                length: data_length,
                offset,
            });
        }
        let data_offset = read_u32_le(data, 0x08)?;
        let data_type = ValueType::from_u32(read_u32_le(data, 0x0C)?);
        let flags = read_u16_le(data, 0x10)?;

        let name = if name_length > 0 {
            let name_end = VALUE_KEY_FIXED_SIZE + name_length as usize;
            if name_end > data.len() {
                return Err(HiveError::TruncatedData {
                    offset,
                    expected: name_end,
                    actual: data.len(),
                });
            }
            let name_bytes = &data[VALUE_KEY_FIXED_SIZE..name_end];
            if flags & FLAG_NAME_IS_ASCII != 0 {
                decode_windows1252(name_bytes)
            } else {
                decode_utf16le(name_bytes, offset)?
            }
        } else {
            String::new()
        };

        Ok(ValueKey {
            data_type,
            data_length,
            is_inline,
            data_offset,
            flags,
            name,
        })
    }

    /// Encodes this record. Names are always written UTF-16LE, matching
    /// [`crate::cell::key::KeyNode::encode`]'s rationale.
    pub fn encode(&self) -> Vec<u8> {
        let name_bytes = encode_utf16le(&self.name, false);
        let mut out = Vec::with_capacity(VALUE_KEY_FIXED_SIZE + name_bytes.len());
        out.extend_from_slice(b"vk");
        out.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
        let raw_length = self.data_length | if self.is_inline { INLINE_FLAG } else { 0 };
        out.extend_from_slice(&raw_length.to_le_bytes());
        out.extend_from_slice(&self.data_offset.to_le_bytes());
        out.extend_from_slice(&self.data_type.to_u32().to_le_bytes());
        out.extend_from_slice(&(self.flags & !FLAG_NAME_IS_ASCII).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // spare
        out.extend_from_slice(&name_bytes);
        out
    }

    /// Predicts [`Self::encode`]'s output length.
    pub fn encoded_size(&self) -> usize {
        VALUE_KEY_FIXED_SIZE + encode_utf16le(&self.name, false).len()
    }

    /// Extracts the up-to-4 inline data bytes, truncated to `data_length`.
    pub fn inline_bytes(&self) -> Vec<u8> {
        debug_assert!(self.is_inline);
        self.data_offset.to_le_bytes()[..self.data_length as usize].to_vec()
    }

    /// Builds a `vk` for data that fits inline.
    pub fn new_inline(name: &str, data_type: ValueType, bytes: &[u8]) -> Self {
        debug_assert!(bytes.len() <= 4);
        let mut word = [0u8; 4];
        word[..bytes.len()].copy_from_slice(bytes);
        ValueKey {
            data_type,
            data_length: bytes.len() as u32,
            is_inline: true,
            data_offset: u32::from_le_bytes(word),
            flags: 0,
            name: name.to_string(),
        }
    }

    /// Builds a `vk` pointing at an out-of-line data cell.
    pub fn new_out_of_line(name: &str, data_type: ValueType, len: u32, data_offset: u32) -> Self {
        ValueKey {
            data_type,
            data_length: len,
            is_inline: false,
            data_offset,
            flags: 0,
            name: name.to_string(),
        }
    }
}

/// Decoded value payload, typed by [`ValueType`].
#[derive(Debug, Clone, PartialEq)]
pub enum ValueData {
    None,
    String(String),
    ExpandString(String),
    Binary(Vec<u8>),
    Dword(u32),
    DwordBigEndian(u32),
    Link(Vec<u8>),
    MultiString(Vec<String>),
    Qword(u64),
    /// Any type this crate doesn't interpret, including the three
    /// resource-list types and anything outside the documented range.
    /// Carries the original 32-bit type tag alongside the raw bytes so a
    /// round-trip through [`Self::value_type`] reproduces it exactly
    /// instead of collapsing to `REG_BINARY`.
    Unknown(u32, Vec<u8>),
}

impl ValueData {
    /// Decodes raw bytes according to `value_type`. Never fails for a
    /// recognized fixed-width type's length mismatch by silently
    /// truncating — returns [`HiveError::TruncatedData`] instead.
    pub fn decode(data: &[u8], value_type: ValueType, offset: u32) -> Result<Self> {
        if data.is_empty() && !matches!(value_type, ValueType::Dword | ValueType::DwordBigEndian | ValueType::Qword) {
            return Ok(ValueData::None);
        }
        match value_type {
            ValueType::None => Ok(ValueData::None),
            ValueType::String => Ok(ValueData::String(decode_utf16le(data, offset)?)),
            ValueType::ExpandString => Ok(ValueData::ExpandString(decode_utf16le(data, offset)?)),
            ValueType::Binary => Ok(ValueData::Binary(data.to_vec())),
            ValueType::Dword => {
                let mut cursor = Cursor::new(require_len(data, 4, offset)?);
                Ok(ValueData::Dword(cursor.read_u32::<LittleEndian>()?))
            }
            ValueType::DwordBigEndian => {
                let mut cursor = Cursor::new(require_len(data, 4, offset)?);
                Ok(ValueData::DwordBigEndian(cursor.read_u32::<BigEndian>()?))
            }
            ValueType::Qword => {
                let mut cursor = Cursor::new(require_len(data, 8, offset)?);
                Ok(ValueData::Qword(cursor.read_u64::<LittleEndian>()?))
            }
            ValueType::Link => Ok(ValueData::Link(data.to_vec())),
            ValueType::MultiString => Ok(ValueData::MultiString(split_multi_string(data, offset)?)),
            ValueType::ResourceList
            | ValueType::FullResourceDescriptor
            | ValueType::ResourceRequirementsList
            | ValueType::Unknown(_) => Ok(ValueData::Unknown(value_type.to_u32(), data.to_vec())),
        }
    }

    /// Encodes this payload back to the bytes that would sit in the data
    /// cell (or inline word), matching [`Self::decode`]'s layout exactly.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ValueData::None => Vec::new(),
            ValueData::String(s) | ValueData::ExpandString(s) => encode_utf16le(s, true),
            ValueData::Binary(b) | ValueData::Link(b) => b.clone(),
            ValueData::Unknown(_, b) => b.clone(),
            ValueData::Dword(d) => d.to_le_bytes().to_vec(),
            ValueData::DwordBigEndian(d) => d.to_be_bytes().to_vec(),
            ValueData::Qword(q) => q.to_le_bytes().to_vec(),
            ValueData::MultiString(strings) => {
                let mut joined = String::new();
                for s in strings {
                    joined.push_str(s);
                    joined.push('\0');
                }
                joined.push('\0');
                encode_utf16le(&joined, false)
            }
        }
    }

    /// The `ValueType` this payload was decoded as (or should be encoded
    /// as); callers reconstructing a `vk` pass this straight through.
    pub fn value_type(&self) -> ValueType {
        match self {
            ValueData::None => ValueType::None,
            ValueData::String(_) => ValueType::String,
            ValueData::ExpandString(_) => ValueType::ExpandString,
            ValueData::Binary(_) => ValueType::Binary,
            ValueData::Dword(_) => ValueType::Dword,
            ValueData::DwordBigEndian(_) => ValueType::DwordBigEndian,
            ValueData::Link(_) => ValueType::Link,
            ValueData::MultiString(_) => ValueType::MultiString,
            ValueData::Qword(_) => ValueType::Qword,
            ValueData::Unknown(tag, _) => ValueType::from_u32(*tag),
        }
    }
}

fn require_len(data: &[u8], len: usize, offset: u32) -> Result<&[u8]> {
    if data.len() < len {
        return Err(HiveError::TruncatedData {
            offset,
            expected: len,
            actual: data.len(),
        });
    }
    Ok(&data[..len])
}

fn split_multi_string(data: &[u8], offset: u32) -> Result<Vec<String>> {
    let full = decode_utf16le(data, offset)?;
    Ok(full
        .split('\0')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_buffer() {
        let data = vec![0u8; VALUE_KEY_FIXED_SIZE - 1];
        assert!(ValueKey::decode(&data, 0).is_err());
    }

    #[test]
    fn rejects_bad_signature() {
        let mut data = vec![0u8; VALUE_KEY_FIXED_SIZE];
        data[0..2].copy_from_slice(b"XX");
        assert!(ValueKey::decode(&data, 0).is_err());
    }

    #[test]
    fn inline_round_trip() {
        let vk = ValueKey::new_inline("Count", ValueType::Dword, &[0x01, 0x02, 0x03, 0x04]);
        let encoded = vk.encode();
        let decoded = ValueKey::decode(&encoded, 0).unwrap();
        assert!(decoded.is_inline);
        assert_eq!(decoded.inline_bytes(), vec![0x01, 0x02, 0x03, 0x04]);
        assert_eq!(decoded.name, "Count");
    }

    #[test]
    fn inline_length_over_four_is_rejected() {
        let mut data = vec![0u8; VALUE_KEY_FIXED_SIZE];
        data[0..2].copy_from_slice(b"vk");
        let raw_length: u32 = INLINE_FLAG | 5;
        data[4..8].copy_from_slice(&raw_length.to_le_bytes());
        assert!(ValueKey::decode(&data, 0).is_err());
    }

    #[test]
    fn default_value_has_empty_name() {
        let vk = ValueKey::new_out_of_line("", ValueType::String, 0, 0x100);
        let encoded = vk.encode();
        let decoded = ValueKey::decode(&encoded, 0).unwrap();
        assert_eq!(decoded.name, "");
    }

    #[test]
    fn dword_round_trip() {
        let v = ValueData::Dword(0xDEAD_BEEF);
        let encoded = v.encode();
        let decoded = ValueData::decode(&encoded, ValueType::Dword, 0).unwrap();
        assert_eq!(decoded, v);
    }

    #[test]
    fn multi_string_round_trip() {
        let v = ValueData::MultiString(vec!["a".into(), "bb".into(), "ccc".into()]);
        let encoded = v.encode();
        let decoded = ValueData::decode(&encoded, ValueType::MultiString, 0).unwrap();
        assert_eq!(decoded, v);
    }

    #[test]
    fn unknown_type_round_trips_as_opaque_bytes() {
        let bytes = vec![0xAA, 0xBB, 0xCC];
        let decoded = ValueData::decode(&bytes, ValueType::Unknown(0x99), 0).unwrap();
        assert_eq!(decoded, ValueData::Unknown(0x99, bytes));
    }

    #[test]
    fn unknown_type_preserves_tag_through_value_type() {
        let decoded = ValueData::decode(&[0xAA], ValueType::Unknown(0x63), 0).unwrap();
        assert_eq!(decoded.value_type(), ValueType::Unknown(0x63));
    }
}
