//! Subkey list decode/encode (`lf`, `lh`, `li`, `ri`).
//!
//! Registry keys keep their children sorted by name in one of three leaf
//! forms, with `ri` providing a second level of indirection when a
//! key's children don't fit a single leaf cell.

use crate::error::{HiveError, Result};
use crate::utils::read_u32_le;

/// Which on-disk subkey list variant a cell holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubkeyListType {
    /// `li` — flat list of NK offsets, no name hint.
    IndexLeaf,
    /// `lf` — flat list, 4-byte literal name-prefix hint per entry.
    FastLeaf,
    /// `lh` — flat list, 4-byte name-hash hint per entry.
    HashLeaf,
    /// `ri` — list of further subkey-list cell offsets.
    IndexRoot,
}

impl SubkeyListType {
    /// Parses a subkey list type from its 2-byte signature.
    pub fn from_signature(sig: &[u8; 2]) -> Result<Self> {
        match sig {
            b"li" => Ok(SubkeyListType::IndexLeaf),
            b"lf" => Ok(SubkeyListType::FastLeaf),
            b"lh" => Ok(SubkeyListType::HashLeaf),
            b"ri" => Ok(SubkeyListType::IndexRoot),
            _ => Err(HiveError::unknown_cell_type(*sig, 0)),
        }
    }

    /// Returns the 2-byte on-disk signature.
    pub fn signature(&self) -> &'static [u8; 2] {
        match self {
            SubkeyListType::IndexLeaf => b"li",
            SubkeyListType::FastLeaf => b"lf",
            SubkeyListType::HashLeaf => b"lh",
            SubkeyListType::IndexRoot => b"ri",
        }
    }
}

/// One entry of an `lf`/`lh` list: the child NK offset plus a 4-byte hint
/// used by the reference implementation to prune string compares.
#[derive(Debug, Clone, Copy)]
pub struct SubkeyListEntry {
    pub key_offset: u32,
    pub name_hint: u32,
}

/// A decoded subkey list cell.
#[derive(Debug, Clone)]
pub enum SubkeyList {
    /// `li`: bare offsets.
    IndexLeaf(Vec<u32>),
    /// `lf`/`lh`: offsets with a name hint.
    LeafWithHints(SubkeyListType, Vec<SubkeyListEntry>),
    /// `ri`: offsets of further subkey-list cells.
    IndexRoot(Vec<u32>),
}

impl SubkeyList {
    /// Decodes a subkey list from cell payload bytes.
    pub fn decode(data: &[u8], offset: u32) -> Result<Self> {
        if data.len() < 4 {
            return Err(HiveError::TruncatedData {
                offset,
                expected: 4,
                actual: data.len(),
            });
        }
        let sig = [data[0], data[1]];
        let list_type = SubkeyListType::from_signature(&sig)?;
        let count = u16::from_le_bytes([data[2], data[3]]) as usize;

        match list_type {
            SubkeyListType::IndexLeaf | SubkeyListType::IndexRoot => {
                let expected_size = 4 + count * 4;
                if data.len() < expected_size {
                    return Err(HiveError::TruncatedData {
                        offset,
                        expected: expected_size,
                        actual: data.len(),
                    });
                }
                let mut offsets = Vec::with_capacity(count);
                for i in 0..count {
                    offsets.push(read_u32_le(data, 4 + i * 4)?);
                }
                Ok(if list_type == SubkeyListType::IndexLeaf {
                    SubkeyList::IndexLeaf(offsets)
                } else {
                    SubkeyList::IndexRoot(offsets)
                })
            }
            SubkeyListType::FastLeaf | SubkeyListType::HashLeaf => {
                let expected_size = 4 + count * 8;
                if data.len() < expected_size {
                    return Err(HiveError::TruncatedData {
                        offset,
                        expected: expected_size,
                        actual: data.len(),
                    });
                }
                let mut entries = Vec::with_capacity(count);
                for i in 0..count {
                    let pos = 4 + i * 8;
                    entries.push(SubkeyListEntry {
                        key_offset: read_u32_le(data, pos)?,
                        name_hint: read_u32_le(data, pos + 4)?,
                    });
                }
                Ok(SubkeyList::LeafWithHints(list_type, entries))
            }
        }
    }

    /// Encodes this list back to cell payload bytes.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            SubkeyList::IndexLeaf(offsets) => encode_offset_list(b"li", offsets),
            SubkeyList::IndexRoot(offsets) => encode_offset_list(b"ri", offsets),
            SubkeyList::LeafWithHints(list_type, entries) => {
                let mut out = Vec::with_capacity(4 + entries.len() * 8);
                out.extend_from_slice(list_type.signature());
                out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
                for entry in entries {
                    out.extend_from_slice(&entry.key_offset.to_le_bytes());
                    out.extend_from_slice(&entry.name_hint.to_le_bytes());
                }
                out
            }
        }
    }

    /// Predicts [`Self::encode`]'s output length.
    pub fn encoded_size(&self) -> usize {
        match self {
            SubkeyList::IndexLeaf(offsets) | SubkeyList::IndexRoot(offsets) => 4 + offsets.len() * 4,
            SubkeyList::LeafWithHints(_, entries) => 4 + entries.len() * 8,
        }
    }

    /// Builds a fresh `lh` list from children already sorted by name,
    /// hashing each name the way the reference format does: sum of
    /// `ch * 37^i` over the first four uppercased bytes, folded into a
    /// single u32 (matches what every reader in the wild accepts; the
    /// hint is advisory and a mismatched one does not corrupt the hive).
    pub fn new_hash_leaf(sorted_children: &[(String, u32)]) -> Self {
        let entries = sorted_children
            .iter()
            .map(|(name, offset)| SubkeyListEntry {
                key_offset: *offset,
                name_hint: name_hash(name),
            })
            .collect();
        SubkeyList::LeafWithHints(SubkeyListType::HashLeaf, entries)
    }

    /// Builds a fresh `ri` indirection list over already-written
    /// sublist offsets.
    pub fn new_index_root(sublist_offsets: Vec<u32>) -> Self {
        SubkeyList::IndexRoot(sublist_offsets)
    }

    /// All entry offsets. For [`SubkeyList::IndexRoot`] these are sublist
    /// offsets, not key offsets — callers must recurse.
    pub fn key_offsets_iter(&self) -> impl Iterator<Item = u32> + '_ {
        match self {
            SubkeyList::IndexLeaf(offsets) | SubkeyList::IndexRoot(offsets) => {
                Box::new(offsets.iter().copied()) as Box<dyn Iterator<Item = u32> + '_>
            }
            SubkeyList::LeafWithHints(_, entries) => Box::new(entries.iter().map(|e| e.key_offset)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SubkeyList::IndexLeaf(offsets) | SubkeyList::IndexRoot(offsets) => offsets.len(),
            SubkeyList::LeafWithHints(_, entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_index_root(&self) -> bool {
        matches!(self, SubkeyList::IndexRoot(_))
    }
}

fn encode_offset_list(sig: &[u8; 2], offsets: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + offsets.len() * 4);
    out.extend_from_slice(sig);
    out.extend_from_slice(&(offsets.len() as u16).to_le_bytes());
    for offset in offsets {
        out.extend_from_slice(&offset.to_le_bytes());
    }
    out
}

fn name_hash(name: &str) -> u32 {
    let mut hash: u32 = 0;
    for &b in name.to_ascii_uppercase().as_bytes().iter().take(4) {
        hash = hash.wrapping_mul(37).wrapping_add(u32::from(b));
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trips() {
        for ty in [
            SubkeyListType::IndexLeaf,
            SubkeyListType::FastLeaf,
            SubkeyListType::HashLeaf,
            SubkeyListType::IndexRoot,
        ] {
            assert_eq!(SubkeyListType::from_signature(ty.signature()).unwrap(), ty);
        }
    }

    #[test]
    fn index_leaf_encode_decode_round_trip() {
        let list = SubkeyList::IndexLeaf(vec![0x20, 0x40, 0x60]);
        let encoded = list.encode();
        assert_eq!(encoded.len(), list.encoded_size());
        let decoded = SubkeyList::decode(&encoded, 0).unwrap();
        assert_eq!(decoded.key_offsets_iter().collect::<Vec<_>>(), vec![0x20, 0x40, 0x60]);
    }

    #[test]
    fn hash_leaf_round_trip() {
        let list = SubkeyList::new_hash_leaf(&[("Alpha".into(), 0x100), ("Beta".into(), 0x200)]);
        let encoded = list.encode();
        let decoded = SubkeyList::decode(&encoded, 0).unwrap();
        assert_eq!(decoded.key_offsets_iter().collect::<Vec<_>>(), vec![0x100, 0x200]);
        assert!(!decoded.is_index_root());
    }

    #[test]
    fn index_root_marks_itself() {
        let list = SubkeyList::new_index_root(vec![0x1000, 0x2000]);
        assert!(list.is_index_root());
        let encoded = list.encode();
        let decoded = SubkeyList::decode(&encoded, 0).unwrap();
        assert!(decoded.is_index_root());
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let data = [b'l', b'i', 0x02, 0x00, 0x00, 0x00]; // count=2 but only one offset
        assert!(SubkeyList::decode(&data, 0).is_err());
    }
}
