//! Cell type tags and the record decoders for each on-disk structure.
//!
//! A cell is a variable-length allocation inside an HBIN, prefixed by a
//! signed 32-bit size (negative = allocated). This module and its
//! children decode/encode the record that lives inside a cell's payload;
//! [`crate::hbin`] handles walking the cells of one HBIN, and
//! [`crate::hive`] handles resolving a cell offset to its payload.

pub mod bigdata;
pub mod key;
pub mod security;
pub mod subkey_list;
pub mod value;

use crate::error::{HiveError, Result};

/// Identifies which on-disk record a cell's payload holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellType {
    /// `nk` — key node.
    KeyNode,
    /// `vk` — value key.
    ValueKey,
    /// `sk` — security descriptor.
    Security,
    /// `li` — index leaf (flat list of child offsets).
    IndexLeaf,
    /// `lf` — fast leaf (flat list, 4-byte name hint per entry).
    FastLeaf,
    /// `lh` — hash leaf (flat list, name-hash hint per entry).
    HashLeaf,
    /// `ri` — index root (list of further subkey-list offsets).
    IndexRoot,
    /// `db` — big-data indirection block.
    DataBlock,
}

impl CellType {
    /// Parses a cell type from its 2-byte signature.
    pub fn from_signature(sig: &[u8; 2]) -> Result<Self> {
        match sig {
            b"nk" => Ok(CellType::KeyNode),
            b"vk" => Ok(CellType::ValueKey),
            b"sk" => Ok(CellType::Security),
            b"li" => Ok(CellType::IndexLeaf),
            b"lf" => Ok(CellType::FastLeaf),
            b"lh" => Ok(CellType::HashLeaf),
            b"ri" => Ok(CellType::IndexRoot),
            b"db" => Ok(CellType::DataBlock),
            _ => Err(HiveError::unknown_cell_type(*sig, 0)),
        }
    }

    /// Returns the 2-byte on-disk signature for this cell type.
    pub fn signature(&self) -> &'static [u8; 2] {
        match self {
            CellType::KeyNode => b"nk",
            CellType::ValueKey => b"vk",
            CellType::Security => b"sk",
            CellType::IndexLeaf => b"li",
            CellType::FastLeaf => b"lf",
            CellType::HashLeaf => b"lh",
            CellType::IndexRoot => b"ri",
            CellType::DataBlock => b"db",
        }
    }

    /// True for any of the four subkey-list variants.
    pub fn is_subkey_list(&self) -> bool {
        matches!(
            self,
            CellType::IndexLeaf | CellType::FastLeaf | CellType::HashLeaf | CellType::IndexRoot
        )
    }
}

/// Flags carried on an NK record.
#[derive(Debug, Clone, Copy)]
pub struct KeyNodeFlags(pub u16);

impl KeyNodeFlags {
    /// Key is volatile and not persisted to disk.
    pub const VOLATILE: u16 = 0x0001;
    /// Key is a mount point into another hive.
    pub const HIVE_EXIT: u16 = 0x0002;
    /// Key is the hive's root key.
    pub const ROOT_KEY: u16 = 0x0004;
    /// Key cannot be deleted.
    pub const NO_DELETE: u16 = 0x0008;
    /// Key is a symbolic link.
    pub const SYM_LINK: u16 = 0x0010;
    /// Key name uses the compressed (one-byte) encoding rather than UTF-16LE.
    pub const COMP_NAME: u16 = 0x0020;
    /// Key is a predefined handle.
    pub const PREDEF_HANDLE: u16 = 0x0040;

    /// Wraps a raw flags word.
    pub fn new(flags: u16) -> Self {
        Self(flags)
    }

    /// True if `flag` is set.
    pub fn has_flag(&self, flag: u16) -> bool {
        (self.0 & flag) != 0
    }

    /// True if the name is stored in the compressed one-byte encoding.
    pub fn is_compressed(&self) -> bool {
        self.has_flag(Self::COMP_NAME)
    }

    /// True if this is the root key.
    pub fn is_root(&self) -> bool {
        self.has_flag(Self::ROOT_KEY)
    }
}

/// Registry value type tag (the `REG_*` enum).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// `REG_NONE`.
    None,
    /// `REG_SZ`.
    String,
    /// `REG_EXPAND_SZ`.
    ExpandString,
    /// `REG_BINARY`.
    Binary,
    /// `REG_DWORD` (little-endian).
    Dword,
    /// `REG_DWORD_BIG_ENDIAN`.
    DwordBigEndian,
    /// `REG_LINK`.
    Link,
    /// `REG_MULTI_SZ`.
    MultiString,
    /// `REG_RESOURCE_LIST`.
    ResourceList,
    /// `REG_FULL_RESOURCE_DESCRIPTOR`.
    FullResourceDescriptor,
    /// `REG_RESOURCE_REQUIREMENTS_LIST`.
    ResourceRequirementsList,
    /// `REG_QWORD` (little-endian).
    Qword,
    /// Any type outside 0–11. Carries the raw tag so it round-trips
    /// unchanged; this crate never recodes an unknown type to `REG_SZ`.
    Unknown(u32),
}

impl ValueType {
    /// Parses the raw 32-bit type tag stored in a VK record.
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => ValueType::None,
            1 => ValueType::String,
            2 => ValueType::ExpandString,
            3 => ValueType::Binary,
            4 => ValueType::Dword,
            5 => ValueType::DwordBigEndian,
            6 => ValueType::Link,
            7 => ValueType::MultiString,
            8 => ValueType::ResourceList,
            9 => ValueType::FullResourceDescriptor,
            10 => ValueType::ResourceRequirementsList,
            11 => ValueType::Qword,
            other => ValueType::Unknown(other),
        }
    }

    /// Returns the raw 32-bit tag to write back into a VK record.
    pub fn to_u32(self) -> u32 {
        match self {
            ValueType::None => 0,
            ValueType::String => 1,
            ValueType::ExpandString => 2,
            ValueType::Binary => 3,
            ValueType::Dword => 4,
            ValueType::DwordBigEndian => 5,
            ValueType::Link => 6,
            ValueType::MultiString => 7,
            ValueType::ResourceList => 8,
            ValueType::FullResourceDescriptor => 9,
            ValueType::ResourceRequirementsList => 10,
            ValueType::Qword => 11,
            ValueType::Unknown(raw) => raw,
        }
    }

    /// The canonical `REG_*` name, used by the `.reg` exporter's comments
    /// and by `Display`.
    pub fn name(&self) -> String {
        match self {
            ValueType::None => "REG_NONE".to_string(),
            ValueType::String => "REG_SZ".to_string(),
            ValueType::ExpandString => "REG_EXPAND_SZ".to_string(),
            ValueType::Binary => "REG_BINARY".to_string(),
            ValueType::Dword => "REG_DWORD".to_string(),
            ValueType::DwordBigEndian => "REG_DWORD_BIG_ENDIAN".to_string(),
            ValueType::Link => "REG_LINK".to_string(),
            ValueType::MultiString => "REG_MULTI_SZ".to_string(),
            ValueType::ResourceList => "REG_RESOURCE_LIST".to_string(),
            ValueType::FullResourceDescriptor => "REG_FULL_RESOURCE_DESCRIPTOR".to_string(),
            ValueType::ResourceRequirementsList => "REG_RESOURCE_REQUIREMENTS_LIST".to_string(),
            ValueType::Qword => "REG_QWORD".to_string(),
            ValueType::Unknown(raw) => format!("REG_UNKNOWN_{raw:#010x}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_type_round_trips_through_signature() {
        for ty in [
            CellType::KeyNode,
            CellType::ValueKey,
            CellType::Security,
            CellType::IndexLeaf,
            CellType::FastLeaf,
            CellType::HashLeaf,
            CellType::IndexRoot,
            CellType::DataBlock,
        ] {
            assert_eq!(CellType::from_signature(ty.signature()).unwrap(), ty);
        }
    }

    #[test]
    fn unknown_signature_is_rejected() {
        assert!(CellType::from_signature(b"XX").is_err());
    }

    #[test]
    fn key_node_flags() {
        let flags = KeyNodeFlags::new(KeyNodeFlags::COMP_NAME | KeyNodeFlags::ROOT_KEY);
        assert!(flags.is_compressed());
        assert!(flags.is_root());
        assert!(!flags.has_flag(KeyNodeFlags::VOLATILE));
    }

    #[test]
    fn value_type_round_trips_through_u32() {
        for raw in 0..=11u32 {
            let ty = ValueType::from_u32(raw);
            assert_eq!(ty.to_u32(), raw);
        }
        let unknown = ValueType::from_u32(0xBEEF);
        assert_eq!(unknown, ValueType::Unknown(0xBEEF));
        assert_eq!(unknown.to_u32(), 0xBEEF);
    }
}
