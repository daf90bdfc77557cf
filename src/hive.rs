//! Hive reader: opens a `regf` file (or an in-memory buffer) and
//! resolves cell offsets to key nodes, values, and their data.
//!
//! Every key and value is addressed by its cell offset, wrapped in
//! [`NodeId`]/[`ValueId`] so callers never hand a raw `u32` around by
//! mistake. Key nodes are cached once parsed; the cache uses an
//! `RwLock` so lookups stay `&self`.

use crate::cell::bigdata::{self, BigDataHeader};
use crate::cell::key::{KeyNode, NO_OFFSET};
use crate::cell::security::{SecurityArena, SecurityKey};
use crate::cell::subkey_list::SubkeyList;
use crate::cell::value::{ValueData, ValueKey};
use crate::error::{HiveError, Result};
use crate::header::{BaseBlock, BASE_BLOCK_SIZE};
use crate::utils::cell_offset_to_absolute;
use memmap2::Mmap;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, instrument};

/// Controls how tolerant the reader is of structurally-inconsistent
/// hives (bad checksums, short big-data concatenations). Forensic tools
/// scanning damaged hives want [`OpenMode::Tolerant`]; anything writing
/// the result back out should use [`OpenMode::Strict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Strict,
    Tolerant,
}

/// Opaque handle to a key node, identified by its cell offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

/// Opaque handle to a value key, identified by its cell offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(pub u32);

/// A subset of a key node's fields, returned by [`Hive::stat_key`] so
/// callers don't need to know about [`KeyNode`]'s on-disk layout.
#[derive(Debug, Clone)]
pub struct KeyStat {
    pub name: String,
    pub subkey_count: u32,
    pub value_count: u32,
    pub last_written: u64,
    pub is_root: bool,
}

/// A subset of a value key's fields, returned by [`Hive::stat_value`].
#[derive(Debug, Clone)]
pub struct ValueStat {
    pub name: String,
    pub data_type: crate::cell::ValueType,
    pub data_length: u32,
}

#[derive(Debug)]
enum HiveData {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl HiveData {
    fn as_slice(&self) -> &[u8] {
        match self {
            HiveData::Mapped(mmap) => mmap,
            HiveData::Owned(data) => data,
        }
    }
}

/// An opened hive. Reads are zero-copy against the backing buffer;
/// parsed key nodes are cached by offset.
#[derive(Debug)]
pub struct Hive {
    data: HiveData,
    base_block: BaseBlock,
    mode: OpenMode,
    key_cache: RwLock<HashMap<u32, Arc<KeyNode>>>,
}

impl Hive {
    /// Opens a hive file from disk via memory-mapped I/O.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Self> {
        info!("opening registry hive");
        let file = File::open(&path)?;
        let file_size = file.metadata()?.len() as usize;
        if file_size < BASE_BLOCK_SIZE {
            return Err(HiveError::HiveTooSmall {
                size: file_size,
                minimum: BASE_BLOCK_SIZE,
            });
        }
        // SAFETY: the file is opened read-only and kept alive by the mmap;
        // every access is bounds-checked by `read_cell`.
        let mmap = unsafe { Mmap::map(&file)? };
        debug!(size = mmap.len(), "memory-mapped hive file");
        Self::from_data(HiveData::Mapped(mmap), mode)
    }

    /// Opens a hive from an in-memory buffer (already-loaded bytes, or
    /// bytes produced by [`crate::serializer`]).
    pub fn from_bytes(data: Vec<u8>, mode: OpenMode) -> Result<Self> {
        Self::from_data(HiveData::Owned(data), mode)
    }

    fn from_data(data: HiveData, mode: OpenMode) -> Result<Self> {
        let strict = mode == OpenMode::Strict;
        let base_block = BaseBlock::decode(data.as_slice(), strict)?;
        Ok(Self {
            data,
            base_block,
            mode,
            key_cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn base_block(&self) -> &BaseBlock {
        &self.base_block
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    fn strict(&self) -> bool {
        self.mode == OpenMode::Strict
    }

    /// The hive's root key.
    pub fn root(&self) -> Result<NodeId> {
        Ok(NodeId(self.base_block.root_cell_offset))
    }

    /// Reads a cell's payload bytes (size prefix stripped) at `offset`.
    pub(crate) fn read_cell(&self, offset: u32) -> Result<&[u8]> {
        let abs_offset = cell_offset_to_absolute(offset)? as usize;
        let data = self.data.as_slice();
        if abs_offset + 4 > data.len() {
            return Err(HiveError::invalid_offset(offset, data.len()));
        }
        let size = i32::from_le_bytes(data[abs_offset..abs_offset + 4].try_into().unwrap());
        let abs_size = size.unsigned_abs() as usize;
        if abs_size < 4 {
            return Err(HiveError::invalid_cell_size(size, offset));
        }
        let data_start = abs_offset + 4;
        let data_end = abs_offset + abs_size;
        if data_end > data.len() {
            return Err(HiveError::TruncatedData {
                offset,
                expected: abs_size,
                actual: data.len() - abs_offset,
            });
        }
        Ok(&data[data_start..data_end])
    }

    fn key_node(&self, id: NodeId) -> Result<Arc<KeyNode>> {
        if let Some(node) = self.key_cache.read().expect("key cache lock poisoned").get(&id.0) {
            return Ok(node.clone());
        }
        let cell = self.read_cell(id.0)?;
        let node = Arc::new(KeyNode::decode(cell, id.0)?);
        self.key_cache
            .write()
            .expect("key cache lock poisoned")
            .insert(id.0, node.clone());
        Ok(node)
    }

    /// Summary fields of the key at `id`.
    pub fn stat_key(&self, id: NodeId) -> Result<KeyStat> {
        let node = self.key_node(id)?;
        Ok(KeyStat {
            name: node.name.clone(),
            subkey_count: node.subkey_count,
            value_count: node.value_count,
            last_written: node.last_written,
            is_root: node.is_root(),
        })
    }

    /// Direct children of `id`, in on-disk subkey-list order (already
    /// sorted by name on a well-formed hive).
    pub fn subkeys(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let node = self.key_node(id)?;
        if !node.has_subkeys() || node.subkey_list_offset == NO_OFFSET {
            return Ok(Vec::new());
        }
        let mut offsets = Vec::new();
        self.collect_subkey_offsets(node.subkey_list_offset, &mut offsets)?;
        Ok(offsets.into_iter().map(NodeId).collect())
    }

    fn collect_subkey_offsets(&self, list_offset: u32, out: &mut Vec<u32>) -> Result<()> {
        if list_offset == NO_OFFSET {
            return Ok(());
        }
        let cell = self.read_cell(list_offset)?;
        let list = SubkeyList::decode(cell, list_offset)?;
        if list.is_index_root() {
            for sublist_offset in list.key_offsets_iter() {
                self.collect_subkey_offsets(sublist_offset, out)?;
            }
        } else {
            out.extend(list.key_offsets_iter());
        }
        Ok(())
    }

    /// Looks up a direct child of `id` by name (case-insensitive ASCII
    /// compare, matching every other name lookup in this crate).
    pub fn get_child(&self, id: NodeId, name: &str) -> Result<NodeId> {
        for child in self.subkeys(id)? {
            if self.stat_key(child)?.name.eq_ignore_ascii_case(name) {
                return Ok(child);
            }
        }
        Err(HiveError::not_found("key", name))
    }

    /// Walks up the parent chain. The root key has no parent, so this
    /// returns `HiveError::NotFound` for it rather than an `Option`.
    pub fn parent(&self, id: NodeId) -> Result<NodeId> {
        let node = self.key_node(id)?;
        if node.is_root() || node.parent_offset == NO_OFFSET {
            return Err(HiveError::not_found("parent of root key", &id.0.to_string()));
        }
        Ok(NodeId(node.parent_offset))
    }

    /// Values directly on the key at `id`.
    pub fn values(&self, id: NodeId) -> Result<Vec<ValueId>> {
        let node = self.key_node(id)?;
        if !node.has_values() || node.value_list_offset == NO_OFFSET {
            return Ok(Vec::new());
        }
        let list_data = self.read_cell(node.value_list_offset)?;
        let count = node.value_count as usize;
        if list_data.len() < count * 4 {
            return Err(HiveError::TruncatedData {
                offset: node.value_list_offset,
                expected: count * 4,
                actual: list_data.len(),
            });
        }
        let mut values = Vec::with_capacity(count);
        for i in 0..count {
            let offset = u32::from_le_bytes(list_data[i * 4..i * 4 + 4].try_into().unwrap());
            values.push(ValueId(offset));
        }
        Ok(values)
    }

    /// Looks up a value of `id` by name (empty string selects the
    /// default value).
    pub fn get_value(&self, id: NodeId, name: &str) -> Result<ValueId> {
        for value in self.values(id)? {
            if self.stat_value(value)?.name.eq_ignore_ascii_case(name) {
                return Ok(value);
            }
        }
        Err(HiveError::not_found("value", name))
    }

    fn value_key(&self, id: ValueId) -> Result<ValueKey> {
        let cell = self.read_cell(id.0)?;
        ValueKey::decode(cell, id.0)
    }

    /// Summary fields of the value at `id`.
    pub fn stat_value(&self, id: ValueId) -> Result<ValueStat> {
        let vk = self.value_key(id)?;
        Ok(ValueStat {
            name: vk.name,
            data_type: vk.data_type,
            data_length: vk.data_length,
        })
    }

    /// Raw data bytes of the value at `id`, following big-data
    /// indirection transparently.
    pub fn value_bytes(&self, id: ValueId) -> Result<Vec<u8>> {
        let vk = self.value_key(id)?;
        if vk.is_inline {
            return Ok(vk.inline_bytes());
        }
        if vk.data_length == 0 || vk.data_offset == NO_OFFSET {
            return Ok(Vec::new());
        }
        if vk.data_length as usize > bigdata::SEGMENT_SIZE {
            return self.read_big_data(vk.data_offset, vk.data_length);
        }
        Ok(self.read_cell(vk.data_offset)?.to_vec())
    }

    /// Typed payload of the value at `id`.
    pub fn value_data(&self, id: ValueId) -> Result<ValueData> {
        let vk = self.value_key(id)?;
        let bytes = self.value_bytes(id)?;
        ValueData::decode(&bytes, vk.data_type, id.0)
    }

    fn read_big_data(&self, offset: u32, declared_length: u32) -> Result<Vec<u8>> {
        let header_cell = self.read_cell(offset)?;
        let header = BigDataHeader::decode(header_cell, offset)?;
        let list_cell = self.read_cell(header.segment_list_offset)?;
        let segment_offsets =
            bigdata::decode_segment_table(list_cell, header.segment_count, header.segment_list_offset)?;

        let mut segments = Vec::with_capacity(segment_offsets.len());
        for segment_offset in &segment_offsets {
            segments.push(self.read_cell(*segment_offset)?);
        }
        bigdata::concatenate_segments(&segments, declared_length as usize, offset, self.strict())
    }

    /// Parses the security descriptor attached to a key, if any.
    pub fn security(&self, id: NodeId) -> Result<Option<SecurityKey>> {
        let node = self.key_node(id)?;
        if node.security_offset == NO_OFFSET {
            return Ok(None);
        }
        let cell = self.read_cell(node.security_offset)?;
        Ok(Some(SecurityKey::decode(cell, node.security_offset)?))
    }

    /// Builds an arena of every SK record reachable from `start_offset`
    /// by following the ring's forward links once around. Used by the
    /// full-rewrite serializer, which needs every descriptor up front
    /// rather than one key's worth at a time.
    pub fn collect_security_ring(&self, start_offset: u32) -> Result<SecurityArena> {
        let mut arena = SecurityArena::new();
        if start_offset == NO_OFFSET {
            return Ok(arena);
        }
        let mut offset = start_offset;
        loop {
            if arena.get(offset).is_some() {
                break;
            }
            let cell = self.read_cell(offset)?;
            let key = SecurityKey::decode(cell, offset)?;
            let next = key.forward_link;
            arena.insert(offset, key);
            if next == start_offset || next == offset {
                break;
            }
            offset = next;
        }
        Ok(arena)
    }

    /// Depth-first preorder walk starting at `id`, calling `visitor` with
    /// each node's id and depth (root is depth 0). Stops at the first
    /// error the visitor or the traversal itself produces.
    pub fn walk(&self, id: NodeId, visitor: &mut dyn FnMut(NodeId, usize) -> Result<()>) -> Result<()> {
        self.walk_inner(id, 0, visitor)
    }

    fn walk_inner(&self, id: NodeId, depth: usize, visitor: &mut dyn FnMut(NodeId, usize) -> Result<()>) -> Result<()> {
        visitor(id, depth)?;
        for child in self.subkeys(id)? {
            self.walk_inner(child, depth + 1, visitor)?;
        }
        Ok(())
    }

    /// Returns a copy of the full underlying buffer, e.g. for the
    /// incremental serializer to splice unchanged regions out of.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.data.as_slice().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_rejects_truncated_buffer() {
        let data = vec![0u8; 100];
        assert!(matches!(
            Hive::from_bytes(data, OpenMode::Strict).unwrap_err(),
            HiveError::HiveTooSmall { .. }
        ));
    }

    #[test]
    fn open_rejects_bad_signature() {
        let data = vec![0u8; BASE_BLOCK_SIZE];
        assert!(Hive::from_bytes(data, OpenMode::Strict).is_err());
    }
}
