//! Writes an [`ast::Tree`] back out as `regf` bytes.
//!
//! [`serialize_full`] rewrites every cell from scratch; [`serialize_incremental`]
//! starts from a base hive's bytes and only allocates fresh cells for
//! dirty subtrees, patching existing NK records in place where a dirty
//! node still lives at its original offset. Both share [`CellArena`] for
//! hive-bin bump allocation.

use crate::ast::{Node, Tree, Value};
use crate::cell::bigdata::{self, BigDataHeader};
use crate::cell::key::{KeyNode, NO_OFFSET};
use crate::cell::subkey_list::SubkeyList;
use crate::cell::value::ValueKey;
use crate::cell::KeyNodeFlags;
use crate::error::Result;
use crate::hbin::{self, HBIN_HEADER_SIZE};
use crate::header::BaseBlock;
use crate::hive::Hive;
use tracing::{debug, instrument};

/// Hbins grow up to this size (including their header) before a new one
/// is opened, matching spec §4.D's "1 MiB typical cap".
const MAX_HBIN_TOTAL: u32 = 1 << 20;
const HBIN_ALIGNMENT: u32 = 0x1000;

fn align8(n: usize) -> usize {
    (n + 7) & !7
}

/// Bump allocator over a single growing buffer that holds the hive's
/// "hive bins data" region (everything after the 4 KiB base block).
/// Because the buffer is only ever appended to, an allocated cell's
/// position within it is exactly its on-disk cell offset — no separate
/// translation table is needed.
struct CellArena {
    buf: Vec<u8>,
    current_hbin_start: u32,
    timestamp: u64,
}

impl CellArena {
    /// Starts a fresh arena (for a full rewrite).
    fn new(timestamp: u64) -> Self {
        let mut arena = CellArena {
            buf: Vec::new(),
            current_hbin_start: 0,
            timestamp,
        };
        arena.open_hbin(0);
        arena
    }

    /// Starts an arena whose buffer already holds `existing`, the base
    /// hive's full hive-bins-data region; new cells are appended after
    /// it in fresh hbins (for an incremental rewrite).
    fn resume(existing: Vec<u8>, timestamp: u64) -> Self {
        let start = existing.len() as u32;
        let mut arena = CellArena {
            buf: existing,
            current_hbin_start: start,
            timestamp,
        };
        arena.open_hbin(start);
        arena
    }

    fn open_hbin(&mut self, offset: u32) {
        self.current_hbin_start = offset;
        self.buf.extend_from_slice(&[0u8; HBIN_HEADER_SIZE]);
    }

    fn close_current_hbin(&mut self) {
        let data_len = self.buf.len() as u32 - self.current_hbin_start - HBIN_HEADER_SIZE as u32;
        let min_total = HBIN_HEADER_SIZE as u32 + data_len;
        // Reserve at least 4 bytes for the trailing free cell's size prefix.
        let target_total = ((min_total + 4 + HBIN_ALIGNMENT - 1) / HBIN_ALIGNMENT) * HBIN_ALIGNMENT;
        let remainder = target_total - min_total;
        self.buf
            .extend_from_slice(&hbin::encode_cell_size(remainder as usize - 4, false));
        self.buf.resize(self.buf.len() + remainder as usize - 4, 0);

        let header = hbin::new_header(self.current_hbin_start, target_total, self.timestamp);
        let header_bytes = header.encode();
        let start = self.current_hbin_start as usize;
        self.buf[start..start + HBIN_HEADER_SIZE].copy_from_slice(&header_bytes);
    }

    /// Allocates a new cell holding `payload`, opening a fresh hbin first
    /// if it wouldn't fit under [`MAX_HBIN_TOTAL`]. Returns the cell's
    /// offset (relative to the hive-bins-data region).
    fn alloc(&mut self, payload: &[u8]) -> u32 {
        let size_needed = align8(payload.len() + 4).max(8);
        let would_be_total =
            self.buf.len() as u32 + size_needed as u32 - self.current_hbin_start;
        if would_be_total > MAX_HBIN_TOTAL {
            self.close_current_hbin();
            self.open_hbin(self.buf.len() as u32);
        }
        let offset = self.buf.len() as u32;
        self.buf
            .extend_from_slice(&hbin::encode_cell_size(size_needed - 4, true));
        self.buf.extend_from_slice(payload);
        self.buf.resize(self.buf.len() + size_needed - 4 - payload.len(), 0);
        offset
    }

    /// Overwrites an already-allocated cell's payload bytes in place.
    /// `payload` must be exactly as long as what originally occupied
    /// that position (true for every patch this module performs, since
    /// none of them change a record's name).
    fn patch(&mut self, cell_offset: u32, payload: &[u8]) {
        let start = cell_offset as usize + 4;
        self.buf[start..start + payload.len()].copy_from_slice(payload);
    }

    fn finish(mut self) -> Vec<u8> {
        self.close_current_hbin();
        self.buf
    }
}

fn sorted_child_indices(children: &[Node]) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..children.len()).collect();
    idx.sort_by(|&a, &b| children[a].name().to_ascii_uppercase().cmp(&children[b].name().to_ascii_uppercase()));
    idx
}

/// Builds the subkey-list cell(s) for `children` (already offset),
/// returning the list's own cell offset, or [`NO_OFFSET`] if empty.
fn write_subkey_list(arena: &mut CellArena, children: &[(String, u32)]) -> u32 {
    if children.is_empty() {
        return NO_OFFSET;
    }
    const MAX_FLAT_LIST: usize = 1024;
    if children.len() <= MAX_FLAT_LIST {
        let list = SubkeyList::new_hash_leaf(children);
        arena.alloc(&list.encode())
    } else {
        let mut root_offsets = Vec::new();
        for chunk in children.chunks(MAX_FLAT_LIST) {
            let list = SubkeyList::new_hash_leaf(chunk);
            root_offsets.push(arena.alloc(&list.encode()));
        }
        let root = SubkeyList::new_index_root(root_offsets);
        arena.alloc(&root.encode())
    }
}

/// Writes a value's VK record plus its data cell (or inline datum),
/// returning the VK's own cell offset. Payloads over `SEGMENT_SIZE`
/// bytes are split into a `db` big-data chain rather than one oversized
/// cell, matching what [`crate::hive::Hive::value_bytes`] expects to
/// find at that offset.
fn write_value(arena: &mut CellArena, value: &mut Value) -> Result<u32> {
    let data = value.data()?;
    let bytes = data.encode();
    let vk = if bytes.len() <= 4 {
        ValueKey::new_inline(value.name(), value.value_type(), &bytes)
    } else if bytes.len() > bigdata::SEGMENT_SIZE {
        let data_offset = write_big_data(arena, &bytes);
        ValueKey::new_out_of_line(value.name(), value.value_type(), bytes.len() as u32, data_offset)
    } else {
        let data_offset = arena.alloc(&bytes);
        ValueKey::new_out_of_line(value.name(), value.value_type(), bytes.len() as u32, data_offset)
    };
    Ok(arena.alloc(&vk.encode()))
}

/// Writes `bytes` as a chain of plain data-cell segments plus the
/// segment-offset table and `db` header that index them, returning the
/// header cell's offset (what the VK's `data_offset` points at).
fn write_big_data(arena: &mut CellArena, bytes: &[u8]) -> u32 {
    let segments = bigdata::split_into_segments(bytes);
    let segment_offsets: Vec<u32> = segments.iter().map(|segment| arena.alloc(segment)).collect();
    let table_offset = arena.alloc(&bigdata::encode_segment_table(&segment_offsets));
    let header = BigDataHeader {
        segment_count: segment_offsets.len() as u16,
        segment_list_offset: table_offset,
    };
    arena.alloc(&header.encode())
}

fn write_value_list(arena: &mut CellArena, values: &mut [Value]) -> Result<u32> {
    if values.is_empty() {
        return Ok(NO_OFFSET);
    }
    let mut offsets = Vec::with_capacity(values.len());
    for value in values.iter_mut() {
        offsets.push(write_value(arena, value)?);
    }
    let mut payload = Vec::with_capacity(offsets.len() * 4);
    for offset in &offsets {
        payload.extend_from_slice(&offset.to_le_bytes());
    }
    Ok(arena.alloc(&payload))
}

/// Recursively allocates a fresh NK cell (and everything beneath it) for
/// `node`, used by full rewrite and for brand-new incremental subtrees.
fn write_node_fresh(arena: &mut CellArena, node: &mut Node, parent_offset: u32, is_root: bool) -> Result<u32> {
    let value_count = node.values_for_write()?.len() as u32;
    let value_list_offset = write_value_list(arena, node.values_for_write()?)?;

    let child_indices = sorted_child_indices(node.children_for_write()?);
    let placeholder = KeyNode::new_empty(node.name(), parent_offset, node.last_written());
    let nk_offset = arena.alloc(&placeholder.encode());

    let mut child_offsets = Vec::with_capacity(child_indices.len());
    for idx in child_indices {
        let name = node.children_for_write()?[idx].name().to_string();
        let child_offset = write_node_fresh(arena, &mut node.children_for_write()?[idx], nk_offset, false)?;
        child_offsets.push((name, child_offset));
    }
    let subkey_list_offset = write_subkey_list(arena, &child_offsets);

    let mut key = KeyNode::new_empty(node.name(), parent_offset, node.last_written());
    key.subkey_count = child_offsets.len() as u32;
    key.subkey_list_offset = subkey_list_offset;
    key.value_count = value_count;
    key.value_list_offset = value_list_offset;
    if is_root {
        key.flags = KeyNodeFlags::new(KeyNodeFlags::ROOT_KEY);
    }
    arena.patch(nk_offset, &key.encode());
    debug!(offset = nk_offset, children = child_offsets.len(), "wrote key node");
    Ok(nk_offset)
}

/// Full rewrite: every cell is freshly allocated in preorder, children in
/// name order, values before children (spec §4.D determinism rule).
#[instrument(skip(tree))]
pub fn serialize_full(tree: &mut Tree, timestamp: u64) -> Result<Vec<u8>> {
    let mut arena = CellArena::new(timestamp);
    let root_offset = write_node_fresh(&mut arena, tree.root_mut(), NO_OFFSET, true)?;
    let hive_bins_data = arena.finish();

    let base = BaseBlock {
        primary_sequence: 1,
        secondary_sequence: 1,
        last_written: timestamp,
        major_version: 1,
        minor_version: 5,
        file_type: 0,
        file_format: 1,
        root_cell_offset: root_offset,
        hive_bins_data_size: hive_bins_data.len() as u32,
        clustering_factor: 1,
        file_name: String::new(),
        checksum: 0,
    };
    let mut out = base.encode();
    out.extend_from_slice(&hive_bins_data);
    Ok(out)
}

/// Recursively handles one node during an incremental rewrite: unchanged
/// nodes are left untouched at their original offset (without even
/// materializing them), dirty-but-pre-existing nodes are patched in
/// place, and brand-new nodes get fresh cells.
fn write_node_incremental(arena: &mut CellArena, node: &mut Node, parent_offset: u32, is_root: bool) -> Result<u32> {
    match node.origin_offset() {
        Some(offset) if !node.is_dirty() => Ok(offset),
        Some(offset) => {
            let value_count = node.values_for_write()?.len() as u32;
            let value_list_offset = write_value_list(arena, node.values_for_write()?)?;

            let child_indices = sorted_child_indices(node.children_for_write()?);
            let mut child_offsets = Vec::with_capacity(child_indices.len());
            for idx in child_indices {
                let name = node.children_for_write()?[idx].name().to_string();
                let child_offset =
                    write_node_incremental(arena, &mut node.children_for_write()?[idx], offset, false)?;
                child_offsets.push((name, child_offset));
            }
            let subkey_list_offset = write_subkey_list(arena, &child_offsets);

            let mut key = KeyNode::new_empty(node.name(), parent_offset, node.last_written());
            key.subkey_count = child_offsets.len() as u32;
            key.subkey_list_offset = subkey_list_offset;
            key.value_count = value_count;
            key.value_list_offset = value_list_offset;
            if is_root {
                key.flags = KeyNodeFlags::new(KeyNodeFlags::ROOT_KEY);
            }
            arena.patch(offset, &key.encode());
            Ok(offset)
        }
        None => write_node_fresh(arena, node, parent_offset, is_root),
    }
}

/// Incremental rewrite: starts from `base`'s bytes, reusing every
/// unchanged cell at its original offset, and only allocates fresh hbin
/// space for dirty subtrees and brand-new nodes.
#[instrument(skip(tree, base))]
pub fn serialize_incremental(tree: &mut Tree, base: &Hive, timestamp: u64) -> Result<Vec<u8>> {
    let base_bytes = base.to_bytes();
    let hive_bins_data = base_bytes[crate::header::BASE_BLOCK_SIZE..].to_vec();
    let mut arena = CellArena::resume(hive_bins_data, timestamp);

    let root_is_fresh = tree.root().origin_offset().is_none();
    let root_offset = if root_is_fresh {
        write_node_fresh(&mut arena, tree.root_mut(), NO_OFFSET, true)?
    } else {
        write_node_incremental(&mut arena, tree.root_mut(), NO_OFFSET, true)?
    };

    let hive_bins_data = arena.finish();
    let mut base_block = base.base_block().clone();
    base_block.bump_sequence();
    base_block.root_cell_offset = root_offset;
    base_block.hive_bins_data_size = hive_bins_data.len() as u32;
    base_block.last_written = timestamp;

    let mut out = base_block.encode();
    out.extend_from_slice(&hive_bins_data);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Tree;
    use crate::cell::value::ValueData;
    use crate::hive::OpenMode;

    #[test]
    fn full_rewrite_of_empty_tree_opens_as_a_hive() {
        let mut tree = Tree::new_empty();
        let bytes = serialize_full(&mut tree, 0).unwrap();
        let hive = Hive::from_bytes(bytes, OpenMode::Strict).unwrap();
        let root = hive.root().unwrap();
        assert_eq!(hive.stat_key(root).unwrap().subkey_count, 0);
    }

    #[test]
    fn full_rewrite_round_trips_keys_and_values() {
        let mut tree = Tree::new_empty();
        tree.create_key("Software\\Test").unwrap();
        tree.set_value("Software\\Test", "Count", ValueData::Dword(42))
            .unwrap();
        tree.set_value("Software\\Test", "", ValueData::String("hi".into()))
            .unwrap();

        let bytes = serialize_full(&mut tree, 0).unwrap();
        let hive = Hive::from_bytes(bytes, OpenMode::Strict).unwrap();
        let root = hive.root().unwrap();
        let software = hive.get_child(root, "Software").unwrap();
        let test = hive.get_child(software, "Test").unwrap();
        let count = hive.get_value(test, "Count").unwrap();
        assert_eq!(hive.value_data(count).unwrap(), ValueData::Dword(42));
        let default = hive.get_value(test, "").unwrap();
        assert_eq!(hive.value_data(default).unwrap(), ValueData::String("hi".into()));
    }

    #[test]
    fn large_value_round_trips_through_big_data() {
        let mut tree = Tree::new_empty();
        tree.create_key("A").unwrap();
        // Comfortably over bigdata::SEGMENT_SIZE (16,344 bytes) so this
        // actually exercises the db chain, spanning three segments.
        let big: Vec<u8> = (0..(bigdata::SEGMENT_SIZE * 2 + 5_000)).map(|i| (i % 251) as u8).collect();
        tree.set_value("A", "Blob", ValueData::Binary(big.clone())).unwrap();

        let bytes = serialize_full(&mut tree, 0).unwrap();
        let hive = Hive::from_bytes(bytes, OpenMode::Strict).unwrap();
        let root = hive.root().unwrap();
        let a = hive.get_child(root, "A").unwrap();
        let blob = hive.get_value(a, "Blob").unwrap();
        assert_eq!(hive.value_bytes(blob).unwrap(), big);
    }

    #[test]
    fn incremental_rewrite_reuses_unchanged_offsets_and_adds_new_key() {
        let mut tree = Tree::new_empty();
        tree.create_key("Keep\\Me").unwrap();
        let first_pass = serialize_full(&mut tree, 0).unwrap();

        let seed_hive = Hive::from_bytes(first_pass.clone(), OpenMode::Strict).unwrap();
        let root_id = seed_hive.root().unwrap();
        let original_keep_offset = seed_hive.get_child(root_id, "Keep").unwrap().0;

        let mut reopened = Tree::from_hive(std::sync::Arc::new(seed_hive), root_id).unwrap();
        reopened.create_key("Brand\\New").unwrap();

        let base_hive = Hive::from_bytes(first_pass, OpenMode::Strict).unwrap();
        let incremental_bytes = serialize_incremental(&mut reopened, &base_hive, 1).unwrap();

        let result = Hive::from_bytes(incremental_bytes, OpenMode::Strict).unwrap();
        let root = result.root().unwrap();
        let keep = result.get_child(root, "Keep").unwrap();
        assert_eq!(keep.0, original_keep_offset);
        assert!(result.get_child(keep, "Me").is_ok());
        let brand = result.get_child(root, "Brand").unwrap();
        assert!(result.get_child(brand, "New").is_ok());
    }
}
