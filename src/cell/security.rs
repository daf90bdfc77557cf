//! `sk` (security descriptor) decode/encode.
//!
//! SK records form a doubly-linked ring per hive: `forward_link` and
//! `back_link` chain every SK together so the last entry's forward link
//! points back to the first. Multiple NKs reference the same SK cell via
//! `reference_count`. Ownership-based data structures don't model a ring
//! well, so the hive reader keeps SKs in a [`SecurityArena`] indexed by
//! their original cell offset rather than as a linked object graph.

use crate::error::{HiveError, Result};
use crate::utils::read_u32_le;
use std::collections::HashMap;

const FIXED_SIZE: usize = 20;

/// Decoded `sk` record. Security descriptors themselves are treated as
/// opaque bytes — this crate passes them through unexamined.
#[derive(Debug, Clone)]
pub struct SecurityKey {
    pub forward_link: u32,
    pub back_link: u32,
    pub reference_count: u32,
    pub descriptor: Vec<u8>,
}

impl SecurityKey {
    /// Decodes an `sk` record from cell payload bytes.
    pub fn decode(data: &[u8], offset: u32) -> Result<Self> {
        if data.len() < FIXED_SIZE {
            return Err(HiveError::TruncatedData {
                offset,
                expected: FIXED_SIZE,
                actual: data.len(),
            });
        }
        if &data[0..2] != b"sk" {
            return Err(HiveError::invalid_signature(b"sk", &data[0..2]));
        }
        // bytes 0x02..0x04 are reserved/unused
        let forward_link = read_u32_le(data, 0x04)?;
        let back_link = read_u32_le(data, 0x08)?;
        let reference_count = read_u32_le(data, 0x0C)?;
        let descriptor_size = read_u32_le(data, 0x10)? as usize;
        let descriptor_end = FIXED_SIZE + descriptor_size;
        if descriptor_end > data.len() {
            return Err(HiveError::TruncatedData {
                offset,
                expected: descriptor_end,
                actual: data.len(),
            });
        }
        Ok(SecurityKey {
            forward_link,
            back_link,
            reference_count,
            descriptor: data[FIXED_SIZE..descriptor_end].to_vec(),
        })
    }

    /// Encodes this record back to cell payload bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FIXED_SIZE + self.descriptor.len());
        out.extend_from_slice(b"sk");
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&self.forward_link.to_le_bytes());
        out.extend_from_slice(&self.back_link.to_le_bytes());
        out.extend_from_slice(&self.reference_count.to_le_bytes());
        out.extend_from_slice(&(self.descriptor.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.descriptor);
        out
    }

    pub fn encoded_size(&self) -> usize {
        FIXED_SIZE + self.descriptor.len()
    }
}

/// Newtype index into a [`SecurityArena`]. NKs carry this instead of a
/// raw offset or a pointer, matching the spec's arena-based approach to
/// the SK ring's cyclic references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SecurityId(pub u32);

/// All SK records belonging to one hive, keyed by their original cell
/// offset. Built once while the hive is opened; the serializer walks it
/// to re-emit the ring, relinking forward/back offsets to their new
/// on-disk positions.
#[derive(Debug, Clone, Default)]
pub struct SecurityArena {
    by_offset: HashMap<u32, SecurityKey>,
}

impl SecurityArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the SK at `offset`.
    pub fn insert(&mut self, offset: u32, key: SecurityKey) {
        self.by_offset.insert(offset, key);
    }

    pub fn get(&self, offset: u32) -> Option<&SecurityKey> {
        self.by_offset.get(&offset)
    }

    pub fn get_mut(&mut self, offset: u32) -> Option<&mut SecurityKey> {
        self.by_offset.get_mut(&offset)
    }

    pub fn len(&self) -> usize {
        self.by_offset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_offset.is_empty()
    }

    /// Iterates `(original_offset, record)` pairs in unspecified order;
    /// the serializer sorts by original offset before re-emitting so the
    /// ring order is deterministic across successive saves.
    pub fn iter(&self) -> impl Iterator<Item = (&u32, &SecurityKey)> {
        self.by_offset.iter()
    }

    /// Increments the reference count for the SK at `offset`, used when
    /// a newly-created key attaches to an existing descriptor instead of
    /// allocating its own.
    pub fn add_reference(&mut self, offset: u32) -> Result<()> {
        let key = self
            .by_offset
            .get_mut(&offset)
            .ok_or_else(|| HiveError::not_found("security descriptor", &format!("{offset:#x}")))?;
        key.reference_count += 1;
        Ok(())
    }

    /// Decrements the reference count, returning the new count. Callers
    /// drop the SK entirely once it reaches zero.
    pub fn release_reference(&mut self, offset: u32) -> Result<u32> {
        let key = self
            .by_offset
            .get_mut(&offset)
            .ok_or_else(|| HiveError::not_found("security descriptor", &format!("{offset:#x}")))?;
        key.reference_count = key.reference_count.saturating_sub(1);
        Ok(key.reference_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SecurityKey {
        SecurityKey {
            forward_link: 0x20,
            back_link: 0x20,
            reference_count: 1,
            descriptor: vec![0xDE, 0xAD, 0xBE, 0xEF],
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let key = sample();
        let encoded = key.encode();
        assert_eq!(encoded.len(), key.encoded_size());
        let decoded = SecurityKey::decode(&encoded, 0).unwrap();
        assert_eq!(decoded.forward_link, 0x20);
        assert_eq!(decoded.descriptor, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut data = vec![0u8; FIXED_SIZE];
        data[0..2].copy_from_slice(b"XX");
        assert!(SecurityKey::decode(&data, 0).is_err());
    }

    #[test]
    fn arena_tracks_references() {
        let mut arena = SecurityArena::new();
        arena.insert(0x20, sample());
        arena.add_reference(0x20).unwrap();
        assert_eq!(arena.get(0x20).unwrap().reference_count, 2);
        let remaining = arena.release_reference(0x20).unwrap();
        assert_eq!(remaining, 1);
    }

    #[test]
    fn arena_reference_on_missing_offset_errors() {
        let mut arena = SecurityArena::new();
        assert!(arena.add_reference(0x99).is_err());
    }
}
