use std::cmp::Ordering;

use byteorder::{ByteOrder, NativeEndian};

use crate::disk::SECTOR_SIZE;
use crate::error::{Error, Result};

/// Offset of the key array within a node sector; bytes 0 and 1 hold the
/// interior flag and the key count.
const KEY_ARRAY_OFFSET: usize = 2;
/// Per-node overhead: the two flag bytes plus the one trailing LBA slot that
/// exceeds the key count.
const NODE_OVERHEAD: usize = 6;
const LBA_WIDTH: usize = 4;

/// Node geometry derived from the configured key size.
///
/// `max_keys` is the on-disk per-node key capacity (`MAXKEY`). The in-memory
/// node carries one spare key slot and one spare LBA slot beyond it so an
/// insert can shift and write unconditionally before the overflow check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    key_size: usize,
    max_keys: usize,
}

impl Layout {
    /// Derives the geometry for `key_size`-byte keys.
    ///
    /// Sizes whose nodes could not hold at least two keys are rejected: a
    /// split must leave both halves within capacity.
    pub fn for_key_size(key_size: u32) -> Result<Self> {
        let size = key_size as usize;
        if size == 0 {
            return Err(Error::InvalidKeySize(key_size));
        }
        let max_keys = (SECTOR_SIZE - NODE_OVERHEAD) / (size + LBA_WIDTH);
        if max_keys < 2 {
            return Err(Error::InvalidKeySize(key_size));
        }
        Ok(Layout {
            key_size: size,
            max_keys,
        })
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    /// On-disk key capacity of one node (`MAXKEY`).
    pub fn max_keys(&self) -> usize {
        self.max_keys
    }

    /// Number of LBA slots persisted per node, one more than the key
    /// capacity.
    fn lbas_per_node(&self) -> usize {
        self.max_keys + 1
    }

    fn key_offset(&self, slot: usize) -> usize {
        debug_assert!(slot <= self.max_keys + 1);
        KEY_ARRAY_OFFSET + slot * self.key_size
    }

    /// Offset of the on-disk LBA array within the sector.
    fn lba_array_offset(&self) -> usize {
        SECTOR_SIZE - self.lbas_per_node() * LBA_WIDTH
    }

    /// Length of the in-memory node buffer: one sector plus scratch for the
    /// overflow key slot, which may extend past the sector end. Key bytes
    /// spilling into the sector's LBA tail region are harmless because the
    /// tail is rewritten from the decoded LBA array on encode.
    fn buf_len(&self) -> usize {
        SECTOR_SIZE + self.key_size
    }
}

/// In-memory image of one tree node.
///
/// Keys live directly in the raw sector buffer and are mutated in place. The
/// LBA array is copied out of the buffer tail on decode, so splicing during
/// inserts and splits is plain slot shuffling instead of byte shifting
/// inside the sector, and copied back on encode.
#[derive(Debug)]
pub struct Node {
    layout: Layout,
    buf: Vec<u8>,
    /// Child or record LBAs; `max_keys + 2` slots, of which at most
    /// `max_keys + 1` are ever persisted.
    pub lbas: Vec<u32>,
    /// Interior node flag; leaves hold record LBAs, interior nodes child
    /// LBAs.
    pub internal: bool,
    /// Number of live keys.
    pub nkeys: usize,
    /// This node's own block address.
    pub lba: u32,
    /// Index of the child slot followed from the parent on the current
    /// traversal path.
    pub parent_index: usize,
    /// Whether the node must be written back before its buffer is recycled.
    pub dirty: bool,
}

impl Node {
    /// An empty node buffer for `layout`-shaped trees.
    pub fn new(layout: Layout) -> Self {
        Node {
            layout,
            buf: vec![0; layout.buf_len()],
            lbas: vec![0; layout.max_keys() + 2],
            internal: false,
            nkeys: 0,
            lba: 0,
            parent_index: 0,
            dirty: false,
        }
    }

    /// The raw sector image, for disk transfers.
    pub fn sector(&self) -> &[u8] {
        &self.buf[..SECTOR_SIZE]
    }

    pub fn sector_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..SECTOR_SIZE]
    }

    /// Rebuilds the decoded cursors after the sector image has been read
    /// from `lba`.
    pub fn decode(&mut self, lba: u32) {
        self.internal = self.buf[0] != 0;
        self.nkeys = self.buf[1] as usize;

        let offset = self.layout.lba_array_offset();
        let persisted = self.layout.lbas_per_node();
        for (slot, chunk) in self.lbas[..persisted]
            .iter_mut()
            .zip(self.buf[offset..SECTOR_SIZE].chunks_exact(LBA_WIDTH))
        {
            *slot = NativeEndian::read_u32(chunk);
        }
        // the spare overflow slot exists only in memory
        self.lbas[persisted] = 0;

        self.lba = lba;
        self.parent_index = 0;
        self.dirty = false;
    }

    /// Resets the node to an all-zero image for a block that has never been
    /// written. The node starts dirty.
    pub(crate) fn reset_fresh(&mut self, lba: u32, internal: bool) {
        for byte in self.buf.iter_mut() {
            *byte = 0;
        }
        for slot in self.lbas.iter_mut() {
            *slot = 0;
        }
        self.internal = internal;
        self.nkeys = 0;
        self.lba = lba;
        self.parent_index = 0;
        self.dirty = true;
    }

    /// Folds the flag bytes and the LBA array back into the sector image
    /// ahead of a disk write. Keys are already in place in the buffer.
    pub(crate) fn encode(&mut self) {
        debug_assert!(self.nkeys <= self.layout.max_keys());
        self.buf[0] = self.internal as u8;
        self.buf[1] = self.nkeys as u8;

        let offset = self.layout.lba_array_offset();
        let persisted = self.layout.lbas_per_node();
        for (chunk, slot) in self.buf[offset..SECTOR_SIZE]
            .chunks_exact_mut(LBA_WIDTH)
            .zip(&self.lbas[..persisted])
        {
            NativeEndian::write_u32(chunk, *slot);
        }
    }

    /// The key in `slot`.
    pub fn key(&self, slot: usize) -> &[u8] {
        let offset = self.layout.key_offset(slot);
        &self.buf[offset..offset + self.layout.key_size()]
    }

    pub(crate) fn set_key(&mut self, slot: usize, key: &[u8]) {
        debug_assert_eq!(key.len(), self.layout.key_size());
        let offset = self.layout.key_offset(slot);
        self.buf[offset..offset + key.len()].copy_from_slice(key);
    }

    /// Opens key slot `at` by moving keys `at..nkeys` up one slot.
    pub(crate) fn shift_keys_right(&mut self, at: usize) {
        let start = self.layout.key_offset(at);
        let end = self.layout.key_offset(self.nkeys);
        self.buf.copy_within(start..end, start + self.layout.key_size());
    }

    /// Opens LBA slot `at` by moving entries `at..=nkeys` up one slot. The
    /// range covers the one-past-the-keys child slot of interior nodes.
    pub(crate) fn shift_lbas_right(&mut self, at: usize) {
        for slot in (at..=self.nkeys).rev() {
            self.lbas[slot + 1] = self.lbas[slot];
        }
    }

    /// Binary search over the live keys by byte-lex comparison.
    ///
    /// `Ok` carries the matching slot, `Err` the insertion index. An empty
    /// node (only possible at an empty root) reports insertion index 0.
    pub fn search(&self, key: &[u8]) -> std::result::Result<usize, usize> {
        let mut lo = 0;
        let mut hi = self.nkeys;
        while lo < hi {
            let mid = (lo + hi) / 2;
            match key.cmp(self.key(mid)) {
                Ordering::Less => hi = mid,
                Ordering::Greater => lo = mid + 1,
                Ordering::Equal => return Ok(mid),
            }
        }
        Err(lo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn layout() -> Layout {
        Layout::for_key_size(32).unwrap()
    }

    fn key(byte: u8) -> Vec<u8> {
        vec![byte; 32]
    }

    #[test]
    fn geometry_for_32_byte_keys() {
        let layout = layout();
        assert_eq!(layout.max_keys(), 28);
        assert_eq!(layout.key_size(), 32);
        assert_eq!(layout.lba_array_offset(), SECTOR_SIZE - 29 * 4);
    }

    #[test]
    fn unusable_key_sizes_are_rejected() {
        assert!(Layout::for_key_size(0).is_err());
        // (1024 - 6) / (506 + 4) = 1: a node of one key cannot split
        assert!(Layout::for_key_size(506).is_err());
        assert!(Layout::for_key_size(505).is_ok());
        assert!(Layout::for_key_size(2048).is_err());
    }

    #[test]
    fn empty_node_misses_at_slot_zero() {
        let node = Node::new(layout());
        assert_eq!(node.search(&key(7)), Err(0));
    }

    #[test]
    fn search_finds_slots_and_insertion_points() {
        let mut node = Node::new(layout());
        for (slot, byte) in [2u8, 4, 6, 8].iter().enumerate() {
            node.set_key(slot, &key(*byte));
            node.nkeys += 1;
        }

        assert_eq!(node.search(&key(2)), Ok(0));
        assert_eq!(node.search(&key(8)), Ok(3));
        assert_eq!(node.search(&key(1)), Err(0));
        assert_eq!(node.search(&key(5)), Err(2));
        assert_eq!(node.search(&key(9)), Err(4));
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut node = Node::new(layout());
        node.reset_fresh(42, true);
        for slot in 0..3 {
            node.set_key(slot, &key(10 + slot as u8));
            node.lbas[slot] = 100 + slot as u32;
        }
        node.nkeys = 3;
        node.lbas[3] = 103;
        node.encode();

        let mut back = Node::new(layout());
        back.sector_mut().copy_from_slice(node.sector());
        back.decode(42);

        assert_eq!(back.internal, true);
        assert_eq!(back.nkeys, 3);
        assert_eq!(back.lba, 42);
        assert!(!back.dirty);
        for slot in 0..3 {
            assert_eq!(back.key(slot), &key(10 + slot as u8)[..]);
            assert_eq!(back.lbas[slot], 100 + slot as u32);
        }
        assert_eq!(back.lbas[3], 103);
    }

    #[test]
    fn shifting_opens_a_slot() {
        let mut node = Node::new(layout());
        node.reset_fresh(1, false);
        for (slot, byte) in [1u8, 3, 5].iter().enumerate() {
            node.set_key(slot, &key(*byte));
            node.lbas[slot] = 10 + *byte as u32;
        }
        node.nkeys = 3;

        node.shift_keys_right(1);
        node.set_key(1, &key(2));
        node.shift_lbas_right(1);
        node.lbas[1] = 12;
        node.nkeys = 4;

        for (slot, byte) in [1u8, 2, 3, 5].iter().enumerate() {
            assert_eq!(node.key(slot), &key(*byte)[..]);
            assert_eq!(node.lbas[slot], 10 + *byte as u32);
        }
    }

    #[test]
    fn overflow_slot_accepts_a_key_past_disk_capacity() {
        let layout = Layout::for_key_size(505).unwrap();
        assert_eq!(layout.max_keys(), 2);

        let mut node = Node::new(layout);
        node.reset_fresh(1, false);
        for slot in 0..3 {
            node.set_key(slot, &vec![slot as u8 + 1; 505]);
            node.lbas[slot] = slot as u32 + 2;
        }
        node.nkeys = 3;

        // the third key occupies the in-memory spare slot only
        assert_eq!(node.key(2), &vec![3u8; 505][..]);
        assert_eq!(node.lbas[2], 4);
    }
}
