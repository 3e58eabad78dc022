use byteorder::{ByteOrder, NativeEndian};

use crate::disk::SECTOR_SIZE;
use crate::error::{Error, Result};
use crate::node::Layout;

/// LBA of the superblock sector.
pub const SUPERBLOCK_LBA: u32 = 0;
/// LBA of the root node of a freshly created tree.
pub const INITIAL_ROOT_LBA: u32 = 1;
/// First allocatable block of a freshly created tree: sector 0 is the
/// superblock, sector 1 the root.
pub const INITIAL_FIRST_FREE: u64 = 2;

/// Bytes of sector 0 occupied by the packed metadata; the rest is zero.
const ENCODED_LEN: usize = 16;

/// Tree metadata persisted in sector 0.
///
/// The packed format is host byte order: this is a single-host store and
/// portability across endianness is not a goal. `first_free_block` is kept
/// 64-bit for format compatibility even though the usable range is bounded
/// by the 32-bit LBA width.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Superblock {
    pub key_size: u32,
    pub root_lba: u32,
    pub first_free_block: u64,
}

impl Superblock {
    /// Metadata of a freshly created tree.
    pub fn new(key_size: u32) -> Self {
        Superblock {
            key_size,
            root_lba: INITIAL_ROOT_LBA,
            first_free_block: INITIAL_FIRST_FREE,
        }
    }

    /// Packs the metadata into the leading bytes of a sector image and zeros
    /// the remainder.
    pub fn encode(&self, sector: &mut [u8]) {
        assert_eq!(sector.len(), SECTOR_SIZE);
        for byte in sector.iter_mut() {
            *byte = 0;
        }
        NativeEndian::write_u32(&mut sector[0..4], self.key_size);
        NativeEndian::write_u32(&mut sector[4..8], self.root_lba);
        NativeEndian::write_u64(&mut sector[8..16], self.first_free_block);
    }

    /// Unpacks the metadata from a sector image, rejecting images that do
    /// not describe a usable tree.
    pub fn decode(sector: &[u8]) -> Result<Self> {
        assert!(sector.len() >= ENCODED_LEN);
        let sb = Superblock {
            key_size: NativeEndian::read_u32(&sector[0..4]),
            root_lba: NativeEndian::read_u32(&sector[4..8]),
            first_free_block: NativeEndian::read_u64(&sector[8..16]),
        };

        // a foreign or zeroed sector 0 must not decode
        Layout::for_key_size(sb.key_size)?;
        if sb.root_lba == SUPERBLOCK_LBA || sb.first_free_block < INITIAL_FIRST_FREE {
            return Err(Error::BadSuperblock {
                root_lba: sb.root_lba,
                first_free_block: sb.first_free_block,
            });
        }

        Ok(sb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn round_trip() {
        let sb = Superblock {
            key_size: 32,
            root_lba: 17,
            first_free_block: 1234,
        };

        let mut sector = vec![0xffu8; SECTOR_SIZE];
        sb.encode(&mut sector);
        assert_eq!(Superblock::decode(&sector).unwrap(), sb);

        // everything past the packed fields is zeroed
        assert!(sector[ENCODED_LEN..].iter().all(|&b| b == 0));
    }

    #[test]
    fn fresh_tree_metadata() {
        let sb = Superblock::new(32);
        assert_eq!(sb.root_lba, INITIAL_ROOT_LBA);
        assert_eq!(sb.first_free_block, INITIAL_FIRST_FREE);
    }

    #[test]
    fn zeroed_sector_is_rejected() {
        let sector = vec![0u8; SECTOR_SIZE];
        assert!(Superblock::decode(&sector).is_err());
    }

    #[test]
    fn stale_allocator_cursor_is_rejected() {
        let sb = Superblock {
            key_size: 32,
            root_lba: 1,
            first_free_block: 1,
        };
        let mut sector = vec![0u8; SECTOR_SIZE];
        sb.encode(&mut sector);

        match Superblock::decode(&sector) {
            Err(Error::BadSuperblock {
                first_free_block: 1, ..
            }) => {}
            other => panic!("expected BadSuperblock, got {:?}", other),
        }
    }
}
