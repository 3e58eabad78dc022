use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::disk::SECTOR_SIZE;

/// Errors produced by the index and its disk adapter.
#[derive(Debug, Error)]
pub enum Error {
    /// The bump allocator has no blocks left; the insert did not happen.
    #[error("device is full ({first_free} of {num_lbas} blocks allocated)")]
    DeviceFull { first_free: u64, num_lbas: u64 },

    /// Device size is zero or not a whole number of sectors.
    #[error("device size {0} is not a positive multiple of the sector size {}", SECTOR_SIZE)]
    UnalignedDeviceSize(u64),

    /// The key size leaves no room for a splittable node.
    #[error("key size {0} is unusable: nodes must hold at least two keys per sector")]
    InvalidKeySize(u32),

    /// A key did not match the configured key size.
    #[error("key is {actual} bytes, the index is configured for {expected}-byte keys")]
    KeyLength { expected: usize, actual: usize },

    /// A record was not exactly one sector.
    #[error("record is {actual} bytes, records are exactly {} bytes", SECTOR_SIZE)]
    RecordLength { actual: usize },

    /// A block address past the end of the device.
    #[error("lba {lba} is out of range for a device of {num_lbas} sectors")]
    LbaOutOfRange { lba: u32, num_lbas: u64 },

    /// Another live handle holds the device's exclusive lock.
    #[error("device {0:?} is locked by another handle")]
    DeviceLocked(PathBuf),

    /// Sector 0 does not describe a usable tree.
    #[error("not a valid index superblock (root lba {root_lba}, first free block {first_free_block})")]
    BadSuperblock { root_lba: u32, first_free_block: u64 },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
