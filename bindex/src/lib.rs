//! Disk-backed B+ tree index for fixed-size keys.
//!
//! `bindex` is the indexing layer of a simple single-user embedded
//! key/value store. A tree lives on a fixed-size, sector-addressed device
//! backed by a regular file: sector 0 holds the superblock, every other
//! allocated sector is either a tree node or a record block. Keys are
//! fixed-size byte strings compared lexicographically; each key maps to one
//! opaque record of exactly one sector.
//!
//! Supported operations are point lookup, insert, and in-place update.
//! There is no deletion, no range scan, and no multi-user access; the device
//! file is locked exclusively by the live handle.
//!
//! Blocks are handed out by a monotonic bump allocator persisted in the
//! superblock and are never reused. Mutations buffer in a root-to-leaf path
//! of pooled node buffers and become durable in one bottom-up sweep, with
//! the superblock written last.

pub mod disk;
pub mod error;
pub mod node;
pub mod pool;
pub mod superblock;
pub mod tree;

pub use crate::disk::{Disk, SECTOR_SIZE};
pub use crate::error::{Error, Result};
pub use crate::tree::{BTree, Lba, TreeStats};
