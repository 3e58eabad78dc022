use std::collections::VecDeque;
use std::io::{self, Write};
use std::path::Path;

use log::{debug, trace};
use serde::Serialize;

use crate::disk::{Disk, SECTOR_SIZE};
use crate::error::{Error, Result};
use crate::node::{Layout, Node};
use crate::pool::NodePool;
use crate::superblock::{Superblock, INITIAL_ROOT_LBA, SUPERBLOCK_LBA};

/// Logical block address of one device sector. LBA 0 names the superblock
/// and never a record or node.
pub type Lba = u32;

/// Outcome of a root-to-leaf descent.
enum Probe {
    /// The key exists; its record block.
    Hit(Lba),
    /// The key is absent and belongs at `index` in the leaf on top of the
    /// path stack.
    Miss { index: usize },
}

/// Shape summary of a tree, as reported by [`BTree::stats`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TreeStats {
    /// Number of node levels; 1 for a tree whose root is a leaf.
    pub depth: usize,
    pub interior_nodes: u64,
    pub leaf_nodes: u64,
    /// Live keys, counted at the leaf level.
    pub keys: u64,
    pub first_free_block: u64,
}

/// A disk-backed B+ tree index mapping fixed-size keys to single-sector
/// records.
///
/// Keys are compared byte-lexicographically. Each key maps to one record
/// block of exactly [`SECTOR_SIZE`] bytes, written at insert time and
/// overwritten in place on re-insert. Blocks come from a monotonic bump
/// allocator persisted in the superblock; nothing is ever freed or reused.
///
/// The handle is single-user: exactly one operation is in flight at a time,
/// and the device file is locked exclusively for the handle's lifetime.
#[derive(Debug)]
pub struct BTree {
    disk: Disk,
    sb: Superblock,
    layout: Layout,
    pool: NodePool,
    sb_dirty: bool,
}

impl BTree {
    /// Creates a new empty index on a fresh device of `size` bytes.
    ///
    /// Sector 0 receives the superblock and sector 1 a zero-filled root
    /// leaf; allocation starts at block 2.
    pub fn create<P: AsRef<Path>>(path: P, size: u64, key_size: u32) -> Result<Self> {
        let layout = Layout::for_key_size(key_size)?;
        let mut disk = Disk::create(path, size)?;
        let sb = Superblock::new(key_size);

        let mut sector = vec![0u8; SECTOR_SIZE];
        sb.encode(&mut sector);
        disk.write(SUPERBLOCK_LBA, &sector)?;

        for byte in sector.iter_mut() {
            *byte = 0;
        }
        disk.write(INITIAL_ROOT_LBA, &sector)?;

        debug!(
            "created index: key_size={} max_keys={} num_lbas={}",
            key_size,
            layout.max_keys(),
            disk.num_lbas()
        );
        Ok(BTree {
            disk,
            sb,
            layout,
            pool: NodePool::new(layout),
            sb_dirty: false,
        })
    }

    /// Opens an existing index, re-reading the superblock.
    pub fn attach<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut disk = Disk::attach(path)?;

        let mut sector = vec![0u8; SECTOR_SIZE];
        disk.read(SUPERBLOCK_LBA, &mut sector)?;
        let sb = Superblock::decode(&sector)?;
        let layout = Layout::for_key_size(sb.key_size)?;

        let num_lbas = disk.num_lbas();
        if u64::from(sb.root_lba) >= num_lbas || sb.first_free_block > num_lbas {
            return Err(Error::BadSuperblock {
                root_lba: sb.root_lba,
                first_free_block: sb.first_free_block,
            });
        }

        debug!(
            "attached index: key_size={} root={} first_free={}",
            sb.key_size, sb.root_lba, sb.first_free_block
        );
        Ok(BTree {
            disk,
            sb,
            layout,
            pool: NodePool::new(layout),
            sb_dirty: false,
        })
    }

    /// The configured key size in bytes.
    pub fn key_size(&self) -> usize {
        self.layout.key_size()
    }

    /// Per-node key capacity.
    pub fn max_keys(&self) -> usize {
        self.layout.max_keys()
    }

    /// The underlying device, e.g. for reading record blocks.
    pub fn disk(&mut self) -> &mut Disk {
        &mut self.disk
    }

    /// Current root node address.
    pub fn root_lba(&self) -> Lba {
        self.sb.root_lba
    }

    /// The bump allocator's cursor: the next never-used block.
    pub fn first_free_block(&self) -> u64 {
        self.sb.first_free_block
    }

    /// Looks up `key`, returning its record block on a hit.
    pub fn find(&mut self, key: &[u8]) -> Result<Option<Lba>> {
        self.check_key(key)?;

        let mut path = Vec::new();
        let outcome = self.descend(key, &mut path);
        let release = self.release_path(&mut path);
        let probe = outcome?;
        release?;

        Ok(match probe {
            Probe::Hit(lba) => Some(lba),
            Probe::Miss { .. } => None,
        })
    }

    /// Inserts `key` with a one-sector `record`, or overwrites the existing
    /// record in place when the key is already present. Returns the record's
    /// block address.
    pub fn insert(&mut self, key: &[u8], record: &[u8]) -> Result<Lba> {
        self.check_key(key)?;
        if record.len() != SECTOR_SIZE {
            return Err(Error::RecordLength {
                actual: record.len(),
            });
        }
        if self.sb.first_free_block >= self.disk.num_lbas() {
            return Err(Error::DeviceFull {
                first_free: self.sb.first_free_block,
                num_lbas: self.disk.num_lbas(),
            });
        }

        let mut path = Vec::new();
        let outcome = self.insert_inner(key, record, &mut path);
        let release = self.release_path(&mut path);
        let lba = outcome?;
        release?;
        Ok(lba)
    }

    fn insert_inner(&mut self, key: &[u8], record: &[u8], path: &mut Vec<Node>) -> Result<Lba> {
        match self.descend(key, path)? {
            Probe::Hit(lba) => {
                // in-place update; nothing on the path is dirtied
                self.disk.write(lba, record)?;
                debug!("overwrote record {}", lba);
                Ok(lba)
            }
            Probe::Miss { index } => {
                let record_lba = self.allocate()?;
                self.disk.write(record_lba, record)?;

                let leaf = path
                    .last_mut()
                    .expect("a descent always leaves the leaf on the path");
                leaf.shift_keys_right(index);
                leaf.set_key(index, key);
                leaf.shift_lbas_right(index);
                leaf.lbas[index] = record_lba;
                leaf.nkeys += 1;
                leaf.dirty = true;
                trace!(
                    "inserted key at slot {} of leaf {}, record {}",
                    index,
                    leaf.lba,
                    record_lba
                );

                if leaf.nkeys > self.layout.max_keys() {
                    self.split(path)?;
                }
                self.sb_dirty = true;
                Ok(record_lba)
            }
        }
    }

    /// Walks from the root toward `key`, pushing every visited node onto
    /// `path`. Interior hits resolve to the record of the key's leaf copy
    /// via a rightmost descent through the matched key's left child.
    fn descend(&mut self, key: &[u8], path: &mut Vec<Node>) -> Result<Probe> {
        let mut lba = self.sb.root_lba;
        let mut parent_index = 0;
        loop {
            let mut node = self.pool.acquire(&mut self.disk, lba)?;
            node.parent_index = parent_index;

            match node.search(key) {
                Ok(slot) => {
                    let hit = node.lbas[slot];
                    let internal = node.internal;
                    path.push(node);
                    let record = if internal {
                        self.rightmost_record(hit)?
                    } else {
                        hit
                    };
                    return Ok(Probe::Hit(record));
                }
                Err(index) => {
                    if node.internal {
                        lba = node.lbas[index];
                        parent_index = index;
                        path.push(node);
                    } else {
                        path.push(node);
                        return Ok(Probe::Miss { index });
                    }
                }
            }
        }
    }

    /// Follows last-child pointers from `lba` down to a leaf and returns the
    /// record of that leaf's final key. Interior separators are duplicated
    /// at the leaf level, so the rightmost leaf under a matched key's left
    /// child ends with that key. Side-path nodes are clean and recycled
    /// immediately.
    fn rightmost_record(&mut self, mut lba: Lba) -> Result<Lba> {
        loop {
            let node = self.pool.acquire(&mut self.disk, lba)?;
            let internal = node.internal;
            let next = if internal {
                node.lbas[node.nkeys]
            } else {
                node.lbas[node.nkeys - 1]
            };
            self.pool.recycle(node);

            if !internal {
                return Ok(next);
            }
            lba = next;
        }
    }

    /// Splits the overflowing node on top of `path`, cascading upward while
    /// parents overflow. New siblings are flushed and recycled immediately;
    /// path nodes stay resident for the final release sweep.
    fn split(&mut self, path: &mut Vec<Node>) -> Result<()> {
        let max_keys = self.layout.max_keys();
        let prior_root = self.sb.root_lba;

        let mut level = path.len() - 1;
        while path[level].nkeys > max_keys {
            let sibling_lba = match self.allocate() {
                Ok(lba) => lba,
                Err(err) => return self.abandon_split(path, prior_root, err),
            };

            if level == 0 {
                // grow a new root; the old root becomes its child 0
                let root_lba = match self.allocate() {
                    Ok(lba) => lba,
                    Err(err) => return self.abandon_split(path, prior_root, err),
                };
                let root = self.pool.acquire_fresh(root_lba, true);
                self.sb.root_lba = root_lba;
                path.insert(0, root);
                level = 1;
                debug!("grew new root {}", root_lba);
            }

            let (upper, lower) = path.split_at_mut(level);
            let parent = upper.last_mut().expect("level > 0 has a parent frame");
            let node = &mut lower[0];

            let mut sibling = self.pool.acquire_fresh(sibling_lba, node.internal);
            let separator = halve(node, &mut sibling);
            splice_child(parent, &separator, node.lba, sibling.lba, node.parent_index);
            trace!(
                "split node {} at level {}: sibling {}, parent {}",
                node.lba,
                level,
                sibling.lba,
                parent.lba
            );

            self.pool.release(&mut self.disk, sibling)?;
            level -= 1;
        }
        Ok(())
    }

    /// Bails out of a split that cannot allocate its blocks. The in-memory
    /// mutations are discarded so the on-disk tree keeps its pre-insert
    /// shape; the blocks taken so far by this operation stay allocated and
    /// unreachable.
    fn abandon_split(&mut self, path: &mut Vec<Node>, prior_root: Lba, err: Error) -> Result<()> {
        for node in path.iter_mut() {
            node.dirty = false;
        }
        self.sb.root_lba = prior_root;
        Err(err)
    }

    /// Takes the next never-used block from the bump allocator.
    fn allocate(&mut self) -> Result<Lba> {
        let next = self.sb.first_free_block;
        if next >= self.disk.num_lbas() {
            return Err(Error::DeviceFull {
                first_free: next,
                num_lbas: self.disk.num_lbas(),
            });
        }
        self.sb.first_free_block = next + 1;
        self.sb_dirty = true;
        Ok(next as Lba)
    }

    /// Releases the traversal path (dirty nodes flush bottom-up), then
    /// persists the superblock if this operation changed it. Node writes
    /// strictly precede the superblock write.
    fn release_path(&mut self, path: &mut Vec<Node>) -> Result<()> {
        self.pool.release_path(&mut self.disk, path)?;
        self.flush_superblock()
    }

    fn flush_superblock(&mut self) -> Result<()> {
        if !self.sb_dirty {
            return Ok(());
        }
        let mut sector = vec![0u8; SECTOR_SIZE];
        self.sb.encode(&mut sector);
        self.disk.write(SUPERBLOCK_LBA, &sector)?;
        self.sb_dirty = false;
        trace!(
            "flushed superblock: root={} first_free={}",
            self.sb.root_lba,
            self.sb.first_free_block
        );
        Ok(())
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.layout.key_size() {
            return Err(Error::KeyLength {
                expected: self.layout.key_size(),
                actual: key.len(),
            });
        }
        Ok(())
    }

    /// Writes a breadth-first dump of every node to `w`.
    pub fn dump<W: Write>(&mut self, w: &mut W) -> Result<()> {
        let mut queue = VecDeque::new();
        queue.push_back(self.sb.root_lba);

        while let Some(lba) = queue.pop_front() {
            let node = self.pool.acquire(&mut self.disk, lba)?;

            writeln!(w, "LBA 0x{:08x}. Internal: {}", node.lba, node.internal as u8)?;
            for slot in 0..=node.nkeys {
                if slot < node.nkeys {
                    writeln!(
                        w,
                        "  Entry {}: Key: {:<32} LBA: 0x{:08x}",
                        slot,
                        format_key(node.key(slot)),
                        node.lbas[slot]
                    )?;
                } else {
                    writeln!(w, "  Entry {}: {:<37} LBA: 0x{:08x}", slot, "", node.lbas[slot])?;
                }
            }
            writeln!(w)?;

            if node.internal {
                for &child in &node.lbas[..=node.nkeys] {
                    queue.push_back(child);
                }
            }
            self.pool.recycle(node);
        }
        Ok(())
    }

    /// Dumps the tree to stdout.
    pub fn print(&mut self) -> Result<()> {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        self.dump(&mut handle)
    }

    /// Walks the whole tree and summarizes its shape.
    pub fn stats(&mut self) -> Result<TreeStats> {
        let mut stats = TreeStats {
            depth: 0,
            interior_nodes: 0,
            leaf_nodes: 0,
            keys: 0,
            first_free_block: self.sb.first_free_block,
        };

        let mut queue = VecDeque::new();
        queue.push_back((self.sb.root_lba, 1));
        while let Some((lba, depth)) = queue.pop_front() {
            let node = self.pool.acquire(&mut self.disk, lba)?;
            stats.depth = stats.depth.max(depth);
            if node.internal {
                stats.interior_nodes += 1;
                for &child in &node.lbas[..=node.nkeys] {
                    queue.push_back((child, depth + 1));
                }
            } else {
                stats.leaf_nodes += 1;
                stats.keys += node.nkeys as u64;
            }
            self.pool.recycle(node);
        }
        Ok(stats)
    }
}

/// Moves the upper half of `node` into the fresh `sibling` and returns the
/// separator key for the parent.
///
/// The center key of an interior node moves up: it leaves `node` and is not
/// written into `sibling`. The center key of a leaf is copied up and remains
/// the leaf's last live key, so the interior-hit descent lands on its
/// record. The separator is never moved off the leaf level.
fn halve(node: &mut Node, sibling: &mut Node) -> Vec<u8> {
    let center = node.nkeys / 2;
    let separator = node.key(center).to_vec();

    for slot in center + 1..node.nkeys {
        sibling.set_key(slot - center - 1, node.key(slot));
    }
    sibling.nkeys = node.nkeys - center - 1;

    if node.internal {
        // the trailing slot carries the last-child pointer
        for slot in center + 1..=node.nkeys {
            sibling.lbas[slot - center - 1] = node.lbas[slot];
        }
        node.nkeys = center;
    } else {
        for slot in center + 1..node.nkeys {
            sibling.lbas[slot - center - 1] = node.lbas[slot];
        }
        node.nkeys = center + 1;
    }
    node.dirty = true;

    separator
}

/// Splices a freshly split pair into `parent` at child slot `at`: the
/// separator opens a key slot, `left` keeps the original child slot and
/// `right` lands just after it.
fn splice_child(parent: &mut Node, separator: &[u8], left: Lba, right: Lba, at: usize) {
    parent.shift_keys_right(at);
    parent.set_key(at, separator);
    parent.shift_lbas_right(at + 1);
    parent.lbas[at] = left;
    parent.lbas[at + 1] = right;
    parent.nkeys += 1;
    parent.dirty = true;
}

fn format_key(key: &[u8]) -> String {
    let trimmed = match key.iter().rposition(|&b| b != 0) {
        Some(last) => &key[..=last],
        None => &key[..0],
    };
    if trimmed.iter().all(|&b| b.is_ascii_graphic() || b == b' ') {
        String::from_utf8_lossy(trimmed).into_owned()
    } else {
        hex::encode(trimmed)
    }
}
