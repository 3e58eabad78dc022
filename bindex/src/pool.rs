use log::trace;

use crate::disk::Disk;
use crate::error::Result;
use crate::node::{Layout, Node};

/// Recycles node buffers across traversals, so steady-state operations do
/// not allocate.
///
/// Buffers handed out by the pool live for at most one operation: a
/// traversal acquires the root-to-leaf path, and releasing the path returns
/// every buffer to the free list. Releasing is also where dirty nodes become
/// durable.
#[derive(Debug)]
pub struct NodePool {
    layout: Layout,
    free: Vec<Node>,
}

impl NodePool {
    pub fn new(layout: Layout) -> Self {
        NodePool {
            layout,
            free: Vec::new(),
        }
    }

    fn buffer(&mut self) -> Node {
        self.free
            .pop()
            .unwrap_or_else(|| Node::new(self.layout))
    }

    /// Acquires a node populated from the sector at `lba`.
    pub fn acquire(&mut self, disk: &mut Disk, lba: u32) -> Result<Node> {
        let mut node = self.buffer();
        if let Err(err) = disk.read(lba, node.sector_mut()) {
            // the error exit must not strand the buffer
            self.free.push(node);
            return Err(err);
        }
        node.decode(lba);
        trace!(
            "acquired node {}: internal={} nkeys={}",
            lba,
            node.internal,
            node.nkeys
        );
        Ok(node)
    }

    /// Acquires a zeroed node for a block that has never been written; the
    /// node starts dirty.
    pub fn acquire_fresh(&mut self, lba: u32, internal: bool) -> Node {
        let mut node = self.buffer();
        node.reset_fresh(lba, internal);
        node
    }

    /// Flushes `node` if it is dirty, then recycles its buffer. The buffer
    /// goes back on the free list even when the flush fails.
    pub fn release(&mut self, disk: &mut Disk, mut node: Node) -> Result<()> {
        let result = self.flush(disk, &mut node);
        node.dirty = false;
        self.free.push(node);
        result
    }

    /// Recycles a clean buffer without touching the disk.
    pub fn recycle(&mut self, node: Node) {
        debug_assert!(!node.dirty);
        self.free.push(node);
    }

    /// Releases a root-to-leaf path bottom-up: the leaf flushes first, the
    /// root last. Every buffer is recycled even if a flush fails; the first
    /// failure is reported after the sweep.
    pub fn release_path(&mut self, disk: &mut Disk, path: &mut Vec<Node>) -> Result<()> {
        let mut first_err = None;
        while let Some(mut node) = path.pop() {
            if first_err.is_none() {
                if let Err(err) = self.flush(disk, &mut node) {
                    first_err = Some(err);
                }
            }
            node.dirty = false;
            self.free.push(node);
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn flush(&mut self, disk: &mut Disk, node: &mut Node) -> Result<()> {
        if !node.dirty {
            return Ok(());
        }
        node.encode();
        disk.write(node.lba, node.sector())?;
        node.dirty = false;
        trace!("flushed node {}", node.lba);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::NamedTempFile;

    use crate::disk::SECTOR_SIZE;
    use crate::error::Error;

    fn setup() -> (NamedTempFile, Disk, NodePool) {
        let file = NamedTempFile::new().unwrap();
        let disk = Disk::create(file.path(), 8 * SECTOR_SIZE as u64).unwrap();
        let pool = NodePool::new(Layout::for_key_size(32).unwrap());
        (file, disk, pool)
    }

    #[test]
    fn fresh_node_round_trips_through_release() {
        let (_file, mut disk, mut pool) = setup();

        let mut node = pool.acquire_fresh(3, false);
        node.set_key(0, &[7u8; 32]);
        node.lbas[0] = 99;
        node.nkeys = 1;
        pool.release(&mut disk, node).unwrap();

        let back = pool.acquire(&mut disk, 3).unwrap();
        assert!(!back.internal);
        assert!(!back.dirty);
        assert_eq!(back.nkeys, 1);
        assert_eq!(back.key(0), &[7u8; 32][..]);
        assert_eq!(back.lbas[0], 99);
    }

    #[test]
    fn clean_nodes_are_not_written_back() {
        let (_file, mut disk, mut pool) = setup();

        let mut node = pool.acquire_fresh(2, false);
        node.set_key(0, &[1u8; 32]);
        node.nkeys = 1;
        pool.release(&mut disk, node).unwrap();

        // mutate the buffer of a clean acquisition without marking it dirty
        let mut node = pool.acquire(&mut disk, 2).unwrap();
        node.nkeys = 0;
        pool.release(&mut disk, node).unwrap();

        let back = pool.acquire(&mut disk, 2).unwrap();
        assert_eq!(back.nkeys, 1);
    }

    #[test]
    fn release_path_flushes_leaf_to_root() {
        let (_file, mut disk, mut pool) = setup();

        let mut path = Vec::new();
        for lba in &[5u32, 6, 7] {
            let mut node = pool.acquire_fresh(*lba, false);
            node.set_key(0, &[*lba as u8; 32]);
            node.nkeys = 1;
            path.push(node);
        }
        pool.release_path(&mut disk, &mut path).unwrap();
        assert!(path.is_empty());

        for lba in &[5u32, 6, 7] {
            let node = pool.acquire(&mut disk, *lba).unwrap();
            assert_eq!(node.key(0), &[*lba as u8; 32][..]);
            pool.recycle(node);
        }
    }

    #[test]
    fn acquire_failure_recycles_the_buffer() {
        let (_file, mut disk, mut pool) = setup();

        match pool.acquire(&mut disk, 800) {
            Err(Error::LbaOutOfRange { lba: 800, .. }) => {}
            other => panic!("expected LbaOutOfRange, got {:?}", other),
        }

        // the buffer went back to the free list and is reusable
        let node = pool.acquire_fresh(1, false);
        pool.release(&mut disk, node).unwrap();
    }
}
