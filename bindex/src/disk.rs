use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use log::{debug, warn};

use crate::error::{Error, Result};

/// Size of one device sector in bytes. All device I/O happens in whole
/// sectors.
pub const SECTOR_SIZE: usize = 1024;

/// A fixed-size, sector-addressed block device backed by a regular file.
///
/// Sectors are read and written synchronously at sector granularity and
/// addressed by 32-bit LBA. The backing file is locked exclusively for the
/// lifetime of the handle: this is a single-user store, and a second live
/// handle on the same device would corrupt the tree.
#[derive(Debug)]
pub struct Disk {
    file: File,
    path: PathBuf,
    size: u64,
}

impl Disk {
    /// Creates a new zero-filled device of exactly `size` bytes, which must
    /// be a positive multiple of [`SECTOR_SIZE`]. An existing file at `path`
    /// is truncated.
    pub fn create<P: AsRef<Path>>(path: P, size: u64) -> Result<Self> {
        let path = path.as_ref();
        if size == 0 || size % SECTOR_SIZE as u64 != 0 {
            return Err(Error::UnalignedDeviceSize(size));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        lock_device(&file, path)?;
        file.set_len(size)?;

        debug!(
            "created device {:?}: {} sectors of {} bytes",
            path,
            size / SECTOR_SIZE as u64,
            SECTOR_SIZE
        );
        Ok(Disk {
            file,
            path: path.to_path_buf(),
            size,
        })
    }

    /// Opens an existing device file.
    pub fn attach<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        lock_device(&file, path)?;

        let size = file.metadata()?.len();
        if size == 0 || size % SECTOR_SIZE as u64 != 0 {
            return Err(Error::UnalignedDeviceSize(size));
        }

        debug!("attached device {:?}: {} sectors", path, size / SECTOR_SIZE as u64);
        Ok(Disk {
            file,
            path: path.to_path_buf(),
            size,
        })
    }

    /// Reads the sector at `lba` into `buf`, which must be exactly one
    /// sector long.
    pub fn read(&mut self, lba: u32, buf: &mut [u8]) -> Result<()> {
        assert_eq!(buf.len(), SECTOR_SIZE, "sector buffers are exactly one sector");
        self.seek_to(lba)?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Writes `buf`, which must be exactly one sector long, to the sector at
    /// `lba`.
    pub fn write(&mut self, lba: u32, buf: &[u8]) -> Result<()> {
        assert_eq!(buf.len(), SECTOR_SIZE, "sector buffers are exactly one sector");
        self.seek_to(lba)?;
        self.file.write_all(buf)?;
        Ok(())
    }

    /// Total device size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of addressable sectors.
    pub fn num_lbas(&self) -> u64 {
        self.size / SECTOR_SIZE as u64
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn seek_to(&mut self, lba: u32) -> Result<()> {
        let num_lbas = self.num_lbas();
        if u64::from(lba) >= num_lbas {
            return Err(Error::LbaOutOfRange { lba, num_lbas });
        }
        self.file
            .seek(SeekFrom::Start(u64::from(lba) * SECTOR_SIZE as u64))?;
        Ok(())
    }
}

impl Drop for Disk {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            warn!("failed to unlock device {:?}: {}", self.path, err);
        }
    }
}

fn lock_device(file: &File, path: &Path) -> Result<()> {
    file.try_lock_exclusive().map_err(|err| {
        if err.kind() == fs2::lock_contended_error().kind() {
            Error::DeviceLocked(path.to_path_buf())
        } else {
            Error::Io(err)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::NamedTempFile;

    #[test]
    fn create_rejects_unaligned_sizes() {
        let file = NamedTempFile::new().unwrap();

        for &size in &[0, 1, SECTOR_SIZE as u64 - 1, SECTOR_SIZE as u64 + 512] {
            match Disk::create(file.path(), size) {
                Err(Error::UnalignedDeviceSize(got)) => assert_eq!(got, size),
                other => panic!("expected UnalignedDeviceSize, got {:?}", other),
            }
        }
    }

    #[test]
    fn sectors_round_trip() {
        let file = NamedTempFile::new().unwrap();
        let mut disk = Disk::create(file.path(), 8 * SECTOR_SIZE as u64).unwrap();
        assert_eq!(disk.num_lbas(), 8);
        assert_eq!(disk.size(), 8 * SECTOR_SIZE as u64);

        let payload = vec![0xabu8; SECTOR_SIZE];
        disk.write(5, &payload).unwrap();

        let mut back = vec![0u8; SECTOR_SIZE];
        disk.read(5, &mut back).unwrap();
        assert_eq!(back, payload);

        // untouched sectors read back as zeros
        disk.read(3, &mut back).unwrap();
        assert!(back.iter().all(|&b| b == 0));
    }

    #[test]
    fn out_of_range_lba_is_rejected() {
        let file = NamedTempFile::new().unwrap();
        let mut disk = Disk::create(file.path(), 4 * SECTOR_SIZE as u64).unwrap();

        let mut buf = vec![0u8; SECTOR_SIZE];
        match disk.read(4, &mut buf) {
            Err(Error::LbaOutOfRange { lba: 4, num_lbas: 4 }) => {}
            other => panic!("expected LbaOutOfRange, got {:?}", other),
        }
        match disk.write(9000, &buf) {
            Err(Error::LbaOutOfRange { lba: 9000, .. }) => {}
            other => panic!("expected LbaOutOfRange, got {:?}", other),
        }
    }

    #[test]
    fn second_handle_is_locked_out() {
        let file = NamedTempFile::new().unwrap();
        let disk = Disk::create(file.path(), 4 * SECTOR_SIZE as u64).unwrap();

        match Disk::attach(file.path()) {
            Err(Error::DeviceLocked(path)) => assert_eq!(path, file.path()),
            other => panic!("expected DeviceLocked, got {:?}", other),
        }

        // dropping the first handle releases the lock
        drop(disk);
        Disk::attach(file.path()).unwrap();
    }

    #[test]
    fn attach_preserves_contents() {
        let file = NamedTempFile::new().unwrap();
        let payload = vec![0x5au8; SECTOR_SIZE];
        {
            let mut disk = Disk::create(file.path(), 4 * SECTOR_SIZE as u64).unwrap();
            disk.write(2, &payload).unwrap();
        }

        let mut disk = Disk::attach(file.path()).unwrap();
        let mut back = vec![0u8; SECTOR_SIZE];
        disk.read(2, &mut back).unwrap();
        assert_eq!(back, payload);
    }
}
