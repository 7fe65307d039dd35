//! Block device adapter (spec §4.1).
//!
//! Byte-addressed pread/pwrite over fixed [`BLOCK_SIZE`]-byte blocks. No
//! caching happens at this layer; callers go through [`crate::cache`].

use crate::error::{FxfsError, Result};
use std::fs::File;
use std::io;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

/// The fixed block size of the filesystem.
pub const BLOCK_SIZE: usize = 4096;

/// A raw, in-memory representation of one on-disk block.
pub type BlockBuf = [u8; BLOCK_SIZE];

/// Returns a zeroed block buffer.
pub fn zero_block() -> BlockBuf {
    [0u8; BLOCK_SIZE]
}

/// A byte-addressed block device, read and written one [`BLOCK_SIZE`]-byte
/// block at a time.
pub trait BlockDevice {
    /// Reads block number `n` into `buf`.
    fn read_block(&mut self, n: u64, buf: &mut BlockBuf) -> Result<()>;

    /// Writes `buf` to block number `n`.
    fn write_block(&mut self, n: u64, buf: &BlockBuf) -> Result<()>;

    /// Returns the total number of blocks backing this device.
    fn block_count(&self) -> u64;
}

/// A [`BlockDevice`] backed by a regular file or a Unix block device.
pub struct FileBlockDevice {
    file: File,
    block_count: u64,
}

impl FileBlockDevice {
    /// Opens `path` as a block device, probing its size.
    ///
    /// For a regular file, the size is its length rounded down to a whole
    /// number of blocks. For a block device, the kernel is queried via
    /// `ioctl(BLKGETSIZE64)`.
    pub fn open(path: &Path, file: File) -> Result<Self> {
        let metadata = file.metadata()?;
        let total_bytes = if metadata.file_type().is_block_device() {
            block_device_size(&file)?
        } else {
            metadata.len()
        };
        let _ = path;
        Ok(Self {
            file,
            block_count: total_bytes / BLOCK_SIZE as u64,
        })
    }

    /// Creates a `FileBlockDevice` directly over an already-opened file,
    /// trusting `block_count` (used by tests against sparse files created
    /// with a known size).
    pub fn from_file(file: File, block_count: u64) -> Self {
        Self { file, block_count }
    }
}

impl BlockDevice for FileBlockDevice {
    fn read_block(&mut self, n: u64, buf: &mut BlockBuf) -> Result<()> {
        self.file.seek(SeekFrom::Start(n * BLOCK_SIZE as u64))?;
        self.file.read_exact(buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                FxfsError::ImpossibleBlock(n)
            } else {
                FxfsError::Device(e)
            }
        })
    }

    fn write_block(&mut self, n: u64, buf: &BlockBuf) -> Result<()> {
        self.file.seek(SeekFrom::Start(n * BLOCK_SIZE as u64))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }
}

/// ioctl macro: command.
macro_rules! ioc {
    ($a:expr, $b:expr, $c:expr, $d:expr) => {
        (($a) << 30) | (($b) << 8) | ($c) | (($d) << 16)
    };
}

/// ioctl macro: read command.
macro_rules! ior {
    ($a:expr, $b:expr, $c:ty) => {
        ioc!(2u64, $a, $b, std::mem::size_of::<$c>() as u64)
    };
}

/// ioctl command: get size of disk in bytes.
const BLKGETSIZE64: u64 = ior!(0x12, 114, u64);

fn block_device_size(file: &File) -> Result<u64> {
    use std::os::fd::AsRawFd;

    let mut size: u64 = 0;
    let ret = unsafe { libc::ioctl(file.as_raw_fd(), BLKGETSIZE64 as _, &mut size) };
    if ret < 0 {
        return Err(FxfsError::Device(io::Error::last_os_error()));
    }
    Ok(size)
}
