//! Superblock byte layout and primary/backup durability (spec §3.2, §6.1).

use crate::block::{zero_block, BlockBuf, BlockDevice};
use crate::error::{FxfsError, Result};

/// The superblock's on-disk signature.
pub const MAGIC: [u8; 8] = *b"FXFS0001";
/// Block holding the primary superblock.
pub const PRIMARY_BLOCK: u64 = 0;
/// Block holding the backup superblock.
pub const BACKUP_BLOCK: u64 = 1;
/// The bitmap always starts at block 2, per spec §3.2.
pub const BITMAP_START: u64 = 2;
/// Offset of the checksum field within the superblock.
const CHECKSUM_OFFSET: usize = 72;
/// Number of leading bytes covered by the checksum.
const CHECKSUM_COVERS: usize = 80;

/// The filesystem's superblock, duplicated byte-identically at blocks 0 and 1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Superblock {
    pub block_size: u32,
    pub total_blocks: u64,
    pub tree_root: u64,
    pub next_inode: u64,
    pub free_blocks: u64,
    pub generation: u64,
    pub bitmap_start: u64,
    pub data_start: u64,
}

impl Superblock {
    /// Serializes the superblock to a zero-padded 4096-byte block, with the
    /// checksum computed and filled in.
    pub fn to_block(&self) -> BlockBuf {
        let mut b = zero_block();
        b[0..8].copy_from_slice(&MAGIC);
        b[8..12].copy_from_slice(&self.block_size.to_le_bytes());
        // bytes 12..16 reserved, left zero
        b[16..24].copy_from_slice(&self.total_blocks.to_le_bytes());
        b[24..32].copy_from_slice(&self.tree_root.to_le_bytes());
        b[32..40].copy_from_slice(&self.next_inode.to_le_bytes());
        b[40..48].copy_from_slice(&self.free_blocks.to_le_bytes());
        b[48..56].copy_from_slice(&self.generation.to_le_bytes());
        b[56..64].copy_from_slice(&self.bitmap_start.to_le_bytes());
        b[64..72].copy_from_slice(&self.data_start.to_le_bytes());
        // The checksum covers bytes [0..80) with the checksum field itself
        // (at [72..76)) zeroed.
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&b[0..CHECKSUM_OFFSET]);
        hasher.update(&b[CHECKSUM_OFFSET + 4..CHECKSUM_COVERS]);
        let checksum = hasher.finalize();
        b[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_le_bytes());
        b
    }

    /// Parses and validates a 4096-byte block as a superblock.
    ///
    /// Fails with [`FxfsError::BadMagic`] or [`FxfsError::ChecksumMismatch`]
    /// if the block does not describe a valid `FXFS0001` superblock.
    pub fn from_block(b: &BlockBuf) -> Result<Self> {
        if b[0..8] != MAGIC {
            return Err(FxfsError::BadMagic);
        }
        let stored_checksum = u32::from_le_bytes(b[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].try_into().unwrap());
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&b[0..CHECKSUM_OFFSET]);
        hasher.update(&b[CHECKSUM_OFFSET + 4..CHECKSUM_COVERS]);
        if hasher.finalize() != stored_checksum {
            return Err(FxfsError::ChecksumMismatch);
        }

        let block_size = u32::from_le_bytes(b[8..12].try_into().unwrap());
        let total_blocks = u64::from_le_bytes(b[16..24].try_into().unwrap());
        let tree_root = u64::from_le_bytes(b[24..32].try_into().unwrap());
        let next_inode = u64::from_le_bytes(b[32..40].try_into().unwrap());
        let free_blocks = u64::from_le_bytes(b[40..48].try_into().unwrap());
        let generation = u64::from_le_bytes(b[48..56].try_into().unwrap());
        let bitmap_start = u64::from_le_bytes(b[56..64].try_into().unwrap());
        let data_start = u64::from_le_bytes(b[64..72].try_into().unwrap());

        Ok(Self {
            block_size,
            total_blocks,
            tree_root,
            next_inode,
            free_blocks,
            generation,
            bitmap_start,
            data_start,
        })
    }

    /// Writes this superblock byte-identically to both the primary and
    /// backup blocks.
    pub fn write_both<D: BlockDevice>(&self, device: &mut D) -> Result<()> {
        let block = self.to_block();
        device.write_block(PRIMARY_BLOCK, &block)?;
        device.write_block(BACKUP_BLOCK, &block)?;
        Ok(())
    }

    /// Loads the filesystem's superblock, preferring the primary if it is
    /// valid and has the higher generation, falling back to the backup
    /// otherwise (spec §4.4 "Commit", §8 property 4).
    pub fn mount<D: BlockDevice>(device: &mut D) -> Result<Self> {
        let mut buf = zero_block();
        device.read_block(PRIMARY_BLOCK, &mut buf)?;
        let primary = Self::from_block(&buf);

        device.read_block(BACKUP_BLOCK, &mut buf)?;
        let backup = Self::from_block(&buf);

        match (primary, backup) {
            (Ok(p), Ok(b)) => {
                if p.generation >= b.generation {
                    Ok(p)
                } else {
                    Ok(b)
                }
            }
            (Ok(p), Err(_)) => Ok(p),
            (Err(_), Ok(b)) => Ok(b),
            (Err(e), Err(_)) => Err(e),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::block::{FileBlockDevice, BLOCK_SIZE};

    fn sample() -> Superblock {
        Superblock {
            block_size: BLOCK_SIZE as u32,
            total_blocks: 1024,
            tree_root: 10,
            next_inode: 2,
            free_blocks: 900,
            generation: 5,
            bitmap_start: BITMAP_START,
            data_start: 10,
        }
    }

    #[test]
    fn round_trips_through_bytes() {
        let sb = sample();
        let block = sb.to_block();
        let parsed = Superblock::from_block(&block).unwrap();
        assert_eq!(sb, parsed);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut block = sample().to_block();
        block[0] = b'X';
        assert!(matches!(
            Superblock::from_block(&block),
            Err(FxfsError::BadMagic)
        ));
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let mut block = sample().to_block();
        block[100] ^= 0xff;
        assert!(matches!(
            Superblock::from_block(&block),
            Err(FxfsError::ChecksumMismatch)
        ));
    }

    #[test]
    fn mount_prefers_higher_generation_primary() {
        let f = tempfile::tempfile().unwrap();
        f.set_len(16 * BLOCK_SIZE as u64).unwrap();
        let mut dev = FileBlockDevice::from_file(f, 16);

        let mut old = sample();
        old.generation = 1;
        let mut new = sample();
        new.generation = 2;

        dev.write_block(PRIMARY_BLOCK, &new.to_block()).unwrap();
        dev.write_block(BACKUP_BLOCK, &old.to_block()).unwrap();

        let loaded = Superblock::mount(&mut dev).unwrap();
        assert_eq!(loaded.generation, 2);
    }

    #[test]
    fn mount_falls_back_to_backup_when_primary_corrupt() {
        let f = tempfile::tempfile().unwrap();
        f.set_len(16 * BLOCK_SIZE as u64).unwrap();
        let mut dev = FileBlockDevice::from_file(f, 16);

        let sb = sample();
        let mut corrupt = sb.to_block();
        corrupt[0] = 0; // destroy magic
        dev.write_block(PRIMARY_BLOCK, &corrupt).unwrap();
        dev.write_block(BACKUP_BLOCK, &sb.to_block()).unwrap();

        let loaded = Superblock::mount(&mut dev).unwrap();
        assert_eq!(loaded, sb);
    }

    #[test]
    fn mount_fails_when_both_invalid() {
        let f = tempfile::tempfile().unwrap();
        f.set_len(16 * BLOCK_SIZE as u64).unwrap();
        let mut dev = FileBlockDevice::from_file(f, 16);
        assert!(Superblock::mount(&mut dev).is_err());
    }
}
