//! Item payloads: inodes, directory entries, and extent data (spec §3.5).

/// `mode` bit marking a directory, mirroring POSIX `S_IFDIR`.
pub const S_IFDIR: u16 = 0o040000;
/// `mode` bit marking a regular file, mirroring POSIX `S_IFREG`.
pub const S_IFREG: u16 = 0o100000;
/// Mask isolating the file-type bits of `mode`.
pub const S_IFMT: u16 = 0o170000;

/// Directory-entry `dt_type`: a regular file.
pub const DT_REG: u8 = 1;
/// Directory-entry `dt_type`: a directory.
pub const DT_DIR: u8 = 2;

/// Size of a serialized [`InodeItem`].
pub const INODE_ITEM_SIZE: usize = 40;
/// An extent reference, as opposed to inline data, is exactly this many
/// bytes.
pub const EXTENT_REF_SIZE: usize = 16;
/// Maximum payload size for inline file data before a write must switch to
/// an extent.
pub const INLINE_CAPACITY: usize = 3800;

/// The fixed 40-byte `INODE_ITEM` payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InodeItem {
    pub mode: u16,
    pub uid: u16,
    pub gid: u16,
    pub nlinks: u16,
    pub size: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
}

impl InodeItem {
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    pub fn to_bytes(&self) -> [u8; INODE_ITEM_SIZE] {
        let mut b = [0u8; INODE_ITEM_SIZE];
        b[0..2].copy_from_slice(&self.mode.to_le_bytes());
        b[2..4].copy_from_slice(&self.uid.to_le_bytes());
        b[4..6].copy_from_slice(&self.gid.to_le_bytes());
        b[6..8].copy_from_slice(&self.nlinks.to_le_bytes());
        b[8..16].copy_from_slice(&self.size.to_le_bytes());
        b[16..24].copy_from_slice(&self.atime.to_le_bytes());
        b[24..32].copy_from_slice(&self.mtime.to_le_bytes());
        b[32..40].copy_from_slice(&self.ctime.to_le_bytes());
        b
    }

    pub fn from_bytes(b: &[u8]) -> Self {
        Self {
            mode: u16::from_le_bytes(b[0..2].try_into().unwrap()),
            uid: u16::from_le_bytes(b[2..4].try_into().unwrap()),
            gid: u16::from_le_bytes(b[4..6].try_into().unwrap()),
            nlinks: u16::from_le_bytes(b[6..8].try_into().unwrap()),
            size: u64::from_le_bytes(b[8..16].try_into().unwrap()),
            atime: u64::from_le_bytes(b[16..24].try_into().unwrap()),
            mtime: u64::from_le_bytes(b[24..32].try_into().unwrap()),
            ctime: u64::from_le_bytes(b[32..40].try_into().unwrap()),
        }
    }
}

/// A directory entry's payload: `child_inode | dt_type | name_len | name`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub child_inode: u64,
    pub dt_type: u8,
    pub name: String,
}

impl DirEntry {
    pub fn to_bytes(&self) -> Vec<u8> {
        let name = self.name.as_bytes();
        let mut b = Vec::with_capacity(10 + name.len());
        b.extend_from_slice(&self.child_inode.to_le_bytes());
        b.push(self.dt_type);
        b.push(name.len() as u8);
        b.extend_from_slice(name);
        b
    }

    pub fn from_bytes(b: &[u8]) -> Self {
        let child_inode = u64::from_le_bytes(b[0..8].try_into().unwrap());
        let dt_type = b[8];
        let name_len = b[9] as usize;
        let name = String::from_utf8_lossy(&b[10..10 + name_len]).into_owned();
        Self {
            child_inode,
            dt_type,
            name,
        }
    }
}

/// An `EXTENT_DATA` payload: either a single contiguous extent reference or
/// inline data stored directly in the leaf.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExtentData {
    Extent { disk_block: u64, num_blocks: u32 },
    Inline(Vec<u8>),
}

impl ExtentData {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            ExtentData::Extent {
                disk_block,
                num_blocks,
            } => {
                let mut b = vec![0u8; EXTENT_REF_SIZE];
                b[0..8].copy_from_slice(&disk_block.to_le_bytes());
                b[8..12].copy_from_slice(&num_blocks.to_le_bytes());
                b
            }
            ExtentData::Inline(data) => data.clone(),
        }
    }

    /// Parses a payload, distinguishing extent references from inline data
    /// per spec §3.5: a payload is an extent reference only if it is exactly
    /// 16 bytes *and* its leading `disk_block` field is nonzero; anything
    /// else is inline.
    pub fn from_bytes(b: &[u8]) -> Self {
        if b.len() == EXTENT_REF_SIZE {
            let disk_block = u64::from_le_bytes(b[0..8].try_into().unwrap());
            if disk_block > 0 {
                let num_blocks = u32::from_le_bytes(b[8..12].try_into().unwrap());
                return ExtentData::Extent {
                    disk_block,
                    num_blocks,
                };
            }
        }
        ExtentData::Inline(b.to_vec())
    }
}

/// 64-bit FNV-1a hash, used to key directory entries (spec §3.5).
pub fn fnv1a_64(data: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}
