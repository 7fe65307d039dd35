//! Initial on-disk layout, shared by the offline formatter and the server's
//! boot-time "format if missing" path so both produce bit-identical
//! filesystems (spec §2, §6.4).

use crate::bitmap::Bitmap;
use crate::block::BlockDevice;
use crate::btree::key::INODE_ITEM;
use crate::btree::{BTree, Key, LeafItem, Node};
use crate::error::Result;
use crate::inode::{InodeItem, S_IFDIR};
use crate::superblock::{Superblock, BITMAP_START};

/// Root inode's fixed mode: a directory, `rwxr-xr-x`.
const ROOT_MODE: u16 = S_IFDIR | 0o755;

/// Formats `device` as a fresh filesystem of `total_blocks` blocks,
/// containing only the empty root directory (inode 1).
///
/// `now` is the Unix timestamp stamped on the root inode's `atime`/`mtime`/
/// `ctime`; callers supply it so this function stays free of a direct
/// dependency on wall-clock time.
pub fn format<D: BlockDevice>(device: &mut D, total_blocks: u64, now: u64) -> Result<Superblock> {
    let bitmap_blocks = Bitmap::blocks_for(total_blocks);
    let data_start = BITMAP_START + bitmap_blocks;
    let root_block = data_start;
    // Superblocks (2) + bitmap region + the root leaf itself are all used
    // from block 0 up to and including `root_block`.
    let used_blocks_end = root_block + 1;

    let mut bitmap = Bitmap::new_in_memory(BITMAP_START, total_blocks, data_start, used_blocks_end);

    let root_inode = InodeItem {
        mode: ROOT_MODE,
        uid: 0,
        gid: 0,
        nlinks: 1,
        size: 0,
        atime: now,
        mtime: now,
        ctime: now,
    };
    let root_leaf = Node::Leaf {
        generation: 0,
        items: vec![LeafItem {
            key: Key::new(1, INODE_ITEM, 0),
            data: root_inode.to_bytes().to_vec(),
        }],
    };
    device.write_block(root_block, &root_leaf.to_block()?)?;

    bitmap.flush(device)?;

    let sb = Superblock {
        block_size: crate::block::BLOCK_SIZE as u32,
        total_blocks,
        tree_root: root_block,
        next_inode: 2,
        free_blocks: bitmap.free_blocks(),
        generation: 0,
        bitmap_start: BITMAP_START,
        data_start,
    };
    sb.write_both(device)?;
    Ok(sb)
}

/// Returns the [`BTree`] rooted at a freshly formatted filesystem's root
/// leaf. Convenience for callers that format and immediately mount.
pub fn tree_of(sb: &Superblock) -> BTree {
    BTree::new(sb.tree_root)
}
