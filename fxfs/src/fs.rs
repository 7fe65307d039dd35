//! Path resolution and file/directory operations over the B-tree (spec §4.5).

use crate::bitmap::Bitmap;
use crate::block::{zero_block, BlockDevice, BLOCK_SIZE};
use crate::btree::key::{DIR_ENTRY, EXTENT_DATA, INODE_ITEM};
use crate::btree::{BTree, Key};
use crate::cache::BlockCache;
use crate::error::{FxfsError, Result};
use crate::format;
use crate::inode::{
    DirEntry, ExtentData, InodeItem, DT_DIR, DT_REG, INLINE_CAPACITY, S_IFDIR, S_IFREG,
};
use crate::superblock::Superblock;

/// Root inode; created by the formatter, never deleted.
pub const ROOT_INODE: u64 = 1;

/// Ties together the block device, cache, bitmap, B-tree, and superblock
/// into the operations clients actually invoke.
pub struct Filesystem<D: BlockDevice> {
    device: D,
    cache: BlockCache,
    bitmap: Bitmap,
    tree: BTree,
    sb: Superblock,
}

impl<D: BlockDevice> Filesystem<D> {
    /// Mounts an already-formatted device.
    pub fn mount(mut device: D) -> Result<Self> {
        let sb = Superblock::mount(&mut device)?;
        let bitmap = Bitmap::new(sb.bitmap_start, sb.total_blocks, sb.data_start, sb.free_blocks);
        let tree = BTree::new(sb.tree_root);
        Ok(Self {
            device,
            cache: BlockCache::new(),
            bitmap,
            tree,
            sb,
        })
    }

    /// Formats `device` fresh, then mounts it. Destructive: any existing
    /// contents are overwritten.
    pub fn format_new(mut device: D, total_blocks: u64, now: u64) -> Result<Self> {
        let sb = format::format(&mut device, total_blocks, now)?;
        let bitmap = Bitmap::new(sb.bitmap_start, sb.total_blocks, sb.data_start, sb.free_blocks);
        let tree = BTree::new(sb.tree_root);
        Ok(Self {
            device,
            cache: BlockCache::new(),
            bitmap,
            tree,
            sb,
        })
    }

    pub fn total_blocks(&self) -> u64 {
        self.sb.total_blocks
    }

    /// Ensures the bitmap is loaded, then returns the live free block count.
    pub fn free_blocks(&mut self) -> Result<u64> {
        self.bitmap.loaded_free_blocks(&mut self.device)
    }

    /// The generation every node written by the *next* mutation should
    /// carry — one past the last committed generation.
    fn working_generation(&self) -> u64 {
        self.sb.generation + 1
    }

    /// Bumps `generation`, flushes the bitmap, and writes both superblocks
    /// (spec §4.4 "Commit").
    pub fn commit(&mut self) -> Result<()> {
        self.sb.generation += 1;
        self.sb.tree_root = self.tree.root;
        self.sb.free_blocks = self.bitmap.loaded_free_blocks(&mut self.device)?;
        self.bitmap.flush(&mut self.device)?;
        self.sb.write_both(&mut self.device)?;
        Ok(())
    }

    fn load_inode(&mut self, inode: u64) -> Result<InodeItem> {
        let data = self
            .tree
            .search(&mut self.device, &mut self.cache, Key::new(inode, INODE_ITEM, 0))?
            .ok_or(FxfsError::NotFound)?;
        Ok(InodeItem::from_bytes(data))
    }

    pub fn stat(&mut self, inode: u64) -> Result<InodeItem> {
        self.load_inode(inode)
    }

    /// Resolves a `/`-separated path (leading slash optional, empty
    /// components skipped) to an inode number, starting from the root.
    pub fn resolve(&mut self, path: &str) -> Result<u64> {
        let mut current = ROOT_INODE;
        for component in path.split('/') {
            if component.is_empty() {
                continue;
            }
            let item = self.load_inode(current)?;
            if !item.is_dir() {
                return Err(FxfsError::NotADirectory);
            }
            current = self
                .dir_lookup(current, component)?
                .ok_or(FxfsError::NotFound)?;
        }
        Ok(current)
    }

    /// Splits a path into its parent directory and final component, e.g.
    /// `"/tmp/hello.txt"` into `("/tmp/", "hello.txt")`.
    fn split_path(path: &str) -> (&str, &str) {
        let trimmed = path.trim_end_matches('/');
        match trimmed.rfind('/') {
            Some(idx) => (&trimmed[..=idx], &trimmed[idx + 1..]),
            None => ("", trimmed),
        }
    }

    /// Finds the exact key under which `name` is stored among `dir`'s
    /// directory entries, resolving hash collisions by falling back to a
    /// full linear scan (spec §4.4 "Ordering and tie-breaks").
    fn find_dir_entry_key(&mut self, dir: u64, name: &str) -> Result<Option<Key>> {
        let hash = crate::inode::fnv1a_64(name.as_bytes());
        let primary = Key::new(dir, DIR_ENTRY, hash);
        if let Some(data) = self.tree.search(&mut self.device, &mut self.cache, primary)? {
            if DirEntry::from_bytes(data).name == name {
                return Ok(Some(primary));
            }
        }
        let mut found = None;
        self.tree
            .scan(&mut self.device, &mut self.cache, dir, DIR_ENTRY, |k, data| {
                if found.is_none() && DirEntry::from_bytes(data).name == name {
                    found = Some(k);
                }
            })?;
        Ok(found)
    }

    /// Looks up `name` within `dir`, returning its child inode if present.
    pub fn dir_lookup(&mut self, dir: u64, name: &str) -> Result<Option<u64>> {
        match self.find_dir_entry_key(dir, name)? {
            Some(key) => {
                let data = self
                    .tree
                    .search(&mut self.device, &mut self.cache, key)?
                    // `key` was found moments ago under the same, unmutated tree state.
                    .expect("directory entry vanished between lookups");
                Ok(Some(DirEntry::from_bytes(data).child_inode))
            }
            None => Ok(None),
        }
    }

    /// Stores a directory entry, probing past the entry's primary hash slot
    /// on collision so two differently-named entries that hash alike can
    /// both be stored (and both remain discoverable via the linear-scan
    /// fallback in [`Self::find_dir_entry_key`]).
    fn insert_dir_entry(&mut self, dir: u64, entry: &DirEntry) -> Result<()> {
        let mut offset = crate::inode::fnv1a_64(entry.name.as_bytes());
        let generation = self.working_generation();
        loop {
            let key = Key::new(dir, DIR_ENTRY, offset);
            match self.tree.insert(
                &mut self.device,
                &mut self.cache,
                &mut self.bitmap,
                generation,
                key,
                entry.to_bytes(),
            ) {
                Ok(()) => return Ok(()),
                Err(FxfsError::AlreadyExists) => {
                    offset = offset.wrapping_add(1);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Returns the owned, parsed `EXTENT_DATA` item of `inode`, if any.
    fn current_extent(&mut self, inode: u64) -> Result<Option<ExtentData>> {
        let data = self
            .tree
            .search(&mut self.device, &mut self.cache, Key::new(inode, EXTENT_DATA, 0))?;
        Ok(data.map(ExtentData::from_bytes))
    }

    fn free_extent(&mut self, disk_block: u64, num_blocks: u32) -> Result<()> {
        for i in 0..num_blocks as u64 {
            self.bitmap.free(&mut self.device, &mut self.cache, disk_block + i)?;
        }
        Ok(())
    }

    fn read_whole_extent(&mut self, disk_block: u64, num_blocks: u32) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(num_blocks as usize * BLOCK_SIZE);
        let mut buf = zero_block();
        for i in 0..num_blocks as u64 {
            self.device.read_block(disk_block + i, &mut buf)?;
            out.extend_from_slice(&buf);
        }
        Ok(out)
    }

    /// Allocates `n` blocks that must land contiguously, per the
    /// single-extent-per-file invariant (spec §4.5). Frees everything
    /// allocated so far and fails if contiguity ever breaks.
    fn alloc_contiguous(&mut self, n: u64) -> Result<u64> {
        let mut blocks = Vec::with_capacity(n as usize);
        blocks.push(self.bitmap.alloc(&mut self.device)?);
        for _ in 1..n {
            let b = match self.bitmap.alloc(&mut self.device) {
                Ok(b) => b,
                Err(e) => {
                    for blk in blocks {
                        self.bitmap.free(&mut self.device, &mut self.cache, blk)?;
                    }
                    return Err(e);
                }
            };
            if b != blocks.last().copied().unwrap() + 1 {
                blocks.push(b);
                for blk in blocks {
                    self.bitmap.free(&mut self.device, &mut self.cache, blk)?;
                }
                return Err(FxfsError::NonContiguousExtent);
            }
            blocks.push(b);
        }
        Ok(blocks[0])
    }

    fn replace_extent_item(&mut self, inode: u64, had_existing: bool, data: ExtentData) -> Result<()> {
        let key = Key::new(inode, EXTENT_DATA, 0);
        let bytes = data.to_bytes();
        let generation = self.working_generation();
        if had_existing {
            self.tree
                .update(&mut self.device, &mut self.cache, &mut self.bitmap, generation, key, bytes)
        } else {
            self.tree
                .insert(&mut self.device, &mut self.cache, &mut self.bitmap, generation, key, bytes)
        }
    }

    /// Reads up to `len` bytes of `inode` starting at `offset`.
    ///
    /// For extent-backed files this touches exactly one data block (spec
    /// §4.5 "File read"), so a single call never returns more than one
    /// block's worth of data.
    pub fn read(&mut self, inode: u64, offset: u64, len: u32) -> Result<Vec<u8>> {
        let item = self.load_inode(inode)?;
        if item.is_dir() {
            return self.read_dir(inode, offset, len);
        }
        if offset >= item.size {
            return Ok(Vec::new());
        }
        let want = (len as u64).min(item.size - offset) as usize;

        match self.current_extent(inode)? {
            None => Ok(Vec::new()),
            Some(ExtentData::Inline(data)) => {
                let start = offset as usize;
                let end = (start + want).min(data.len());
                Ok(data[start..end].to_vec())
            }
            Some(ExtentData::Extent { disk_block, .. }) => {
                let block_offset = offset / BLOCK_SIZE as u64;
                let intra = (offset % BLOCK_SIZE as u64) as usize;
                let mut buf = zero_block();
                self.device.read_block(disk_block + block_offset, &mut buf)?;
                let avail = BLOCK_SIZE - intra;
                let n = want.min(avail);
                Ok(buf[intra..intra + n].to_vec())
            }
        }
    }

    /// Packs up to `floor(byte_count / 72)` directory-entry records,
    /// skipping `record_offset` entries first.
    fn read_dir(&mut self, inode: u64, record_offset: u64, byte_count: u32) -> Result<Vec<u8>> {
        let mut entries = Vec::new();
        self.tree
            .scan(&mut self.device, &mut self.cache, inode, DIR_ENTRY, |_k, data| {
                entries.push(DirEntry::from_bytes(data));
            })?;

        let max_records = byte_count as usize / crate::protocol::DIR_RECORD_SIZE;
        let mut out = Vec::new();
        for entry in entries
            .into_iter()
            .skip(record_offset as usize)
            .take(max_records)
        {
            let child = self.load_inode(entry.child_inode)?;
            let file_type = if child.is_dir() { 1 } else { 0 };
            out.extend_from_slice(&crate::protocol::pack_dir_record(
                &entry.name,
                file_type,
                child.size as u32,
            ));
        }
        Ok(out)
    }

    /// Writes `data` at `cursor`, growing the file and switching between
    /// inline and extent-backed representations as needed (spec §4.5 "File
    /// write"). Returns the number of bytes written.
    pub fn write(&mut self, inode: u64, cursor: u64, data: &[u8]) -> Result<u32> {
        let mut item = self.load_inode(inode)?;
        let new_end = cursor + data.len() as u64;

        // Read the current EXTENT_DATA item, if any, before any delete —
        // search's slice would be invalidated by a subsequent mutation
        // (spec §4.4 "Lifetime rule").
        let existing = self.current_extent(inode)?;
        let had_existing = existing.is_some();

        if new_end <= INLINE_CAPACITY as u64 {
            let mut buf = match &existing {
                Some(ExtentData::Inline(d)) => d.clone(),
                _ => Vec::new(),
            };
            if (buf.len() as u64) < new_end {
                buf.resize(new_end as usize, 0);
            }
            buf[cursor as usize..cursor as usize + data.len()].copy_from_slice(data);

            if let Some(ExtentData::Extent { disk_block, num_blocks }) = existing {
                self.free_extent(disk_block, num_blocks)?;
            }
            self.replace_extent_item(inode, had_existing, ExtentData::Inline(buf))?;
        } else {
            let mut content = match &existing {
                Some(ExtentData::Inline(d)) => d.clone(),
                Some(ExtentData::Extent { disk_block, num_blocks }) => {
                    self.read_whole_extent(*disk_block, *num_blocks)?
                }
                None => Vec::new(),
            };
            if (content.len() as u64) < new_end {
                content.resize(new_end as usize, 0);
            }
            content[cursor as usize..cursor as usize + data.len()].copy_from_slice(data);

            let blocks_needed = (new_end + BLOCK_SIZE as u64 - 1) / BLOCK_SIZE as u64;
            content.resize((blocks_needed * BLOCK_SIZE as u64) as usize, 0);

            let disk_block = self.alloc_contiguous(blocks_needed)?;
            for i in 0..blocks_needed {
                let off = (i * BLOCK_SIZE as u64) as usize;
                let mut block = zero_block();
                block.copy_from_slice(&content[off..off + BLOCK_SIZE]);
                self.device.write_block(disk_block + i, &block)?;
                self.cache.insert(disk_block + i, &block);
            }

            if let Some(ExtentData::Extent {
                disk_block: old_block,
                num_blocks: old_count,
            }) = existing
            {
                self.free_extent(old_block, old_count)?;
            }
            self.replace_extent_item(
                inode,
                had_existing,
                ExtentData::Extent {
                    disk_block,
                    num_blocks: blocks_needed as u32,
                },
            )?;
        }

        item.size = item.size.max(new_end);
        let generation = self.working_generation();
        self.tree.update(
            &mut self.device,
            &mut self.cache,
            &mut self.bitmap,
            generation,
            Key::new(inode, INODE_ITEM, 0),
            item.to_bytes().to_vec(),
        )?;
        self.commit()?;
        Ok(data.len() as u32)
    }

    /// Creates a new file or directory at `path`.
    pub fn create(&mut self, path: &str, is_dir: bool) -> Result<u64> {
        let (parent_path, name) = Self::split_path(path);
        if name.is_empty() {
            return Err(FxfsError::MalformedRequest);
        }
        let parent = self.resolve(parent_path)?;
        let parent_item = self.load_inode(parent)?;
        if !parent_item.is_dir() {
            return Err(FxfsError::NotADirectory);
        }
        if self.dir_lookup(parent, name)?.is_some() {
            return Err(FxfsError::AlreadyExists);
        }

        let new_inode = self.sb.next_inode;
        self.sb.next_inode += 1;

        let mode = if is_dir { S_IFDIR | 0o755 } else { S_IFREG | 0o644 };
        let item = InodeItem {
            mode,
            uid: 0,
            gid: 0,
            nlinks: 1,
            size: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
        };
        let generation = self.working_generation();
        self.tree.insert(
            &mut self.device,
            &mut self.cache,
            &mut self.bitmap,
            generation,
            Key::new(new_inode, INODE_ITEM, 0),
            item.to_bytes().to_vec(),
        )?;

        let entry = DirEntry {
            child_inode: new_inode,
            dt_type: if is_dir { DT_DIR } else { DT_REG },
            name: name.to_string(),
        };
        self.insert_dir_entry(parent, &entry)?;

        self.commit()?;
        Ok(new_inode)
    }

    /// Removes the file or directory at `path`, returning its inode number
    /// so the caller (the handle server) can deactivate any open handles.
    ///
    /// Refuses to remove the root inode.
    pub fn remove(&mut self, path: &str) -> Result<u64> {
        let (parent_path, name) = Self::split_path(path);
        if name.is_empty() {
            return Err(FxfsError::MalformedRequest);
        }
        let parent = self.resolve(parent_path)?;
        let target = self
            .dir_lookup(parent, name)?
            .ok_or(FxfsError::NotFound)?;
        if target == ROOT_INODE {
            return Err(FxfsError::NotFound);
        }

        let key = self
            .find_dir_entry_key(parent, name)?
            .ok_or(FxfsError::NotFound)?;
        self.tree.delete(
            &mut self.device,
            &mut self.cache,
            &mut self.bitmap,
            self.working_generation(),
            key,
        )?;

        if let Some(extent) = self.current_extent(target)? {
            if let ExtentData::Extent { disk_block, num_blocks } = extent {
                self.free_extent(disk_block, num_blocks)?;
            }
            self.tree.delete(
                &mut self.device,
                &mut self.cache,
                &mut self.bitmap,
                self.working_generation(),
                Key::new(target, EXTENT_DATA, 0),
            )?;
        }
        self.tree.delete(
            &mut self.device,
            &mut self.cache,
            &mut self.bitmap,
            self.working_generation(),
            Key::new(target, INODE_ITEM, 0),
        )?;

        self.commit()?;
        Ok(target)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::block::FileBlockDevice;

    fn fresh_fs(blocks: u64) -> Filesystem<FileBlockDevice> {
        let f = tempfile::tempfile().unwrap();
        f.set_len(blocks * BLOCK_SIZE as u64).unwrap();
        let dev = FileBlockDevice::from_file(f, blocks);
        Filesystem::format_new(dev, blocks, 0).unwrap()
    }

    #[test]
    fn create_read_write_small_file() {
        let mut fs = fresh_fs(256);
        let inode = fs.create("/hello.txt", false).unwrap();
        let n = fs.write(inode, 0, b"hi\n").unwrap();
        assert_eq!(n, 3);
        let data = fs.read(inode, 0, 16).unwrap();
        assert_eq!(data, b"hi\n");
        let stat = fs.stat(inode).unwrap();
        assert_eq!(stat.size, 3);
    }

    #[test]
    fn directory_listing_contains_both_children() {
        let mut fs = fresh_fs(256);
        fs.create("/a", true).unwrap();
        fs.create("/b", true).unwrap();

        let root = fs.resolve("/").unwrap();
        let listing = fs.read(root, 0, 144).unwrap();
        assert_eq!(listing.len(), 144);
        let names: Vec<String> = listing
            .chunks(crate::protocol::DIR_RECORD_SIZE)
            .map(|rec| {
                let end = rec[0..64].iter().position(|&b| b == 0).unwrap_or(64);
                String::from_utf8_lossy(&rec[0..end]).into_owned()
            })
            .collect();
        assert!(names.contains(&"a".to_string()));
        assert!(names.contains(&"b".to_string()));
    }

    #[test]
    fn remove_frees_extent_and_inode_blocks() {
        let mut fs = fresh_fs(256);
        let inode = fs.create("/big.bin", false).unwrap();
        let payload = vec![7u8; 50_000];
        fs.write(inode, 0, &payload).unwrap();

        let free_before = fs.free_blocks().unwrap();
        fs.remove("/big.bin").unwrap();
        let free_after = fs.free_blocks().unwrap();

        let expected_extent_blocks = (50_000u64 + BLOCK_SIZE as u64 - 1) / BLOCK_SIZE as u64;
        assert_eq!(free_after, free_before + expected_extent_blocks + 1);
    }

    #[test]
    fn inline_to_extent_boundary() {
        let mut fs = fresh_fs(256);
        let inode = fs.create("/boundary.bin", false).unwrap();
        let first = vec![1u8; INLINE_CAPACITY];
        fs.write(inode, 0, &first).unwrap();
        assert_eq!(fs.stat(inode).unwrap().size, INLINE_CAPACITY as u64);

        fs.write(inode, INLINE_CAPACITY as u64, &[2u8]).unwrap();
        let stat = fs.stat(inode).unwrap();
        assert_eq!(stat.size, INLINE_CAPACITY as u64 + 1);

        let all = fs.read(inode, 0, BLOCK_SIZE as u32).unwrap();
        assert_eq!(&all[0..INLINE_CAPACITY], &first[..]);
        assert_eq!(all[INLINE_CAPACITY], 2);
    }

    #[test]
    fn removing_root_is_refused() {
        let mut fs = fresh_fs(64);
        assert!(fs.remove("/").is_err());
    }

    #[test]
    fn resolve_rejects_path_through_a_file() {
        let mut fs = fresh_fs(64);
        fs.create("/leaf.txt", false).unwrap();
        assert!(matches!(
            fs.resolve("/leaf.txt/nope"),
            Err(FxfsError::NotADirectory)
        ));
    }

    /// Simulates a genuine FNV-1a collision by planting a placeholder entry
    /// at exactly the offset `"second"`'s real hash lands on, then letting
    /// `create` insert `"second"` through the ordinary path. This forces the
    /// same `AlreadyExists` probing and hash-hit/name-mismatch scan fallback
    /// a true two-name collision would, without brute-forcing one.
    #[test]
    fn hash_collision_entries_both_resolve() {
        let mut fs = fresh_fs(64);
        let root = ROOT_INODE;

        let second_hash = crate::inode::fnv1a_64(b"second");
        let placeholder = DirEntry {
            child_inode: root,
            dt_type: DT_REG,
            name: "placeholder".to_string(),
        };
        let generation = fs.working_generation();
        fs.tree
            .insert(
                &mut fs.device,
                &mut fs.cache,
                &mut fs.bitmap,
                generation,
                Key::new(root, DIR_ENTRY, second_hash),
                placeholder.to_bytes(),
            )
            .unwrap();
        fs.commit().unwrap();

        let second_inode = fs.create("/second", false).unwrap();

        // The primary slot at `second_hash` is still the placeholder; both
        // names must remain independently resolvable via the scan fallback.
        assert_eq!(fs.dir_lookup(root, "placeholder").unwrap(), Some(root));
        assert_eq!(fs.dir_lookup(root, "second").unwrap(), Some(second_inode));

        let listing = fs.read(root, 0, 2 * crate::protocol::DIR_RECORD_SIZE as u32).unwrap();
        let names: Vec<String> = listing
            .chunks(crate::protocol::DIR_RECORD_SIZE)
            .map(|rec| {
                let end = rec[0..64].iter().position(|&b| b == 0).unwrap_or(64);
                String::from_utf8_lossy(&rec[0..end]).into_owned()
            })
            .collect();
        assert!(names.contains(&"placeholder".to_string()));
        assert!(names.contains(&"second".to_string()));
    }
}
