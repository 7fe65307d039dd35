//! The copy-on-write B-tree engine (spec §4.4).
//!
//! Every mutation allocates a fresh block for the node being rewritten,
//! writes it, and only then frees the old one — so a crash mid-write never
//! observes a torn node. Node splitting is not implemented (spec §9
//! Non-goals): a v1 tree is always a single leaf rooted at `root`, and an
//! insert that would overflow that leaf fails with [`FxfsError::LeafFull`]
//! instead of splitting.

pub mod key;
pub mod node;

pub use key::Key;
pub use node::{LeafItem, Node};

use crate::bitmap::Bitmap;
use crate::block::BlockDevice;
use crate::cache::BlockCache;
use crate::error::{FxfsError, Result};

/// Bounds tree descent so a corrupt chain of internal nodes cannot loop
/// forever (spec §4.4).
const MAX_DEPTH: usize = 10;

/// A B-tree, identified by its root block number.
#[derive(Clone, Copy, Debug)]
pub struct BTree {
    pub root: u64,
}

impl BTree {
    /// Wraps an existing root block number.
    pub fn new(root: u64) -> Self {
        Self { root }
    }

    /// Looks up `key`, returning its payload if present.
    ///
    /// The returned slice borrows from `cache`: callers cannot issue another
    /// cache access (which could evict the slot backing it) while holding
    /// this reference. That is enforced by the borrow checker, not by a
    /// runtime check.
    pub fn search<'c, D: BlockDevice>(
        &self,
        device: &mut D,
        cache: &'c mut BlockCache,
        key: Key,
    ) -> Result<Option<&'c [u8]>> {
        let mut current = self.root;
        for _ in 0..MAX_DEPTH {
            let block = cache.get(device, current)?;
            if node::level_of(block) == 0 {
                return Ok(node::leaf_lookup(block, key));
            }
            current = node::internal_descend(block, key);
        }
        Err(FxfsError::ImpossibleBlock(current))
    }

    /// Calls `f` with every `(key, payload)` pair whose key falls in the
    /// `(inode, item_type)` range, in ascending offset order (spec §4.4
    /// "Range scan").
    pub fn scan<D: BlockDevice>(
        &self,
        device: &mut D,
        cache: &mut BlockCache,
        inode: u64,
        item_type: u8,
        mut f: impl FnMut(Key, &[u8]),
    ) -> Result<()> {
        let mut current = self.root;
        for _ in 0..MAX_DEPTH {
            let block = cache.get(device, current)?;
            if node::level_of(block) == 0 {
                for (k, data) in node::leaf_iter(block) {
                    if k.in_range(inode, item_type) {
                        f(k, data);
                    }
                }
                return Ok(());
            }
            current = node::internal_descend(block, Key::range_start(inode, item_type));
        }
        Err(FxfsError::ImpossibleBlock(current))
    }

    /// Fetches the root leaf, copy-on-write, for a mutation: reads and
    /// parses the current root into an owned [`Node::Leaf`].
    ///
    /// Any non-leaf root would mean a v1 tree somehow grew internal nodes,
    /// which nothing in this crate ever produces.
    fn read_root_leaf<D: BlockDevice>(
        &self,
        device: &mut D,
        cache: &mut BlockCache,
    ) -> Result<Vec<LeafItem>> {
        let block = cache.get(device, self.root)?;
        match Node::from_block(block)? {
            Node::Leaf { items, .. } => Ok(items),
            Node::Internal { .. } => Err(FxfsError::LeafFull),
        }
    }

    /// Writes `items` as the tree's new root, copy-on-write: the new block
    /// is allocated and written before the old root is freed, so a crash in
    /// between leaves the previous, still-valid root in place.
    fn commit_root<D: BlockDevice>(
        &mut self,
        device: &mut D,
        cache: &mut BlockCache,
        bitmap: &mut Bitmap,
        generation: u64,
        items: Vec<LeafItem>,
    ) -> Result<()> {
        let node = Node::Leaf { generation, items };
        let block = node.to_block()?;

        let new_root = bitmap.alloc(device)?;
        if let Err(e) = device.write_block(new_root, &block) {
            bitmap.free(device, cache, new_root)?;
            return Err(e);
        }
        cache.insert(new_root, &block);

        let old_root = self.root;
        self.root = new_root;
        bitmap.free(device, cache, old_root)?;
        Ok(())
    }

    /// Inserts a new key/payload pair.
    ///
    /// Fails with [`FxfsError::AlreadyExists`] if `key` is already present,
    /// or [`FxfsError::LeafFull`] if adding it would overflow the leaf.
    pub fn insert<D: BlockDevice>(
        &mut self,
        device: &mut D,
        cache: &mut BlockCache,
        bitmap: &mut Bitmap,
        generation: u64,
        key: Key,
        data: Vec<u8>,
    ) -> Result<()> {
        let mut items = self.read_root_leaf(device, cache)?;
        let pos = items.partition_point(|i| i.key < key);
        if items.get(pos).map(|i| i.key) == Some(key) {
            return Err(FxfsError::AlreadyExists);
        }
        items.insert(pos, LeafItem { key, data });
        self.commit_root(device, cache, bitmap, generation, items)
    }

    /// Replaces the payload of an existing key.
    ///
    /// Fails with [`FxfsError::NotFound`] if `key` is absent, or
    /// [`FxfsError::LeafFull`] if the new payload would overflow the leaf.
    pub fn update<D: BlockDevice>(
        &mut self,
        device: &mut D,
        cache: &mut BlockCache,
        bitmap: &mut Bitmap,
        generation: u64,
        key: Key,
        data: Vec<u8>,
    ) -> Result<()> {
        let mut items = self.read_root_leaf(device, cache)?;
        let pos = items
            .iter()
            .position(|i| i.key == key)
            .ok_or(FxfsError::NotFound)?;
        items[pos].data = data;
        self.commit_root(device, cache, bitmap, generation, items)
    }

    /// Removes `key`. Fails with [`FxfsError::NotFound`] if absent.
    pub fn delete<D: BlockDevice>(
        &mut self,
        device: &mut D,
        cache: &mut BlockCache,
        bitmap: &mut Bitmap,
        generation: u64,
        key: Key,
    ) -> Result<()> {
        let mut items = self.read_root_leaf(device, cache)?;
        let pos = items
            .iter()
            .position(|i| i.key == key)
            .ok_or(FxfsError::NotFound)?;
        items.remove(pos);
        self.commit_root(device, cache, bitmap, generation, items)
    }
}

#[cfg(test)]
mod test {
    use super::key::{DIR_ENTRY, INODE_ITEM};
    use super::*;
    use crate::block::{FileBlockDevice, BLOCK_SIZE};

    fn fresh_tree() -> (FileBlockDevice, BlockCache, Bitmap, BTree) {
        let blocks = 64;
        let f = tempfile::tempfile().unwrap();
        f.set_len(blocks * BLOCK_SIZE as u64).unwrap();
        let mut dev = FileBlockDevice::from_file(f, blocks);
        let mut cache = BlockCache::new();
        let mut bitmap = Bitmap::new_in_memory(2, blocks, 3, 3);

        let root = bitmap.alloc(&mut dev).unwrap();
        let empty = Node::empty_leaf(0).to_block().unwrap();
        dev.write_block(root, &empty).unwrap();
        cache.insert(root, &empty);

        (dev, cache, bitmap, BTree::new(root))
    }

    #[test]
    fn insert_then_search_finds_it() {
        let (mut dev, mut cache, mut bitmap, mut tree) = fresh_tree();
        let key = Key::new(5, INODE_ITEM, 0);
        tree.insert(&mut dev, &mut cache, &mut bitmap, 1, key, vec![1, 2, 3])
            .unwrap();

        let found = tree.search(&mut dev, &mut cache, key).unwrap();
        assert_eq!(found, Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let (mut dev, mut cache, mut bitmap, mut tree) = fresh_tree();
        let key = Key::new(5, INODE_ITEM, 0);
        tree.insert(&mut dev, &mut cache, &mut bitmap, 1, key, vec![1])
            .unwrap();
        let err = tree
            .insert(&mut dev, &mut cache, &mut bitmap, 2, key, vec![2])
            .unwrap_err();
        assert!(matches!(err, FxfsError::AlreadyExists));
    }

    #[test]
    fn update_replaces_payload() {
        let (mut dev, mut cache, mut bitmap, mut tree) = fresh_tree();
        let key = Key::new(5, INODE_ITEM, 0);
        tree.insert(&mut dev, &mut cache, &mut bitmap, 1, key, vec![1])
            .unwrap();
        tree.update(&mut dev, &mut cache, &mut bitmap, 2, key, vec![9, 9])
            .unwrap();
        let found = tree.search(&mut dev, &mut cache, key).unwrap();
        assert_eq!(found, Some(&[9u8, 9][..]));
    }

    #[test]
    fn update_missing_key_is_not_found() {
        let (mut dev, mut cache, mut bitmap, mut tree) = fresh_tree();
        let key = Key::new(5, INODE_ITEM, 0);
        let err = tree
            .update(&mut dev, &mut cache, &mut bitmap, 1, key, vec![1])
            .unwrap_err();
        assert!(matches!(err, FxfsError::NotFound));
    }

    #[test]
    fn delete_removes_key_and_frees_old_root() {
        let (mut dev, mut cache, mut bitmap, mut tree) = fresh_tree();
        let key = Key::new(5, INODE_ITEM, 0);
        tree.insert(&mut dev, &mut cache, &mut bitmap, 1, key, vec![1])
            .unwrap();
        let free_before = bitmap.free_blocks();
        tree.delete(&mut dev, &mut cache, &mut bitmap, 2, key)
            .unwrap();
        assert_eq!(bitmap.free_blocks(), free_before + 1);
        assert_eq!(tree.search(&mut dev, &mut cache, key).unwrap(), None);
    }

    #[test]
    fn scan_returns_items_in_range_in_order() {
        let (mut dev, mut cache, mut bitmap, mut tree) = fresh_tree();
        tree.insert(
            &mut dev,
            &mut cache,
            &mut bitmap,
            1,
            Key::new(5, DIR_ENTRY, 10),
            vec![1],
        )
        .unwrap();
        tree.insert(
            &mut dev,
            &mut cache,
            &mut bitmap,
            2,
            Key::new(5, DIR_ENTRY, 2),
            vec![2],
        )
        .unwrap();
        tree.insert(
            &mut dev,
            &mut cache,
            &mut bitmap,
            3,
            Key::new(5, INODE_ITEM, 0),
            vec![3],
        )
        .unwrap();

        let mut seen = Vec::new();
        tree.scan(&mut dev, &mut cache, 5, DIR_ENTRY, |k, data| {
            seen.push((k.offset, data.to_vec()));
        })
        .unwrap();
        assert_eq!(seen, vec![(2, vec![2]), (10, vec![1])]);
    }

    #[test]
    fn leaf_full_insert_is_refused_not_split() {
        let (mut dev, mut cache, mut bitmap, mut tree) = fresh_tree();
        let big = vec![0u8; BLOCK_SIZE];
        let err = tree
            .insert(
                &mut dev,
                &mut cache,
                &mut bitmap,
                1,
                Key::new(5, INODE_ITEM, 0),
                big,
            )
            .unwrap_err();
        assert!(matches!(err, FxfsError::LeafFull));
    }
}
