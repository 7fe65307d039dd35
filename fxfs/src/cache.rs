//! Block cache (spec §4.2).
//!
//! A fixed 16-slot cache with approximate-LRU (least-use-count) eviction.
//! The cache never writes back: every mutation writes through the device
//! first and then refreshes (or invalidates) the matching slot.
//!
//! Borrowing a block via [`BlockCache::get`] ties the returned slice's
//! lifetime to `&mut BlockCache`. Rust's borrow checker therefore enforces
//! the spec's "cached-slice invalidation" discipline for free: a caller
//! cannot call `get`/`insert`/`invalidate` again (which may evict or
//! overwrite the slot backing an earlier borrow) while that borrow is still
//! live.

use crate::block::{zero_block, BlockBuf, BlockDevice};
use crate::error::Result;

/// Number of cache slots.
pub const CACHE_SLOTS: usize = 16;

struct Slot {
    block: u64,
    valid: bool,
    use_count: u64,
    data: BlockBuf,
}

impl Slot {
    fn empty() -> Self {
        Self {
            block: 0,
            valid: false,
            use_count: 0,
            data: zero_block(),
        }
    }
}

/// The fixed-size block cache.
pub struct BlockCache {
    slots: [Slot; CACHE_SLOTS],
    clock: u64,
}

impl BlockCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| Slot::empty()),
            clock: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Returns a cached block, reading it from `device` on a miss.
    pub fn get<D: BlockDevice>(&mut self, device: &mut D, n: u64) -> Result<&BlockBuf> {
        if let Some(idx) = self.slots.iter().position(|s| s.valid && s.block == n) {
            let tick = self.tick();
            self.slots[idx].use_count = tick;
            return Ok(&self.slots[idx].data);
        }

        let mut data = zero_block();
        device.read_block(n, &mut data)?;

        let idx = self.evict_slot();
        let tick = self.tick();
        self.slots[idx] = Slot {
            block: n,
            valid: true,
            use_count: tick,
            data,
        };
        Ok(&self.slots[idx].data)
    }

    /// Writes `data` into the cache for block `n`, without touching the
    /// device. Used by writers that already wrote through and want the
    /// cache to reflect the new contents instead of being invalidated.
    pub fn insert(&mut self, n: u64, data: &BlockBuf) {
        if let Some(idx) = self.slots.iter().position(|s| s.valid && s.block == n) {
            self.slots[idx].data = *data;
            let tick = self.tick();
            self.slots[idx].use_count = tick;
            return;
        }
        let idx = self.evict_slot();
        let tick = self.tick();
        self.slots[idx] = Slot {
            block: n,
            valid: true,
            use_count: tick,
            data: *data,
        };
    }

    /// Clears any slot caching block `n`.
    pub fn invalidate(&mut self, n: u64) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.valid && s.block == n) {
            slot.valid = false;
        }
    }

    /// Picks a slot to evict: an invalid slot if one exists, else the one
    /// with the lowest use counter.
    fn evict_slot(&self) -> usize {
        if let Some(idx) = self.slots.iter().position(|s| !s.valid) {
            return idx;
        }
        self.slots
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| s.use_count)
            .map(|(idx, _)| idx)
            .expect("cache has at least one slot")
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::block::{BlockDevice, BLOCK_SIZE};
    use crate::error::Result;

    /// An in-memory block device used only to exercise the cache in
    /// isolation from the real file-backed device.
    struct MemDevice(Vec<BlockBuf>);

    impl MemDevice {
        fn new(blocks: usize) -> Self {
            Self(vec![zero_block(); blocks])
        }
    }

    impl BlockDevice for MemDevice {
        fn read_block(&mut self, n: u64, buf: &mut BlockBuf) -> Result<()> {
            *buf = self.0[n as usize];
            Ok(())
        }

        fn write_block(&mut self, n: u64, buf: &BlockBuf) -> Result<()> {
            self.0[n as usize] = *buf;
            Ok(())
        }

        fn block_count(&self) -> u64 {
            self.0.len() as u64
        }
    }

    #[test]
    fn get_fills_from_device_on_miss() {
        let mut dev = MemDevice::new(4);
        let mut block = zero_block();
        block[0] = 7;
        dev.write_block(2, &block).unwrap();

        let mut cache = BlockCache::new();
        let got = cache.get(&mut dev, 2).unwrap();
        assert_eq!(got[0], 7);
    }

    #[test]
    fn eviction_prefers_invalid_slot_then_least_used() {
        let mut dev = MemDevice::new(CACHE_SLOTS + 2);
        let mut cache = BlockCache::new();

        // Fill every slot.
        for i in 0..CACHE_SLOTS as u64 {
            cache.get(&mut dev, i).unwrap();
        }
        // Touch every slot except 0 again, so slot 0 has the lowest counter.
        for i in 1..CACHE_SLOTS as u64 {
            cache.get(&mut dev, i).unwrap();
        }
        // A new block must evict block 0's slot.
        cache.get(&mut dev, CACHE_SLOTS as u64).unwrap();
        assert!(!cache.slots.iter().any(|s| s.valid && s.block == 0));
    }

    #[test]
    fn invalidate_forces_a_fresh_read() {
        let mut dev = MemDevice::new(2);
        let mut cache = BlockCache::new();
        cache.get(&mut dev, 0).unwrap();

        let mut updated = zero_block();
        updated[0] = 42;
        dev.write_block(0, &updated).unwrap();
        cache.invalidate(0);

        let got = cache.get(&mut dev, 0).unwrap();
        assert_eq!(got[0], 42);
    }

    #[test]
    fn insert_writes_through_without_touching_device() {
        let mut dev = MemDevice::new(2);
        let mut cache = BlockCache::new();
        let mut data = zero_block();
        data[1] = 9;
        cache.insert(0, &data);

        let got = cache.get(&mut dev, 0).unwrap();
        // Device was never written, but the cache already holds the value.
        assert_eq!(got[1], 9);
    }
}
