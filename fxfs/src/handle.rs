//! The server's opaque handle table (spec §3.7).

use crate::error::{FxfsError, Result};

/// Number of handle slots. Slot 0 is reserved invalid, leaving 1..32
/// eligible for allocation.
pub const HANDLE_SLOTS: usize = 32;

/// Inode number of the read-only virtual control file.
pub const CTL_INODE: u64 = u64::MAX;

#[derive(Clone, Copy, Debug)]
struct Entry {
    inode: u64,
    cursor: u64,
    active: bool,
}

/// A fixed table of up to 32 open handles.
pub struct HandleTable {
    entries: [Entry; HANDLE_SLOTS],
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            entries: [Entry {
                inode: 0,
                cursor: 0,
                active: false,
            }; HANDLE_SLOTS],
        }
    }

    /// Opens a handle bound to `inode`, choosing the lowest free slot in
    /// `1..32`. Slot 0 is never allocated.
    pub fn open(&mut self, inode: u64) -> Result<u32> {
        for slot in 1..HANDLE_SLOTS {
            if !self.entries[slot].active {
                self.entries[slot] = Entry {
                    inode,
                    cursor: 0,
                    active: true,
                };
                return Ok(slot as u32);
            }
        }
        Err(FxfsError::HandleTableFull)
    }

    fn entry(&self, handle: u32) -> Result<&Entry> {
        let slot = handle as usize;
        if slot == 0 || slot >= HANDLE_SLOTS || !self.entries[slot].active {
            return Err(FxfsError::InvalidHandle(handle));
        }
        Ok(&self.entries[slot])
    }

    pub fn inode_of(&self, handle: u32) -> Result<u64> {
        Ok(self.entry(handle)?.inode)
    }

    pub fn cursor_of(&self, handle: u32) -> Result<u64> {
        Ok(self.entry(handle)?.cursor)
    }

    pub fn advance_cursor(&mut self, handle: u32, by: u64) -> Result<()> {
        let slot = handle as usize;
        self.entry(handle)?;
        self.entries[slot].cursor += by;
        Ok(())
    }

    /// Closes `handle`. Idempotent: closing an already-inactive handle, or
    /// one out of range, is silently ignored (spec §5).
    pub fn close(&mut self, handle: u32) {
        let slot = handle as usize;
        if slot != 0 && slot < HANDLE_SLOTS {
            self.entries[slot].active = false;
        }
    }

    /// Deactivates every handle pointing at `inode`, used when the inode is
    /// removed (spec §3.6).
    pub fn deactivate_inode(&mut self, inode: u64) {
        for slot in 1..HANDLE_SLOTS {
            if self.entries[slot].active && self.entries[slot].inode == inode {
                self.entries[slot].active = false;
            }
        }
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn open_picks_lowest_free_slot() {
        let mut t = HandleTable::new();
        assert_eq!(t.open(10).unwrap(), 1);
        assert_eq!(t.open(11).unwrap(), 2);
        t.close(1);
        assert_eq!(t.open(12).unwrap(), 1);
    }

    #[test]
    fn slot_zero_is_never_issued() {
        let mut t = HandleTable::new();
        assert!(t.entry(0).is_err());
        let h = t.open(5).unwrap();
        assert_ne!(h, 0);
    }

    #[test]
    fn table_full_when_all_32_slots_taken() {
        let mut t = HandleTable::new();
        for i in 0..31 {
            t.open(i).unwrap();
        }
        assert!(matches!(t.open(999), Err(FxfsError::HandleTableFull)));
    }

    #[test]
    fn closing_one_handle_does_not_affect_another_to_the_same_inode() {
        let mut t = HandleTable::new();
        let a = t.open(5).unwrap();
        let b = t.open(5).unwrap();
        t.close(a);
        assert!(t.inode_of(b).is_ok());
        assert!(t.inode_of(a).is_err());
    }

    #[test]
    fn closing_inactive_handle_is_a_no_op() {
        let mut t = HandleTable::new();
        t.close(7); // never opened
        t.close(0); // reserved
    }

    #[test]
    fn deactivate_inode_closes_every_handle_on_it() {
        let mut t = HandleTable::new();
        let a = t.open(5).unwrap();
        let b = t.open(5).unwrap();
        let c = t.open(6).unwrap();
        t.deactivate_inode(5);
        assert!(t.inode_of(a).is_err());
        assert!(t.inode_of(b).is_err());
        assert!(t.inode_of(c).is_ok());
    }
}
