use foldhash::{HashMap, HashMapExt};

use crate::{ErasedDrop, SlotAddress};

/// What the directory knows about one live block.
#[derive(Clone, Copy, Debug)]
pub(crate) struct BlockEntry {
    /// Where the object of the block currently lives.
    slot: SlotAddress,

    /// How to drop the object of the block.
    dropper: ErasedDrop,
}

impl BlockEntry {
    #[must_use]
    pub(crate) fn slot(&self) -> SlotAddress {
        self.slot
    }

    #[must_use]
    pub(crate) fn dropper(&self) -> ErasedDrop {
        self.dropper
    }
}

/// Maps the slot keys of one size class to the current location of their objects.
///
/// Handles only ever store slot keys, so updating an entry here is all that is needed to
/// move an object to a different slot without invalidating any handle.
#[derive(Debug)]
pub(crate) struct BlockDirectory {
    /// Keyed by slot key. Entries exist only for live blocks.
    entries: HashMap<u64, BlockEntry>,

    /// Slot keys are handed out in increasing order and never reused.
    next_slot_key: u64,
}

impl BlockDirectory {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_slot_key: 0,
        }
    }

    /// Number of live blocks registered in the directory.
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Registers a newly constructed object and returns the slot key that identifies it.
    #[must_use]
    pub(crate) fn register(&mut self, slot: SlotAddress, dropper: ErasedDrop) -> u64 {
        let slot_key = self.next_slot_key;

        // A u64 counter does not overflow in any realistic lifetime of a pool.
        self.next_slot_key = self
            .next_slot_key
            .checked_add(1)
            .expect("slot key space exhausted");

        let previous = self.entries.insert(slot_key, BlockEntry { slot, dropper });
        debug_assert!(previous.is_none(), "slot key {slot_key} was registered twice");

        slot_key
    }

    /// Returns the entry of a live block.
    ///
    /// # Panics
    ///
    /// Panics if the slot key does not identify a live block.
    #[must_use]
    pub(crate) fn resolve(&self, slot_key: u64) -> BlockEntry {
        *self
            .entries
            .get(&slot_key)
            .unwrap_or_else(|| panic!("slot key {slot_key} does not identify a live block"))
    }

    /// Removes the entry of a live block, returning it.
    ///
    /// # Panics
    ///
    /// Panics if the slot key does not identify a live block.
    pub(crate) fn unregister(&mut self, slot_key: u64) -> BlockEntry {
        self.entries
            .remove(&slot_key)
            .unwrap_or_else(|| panic!("slot key {slot_key} does not identify a live block"))
    }

    /// Returns the slot keys of all live blocks in the order they were registered.
    #[must_use]
    pub(crate) fn keys_in_registration_order(&self) -> Vec<u64> {
        let mut keys: Vec<u64> = self.entries.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Records that the object of a live block has been moved to a different slot.
    ///
    /// # Panics
    ///
    /// Panics if the slot key does not identify a live block.
    pub(crate) fn relocate(&mut self, slot_key: u64, slot: SlotAddress) {
        self.entries
            .get_mut(&slot_key)
            .unwrap_or_else(|| panic!("slot key {slot_key} does not identify a live block"))
            .slot = slot;
    }

    /// Releases table memory left over from blocks that no longer exist.
    pub(crate) fn shrink_to_fit(&mut self) {
        self.entries.shrink_to_fit();
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.entries.capacity()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn shrink_to_fit_releases_table_memory() {
        let mut directory = BlockDirectory::new();

        let keys: Vec<u64> = (0..1000)
            .map(|index| directory.register(SlotAddress::new(0, index), ErasedDrop::of::<u8>()))
            .collect();
        let kept = keys[500];

        for key in keys {
            if key != kept {
                _ = directory.unregister(key);
            }
        }

        assert!(directory.capacity() >= 1000);

        directory.shrink_to_fit();
        assert!(directory.capacity() < 16);
        assert_eq!(directory.resolve(kept).slot(), SlotAddress::new(0, 500));

        _ = directory.unregister(kept);
        directory.shrink_to_fit();
        assert_eq!(directory.capacity(), 0);
    }

    #[test]
    fn register_resolve_unregister() {
        let mut directory = BlockDirectory::new();

        let a = directory.register(SlotAddress::new(0, 0), ErasedDrop::of::<u32>());
        let b = directory.register(SlotAddress::new(0, 1), ErasedDrop::of::<u32>());

        assert_ne!(a, b);
        assert_eq!(directory.len(), 2);
        assert_eq!(directory.resolve(b).slot(), SlotAddress::new(0, 1));

        let entry = directory.unregister(a);
        assert_eq!(entry.slot(), SlotAddress::new(0, 0));
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn slot_keys_are_not_reused() {
        let mut directory = BlockDirectory::new();

        let a = directory.register(SlotAddress::new(0, 0), ErasedDrop::of::<u8>());
        directory.unregister(a);
        let b = directory.register(SlotAddress::new(0, 0), ErasedDrop::of::<u8>());

        assert_ne!(a, b);
    }

    #[test]
    fn relocate_updates_slot() {
        let mut directory = BlockDirectory::new();

        let key = directory.register(SlotAddress::new(3, 7), ErasedDrop::of::<u8>());
        directory.relocate(key, SlotAddress::new(0, 0));

        assert_eq!(directory.resolve(key).slot(), SlotAddress::new(0, 0));
    }

    #[test]
    fn keys_are_listed_in_registration_order() {
        let mut directory = BlockDirectory::new();

        let keys: Vec<u64> = (0..10)
            .map(|index| {
                directory.register(SlotAddress::new(0, index), ErasedDrop::of::<u8>())
            })
            .collect();

        directory.unregister(keys[4]);

        let mut expected = keys.clone();
        expected.remove(4);
        assert_eq!(directory.keys_in_registration_order(), expected);
    }

    #[test]
    #[should_panic]
    fn resolve_unknown_key_panics() {
        let directory = BlockDirectory::new();
        _ = directory.resolve(42);
    }
}
