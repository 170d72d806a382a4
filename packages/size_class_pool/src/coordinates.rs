/// Where a slot lives inside its size class: `(chunk, slot within the chunk)`.
///
/// Only meaningful until the size class next replaces its chunks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct SlotAddress(usize, usize);

impl SlotAddress {
    #[must_use]
    pub(crate) fn new(chunk: usize, slot: usize) -> Self {
        Self(chunk, slot)
    }

    #[must_use]
    pub(crate) fn chunk(self) -> usize {
        self.0
    }

    #[must_use]
    pub(crate) fn slot(self) -> usize {
        self.1
    }
}

/// Stable logical identity of a block held by a pool handle.
///
/// A block key never changes while its object is alive, even when
/// [`shrink_to_fit()`][crate::SizeClassPool::shrink_to_fit] relocates the object to different
/// storage. Keys are never reused within a size class, so two keys compare equal only if they
/// identify the same object.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct BlockKey {
    class_index: usize,
    slot_key: u64,
}

impl BlockKey {
    #[must_use]
    pub(crate) fn from_parts(class_index: usize, slot_key: u64) -> Self {
        Self {
            class_index,
            slot_key,
        }
    }

    /// Index of the size class that holds the block, in ascending size order.
    #[must_use]
    #[inline]
    pub fn class_index(&self) -> usize {
        self.class_index
    }

    #[must_use]
    pub(crate) fn slot_key(&self) -> u64 {
        self.slot_key
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn slot_address_parts() {
        let address = SlotAddress::new(3, 9);

        assert_eq!(address.chunk(), 3);
        assert_eq!(address.slot(), 9);
        assert_ne!(address, SlotAddress::new(9, 3));
    }

    #[test]
    fn block_key_parts() {
        let key = BlockKey::from_parts(2, 40);

        assert_eq!(key.class_index(), 2);
        assert_eq!(key.slot_key(), 40);
        assert_ne!(key, BlockKey::from_parts(2, 41));
    }
}
