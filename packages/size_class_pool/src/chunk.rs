use std::alloc::{Layout, alloc, dealloc};
use std::num::NonZero;
use std::ptr::NonNull;

/// A contiguous block of memory holding a fixed number of equally sized slots.
///
/// The chunk does not know what is stored in its slots and never drops anything. Tracking
/// which slots are occupied, and by what, is the responsibility of the owning size class.
///
/// # Out of band access
///
/// The chunk does not create or keep references to its slots, so it is valid to access slot
/// memory via pointers obtained from [`slot_ptr()`][Self::slot_ptr] even while other code holds
/// an exclusive reference to the chunk.
#[derive(Debug)]
pub(crate) struct Chunk {
    /// Number of slots in the chunk.
    capacity: NonZero<usize>,

    /// Layout of a single slot. The size is also the stride between slots.
    slot_layout: Layout,

    /// Layout of the entire allocation.
    allocation_layout: Layout,

    /// Start of the first slot.
    first_slot_ptr: NonNull<u8>,
}

impl Chunk {
    /// Allocates a chunk with `capacity` slots of the given layout.
    ///
    /// # Panics
    ///
    /// Panics if the slot size is zero, if the slot size is not a multiple of the slot
    /// alignment or if the total size overflows.
    #[must_use]
    pub(crate) fn new(slot_layout: Layout, capacity: NonZero<usize>) -> Self {
        assert!(
            slot_layout.size() > 0,
            "chunk slots must have a non-zero size"
        );
        assert!(
            slot_layout.size() % slot_layout.align() == 0,
            "chunk slot size {} is not a multiple of its alignment {}",
            slot_layout.size(),
            slot_layout.align()
        );

        let total_size = slot_layout
            .size()
            .checked_mul(capacity.get())
            .expect("chunk size calculation cannot overflow for reasonable capacity values");

        let allocation_layout = Layout::from_size_align(total_size, slot_layout.align())
            .expect("chunk layout calculation cannot fail for valid slot layouts");

        // SAFETY: The layout has a non-zero size because both the slot size and the
        // capacity are non-zero.
        let first_slot_ptr = NonNull::new(unsafe { alloc(allocation_layout) })
            .expect("we do not intend to handle allocation failure as a real possibility - OOM results in panic");

        Self {
            capacity,
            slot_layout,
            allocation_layout,
            first_slot_ptr,
        }
    }

    /// Returns the number of slots in the chunk.
    #[must_use]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Returns a pointer to the start of the slot at `index`.
    ///
    /// The pointer is aligned to the slot alignment and valid for reads and writes of
    /// the slot size for as long as the chunk exists.
    ///
    /// # Panics
    ///
    /// Panics if the index is out of bounds.
    #[must_use]
    pub(crate) fn slot_ptr(&self, index: usize) -> NonNull<u8> {
        assert!(
            index < self.capacity.get(),
            "slot {index} index out of bounds in chunk of capacity {}",
            self.capacity.get()
        );

        // Guarded by bounds check above. This cannot overflow because that would imply
        // the chunk extends beyond virtual memory.
        let offset = index.wrapping_mul(self.slot_layout.size());

        // SAFETY: The offset is within our allocation due to the bounds check above.
        unsafe { self.first_slot_ptr.add(offset) }
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        // SAFETY: We allocated this memory in new() with the same layout and have not yet
        // deallocated it.
        unsafe {
            dealloc(self.first_slot_ptr.as_ptr(), self.allocation_layout);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use new_zealand::nz;

    use super::*;

    #[test]
    fn smoke_test() {
        let chunk = Chunk::new(Layout::new::<u64>(), nz!(3));
        assert_eq!(chunk.capacity(), 3);

        for index in 0..3_u64 {
            unsafe {
                chunk
                    .slot_ptr(usize::try_from(index).unwrap())
                    .cast::<u64>()
                    .write(index * 10);
            }
        }

        for index in 0..3_u64 {
            let value = unsafe {
                chunk
                    .slot_ptr(usize::try_from(index).unwrap())
                    .cast::<u64>()
                    .read()
            };
            assert_eq!(value, index * 10);
        }
    }

    #[test]
    fn slots_are_contiguous_and_aligned() {
        let layout = Layout::from_size_align(32, 32).unwrap();
        let chunk = Chunk::new(layout, nz!(4));

        let first = chunk.slot_ptr(0).as_ptr() as usize;
        assert_eq!(first % 32, 0);

        for index in 1..4 {
            let address = chunk.slot_ptr(index).as_ptr() as usize;
            assert_eq!(address - first, index * 32);
        }
    }

    #[test]
    #[should_panic]
    fn out_of_bounds_slot_panics() {
        let chunk = Chunk::new(Layout::new::<u32>(), nz!(2));
        _ = chunk.slot_ptr(2);
    }

    #[test]
    #[should_panic]
    fn zero_size_slot_panics() {
        drop(Chunk::new(Layout::from_size_align(0, 1).unwrap(), nz!(2)));
    }

    #[test]
    #[should_panic]
    fn misaligned_stride_panics() {
        drop(Chunk::new(Layout::from_size_align(6, 4).unwrap(), nz!(2)));
    }
}
