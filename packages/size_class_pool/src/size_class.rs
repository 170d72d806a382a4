use std::alloc::Layout;
use std::num::NonZero;
use std::ptr::{self, NonNull};

use tracing::debug;

use crate::{BlockDirectory, Chunk, ErasedDrop, SlotAddress};

/// The slots of one slot size, grown in chunks of a fixed number of slots.
///
/// Every slot of every chunk is in exactly one of three states:
///
/// * free - listed in `free_slots`.
/// * reserved - handed out by [`reserve()`][Self::reserve] for a construction that has not yet
///   completed. Exists only while a construction is in progress.
/// * live - holds an object registered in the directory (or an object that is being dropped
///   after [`unregister()`][Self::unregister] but before [`release()`][Self::release]).
#[derive(Debug)]
pub(crate) struct SizeClass {
    /// Size and alignment of every slot. The alignment is the largest power of two that
    /// divides the size, which keeps every slot in a chunk equally aligned.
    slot_layout: Layout,

    /// Number of slots added by each growth step.
    growth_increment: NonZero<usize>,

    /// Chunks are only ever appended during growth, so slot addresses remain valid until
    /// the whole set of chunks is replaced by [`shrink_to_fit()`][Self::shrink_to_fit] or
    /// [`reset()`][Self::reset].
    chunks: Vec<Chunk>,

    /// Sum of the capacities of `chunks`.
    total_slots: usize,

    /// Stack of free slots.
    free_slots: Vec<SlotAddress>,

    /// Number of live slots.
    live: usize,

    /// Number of reserved slots.
    reserved: usize,

    directory: BlockDirectory,
}

impl SizeClass {
    /// Creates a size class with one chunk of `initial_count` slots of `size` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    #[must_use]
    pub(crate) fn new(size: usize, initial_count: NonZero<usize>) -> Self {
        assert!(size > 0, "size classes must have a non-zero size");

        let slot_layout = Layout::from_size_align(size, slot_alignment(size))
            .expect("the largest power of two dividing a valid size is a valid alignment");

        let mut class = Self {
            slot_layout,
            growth_increment: initial_count,
            chunks: Vec::new(),
            total_slots: 0,
            free_slots: Vec::new(),
            live: 0,
            reserved: 0,
            directory: BlockDirectory::new(),
        };

        class.add_chunk(initial_count);
        class
    }

    /// Slot size in bytes.
    #[must_use]
    pub(crate) fn size(&self) -> usize {
        self.slot_layout.size()
    }

    /// Alignment guaranteed for every slot.
    #[must_use]
    pub(crate) fn align(&self) -> usize {
        self.slot_layout.align()
    }

    #[must_use]
    pub(crate) fn growth_increment(&self) -> NonZero<usize> {
        self.growth_increment
    }

    /// Total number of slots across all chunks, whatever their state.
    #[must_use]
    pub(crate) fn total_slots(&self) -> usize {
        self.total_slots
    }

    #[must_use]
    pub(crate) fn live(&self) -> usize {
        self.live
    }

    #[must_use]
    pub(crate) fn free(&self) -> usize {
        self.free_slots.len()
    }

    /// Number of slots that are not free.
    #[must_use]
    pub(crate) fn occupied(&self) -> usize {
        // Cannot overflow because both are bounded by the number of slots.
        self.live.wrapping_add(self.reserved)
    }

    /// Whether a value with the given layout can be stored in a slot of this class.
    #[must_use]
    pub(crate) fn fits(&self, layout: Layout) -> bool {
        layout.size() <= self.slot_layout.size() && layout.align() <= self.slot_layout.align()
    }

    /// Takes a free slot for a construction that is about to start, growing by one chunk
    /// if no slot is free.
    ///
    /// The slot must later be passed to either [`commit()`][Self::commit] or
    /// [`cancel()`][Self::cancel].
    #[must_use]
    pub(crate) fn reserve(&mut self) -> SlotAddress {
        if self.free_slots.is_empty() {
            self.add_chunk(self.growth_increment);

            debug!(
                class_size = self.size(),
                added_slots = self.growth_increment.get(),
                total_slots = self.total_slots(),
                "size class grew"
            );
        }

        let slot = self
            .free_slots
            .pop()
            .expect("a chunk with at least one slot was just added if none were free");

        // Cannot overflow because that would imply more reserved slots than fit in memory.
        self.reserved = self.reserved.wrapping_add(1);

        #[cfg(debug_assertions)]
        self.integrity_check();

        slot
    }

    /// Marks a reserved slot as live, now holding an initialized object that `dropper` can
    /// drop, and returns the slot key that identifies the object from now on.
    #[must_use]
    pub(crate) fn commit(&mut self, slot: SlotAddress, dropper: ErasedDrop) -> u64 {
        self.reserved = self
            .reserved
            .checked_sub(1)
            .expect("commit() called without a matching reserve()");

        // Cannot overflow because we just converted a reserved slot.
        self.live = self.live.wrapping_add(1);

        self.directory.register(slot, dropper)
    }

    /// Returns a reserved slot to the free set, as if it had never been reserved.
    pub(crate) fn cancel(&mut self, slot: SlotAddress) {
        self.reserved = self
            .reserved
            .checked_sub(1)
            .expect("cancel() called without a matching reserve()");

        self.free_slots.push(slot);

        #[cfg(debug_assertions)]
        self.integrity_check();
    }

    /// Returns a pointer to the storage of a slot.
    #[must_use]
    pub(crate) fn slot_ptr(&self, slot: SlotAddress) -> NonNull<u8> {
        self.chunks
            .get(slot.chunk())
            .expect("slot address refers to a chunk that does not exist")
            .slot_ptr(slot.slot())
    }

    /// Returns a pointer to the current storage of a live object.
    #[must_use]
    pub(crate) fn resolve(&self, slot_key: u64) -> NonNull<u8> {
        self.slot_ptr(self.directory.resolve(slot_key).slot())
    }

    /// Forgets the directory entry of a live object, returning where it is stored and how to
    /// drop it.
    ///
    /// The slot remains live (the object is still there) until it is handed back via
    /// [`release()`][Self::release].
    pub(crate) fn unregister(&mut self, slot_key: u64) -> (SlotAddress, NonNull<u8>, ErasedDrop) {
        let entry = self.directory.unregister(slot_key);
        (entry.slot(), self.slot_ptr(entry.slot()), entry.dropper())
    }

    /// Returns the slot of an object that has been dropped or moved out to the free set.
    pub(crate) fn release(&mut self, slot: SlotAddress) {
        self.live = self
            .live
            .checked_sub(1)
            .expect("release() called on a size class without live slots");

        self.free_slots.push(slot);

        #[cfg(debug_assertions)]
        self.integrity_check();
    }

    /// Reduces the class to exactly as many slots as it has live objects, moving every live
    /// object into a single new chunk. Returns the number of objects moved.
    ///
    /// # Panics
    ///
    /// Panics if there are reserved slots or live slots not registered in the directory, as
    /// their storage would be released from under them.
    pub(crate) fn shrink_to_fit(&mut self) -> usize {
        assert!(
            self.reserved == 0 && self.live == self.directory.len(),
            "cannot shrink a size class while objects are being constructed or dropped"
        );

        let slots_before = self.total_slots();

        let Some(live) = NonZero::new(self.live) else {
            self.discard_storage();

            debug!(
                class_size = self.size(),
                slots_before,
                slots_after = 0,
                relocated = 0,
                "size class shrunk"
            );

            return 0;
        };

        let target = Chunk::new(self.slot_layout, live);

        // We fill the new chunk in registration order, which preserves the relative order
        // in which objects were constructed.
        let slot_keys = self.directory.keys_in_registration_order();

        for (index_in_chunk, slot_key) in slot_keys.iter().copied().enumerate() {
            let source = self.resolve(slot_key);
            let destination = target.slot_ptr(index_in_chunk);

            // SAFETY: The source is a live slot in one of our existing chunks and the
            // destination is a slot in the new chunk, so both are valid for slot-sized
            // accesses and the two cannot overlap. Moving a Rust value is a bitwise copy and
            // the source is never dropped or read again, as the old chunk is discarded below.
            unsafe {
                ptr::copy_nonoverlapping(source.as_ptr(), destination.as_ptr(), self.size());
            }

            // The new chunk will be the only chunk, at index 0.
            self.directory
                .relocate(slot_key, SlotAddress::new(0, index_in_chunk));
        }

        self.discard_storage();
        self.chunks = vec![target];
        self.total_slots = live.get();

        debug!(
            class_size = self.size(),
            slots_before,
            slots_after = live.get(),
            relocated = slot_keys.len(),
            "size class shrunk"
        );

        #[cfg(debug_assertions)]
        self.integrity_check();

        slot_keys.len()
    }

    /// Replaces all storage with a single chunk of `count` free slots and makes `count` the
    /// new growth increment.
    ///
    /// # Panics
    ///
    /// Panics if the class holds any objects.
    pub(crate) fn reset(&mut self, count: NonZero<usize>) {
        assert!(
            self.occupied() == 0,
            "cannot reset a size class that holds {} objects",
            self.occupied()
        );

        self.discard_storage();
        self.growth_increment = count;
        self.add_chunk(count);

        #[cfg(debug_assertions)]
        self.integrity_check();
    }

    fn add_chunk(&mut self, capacity: NonZero<usize>) {
        let chunk_index = self.chunks.len();
        self.chunks.push(Chunk::new(self.slot_layout, capacity));

        // Cannot overflow because the slots of every chunk have been successfully allocated.
        self.total_slots = self.total_slots.wrapping_add(capacity.get());

        // Pushed in reverse so that the lowest slot of the new chunk is popped first.
        self.free_slots.extend(
            (0..capacity.get())
                .rev()
                .map(|index_in_chunk| SlotAddress::new(chunk_index, index_in_chunk)),
        );
    }

    /// Drops every chunk and all free slot bookkeeping, including spare capacity left over
    /// from earlier growth.
    fn discard_storage(&mut self) {
        self.chunks.clear();
        self.chunks.shrink_to_fit();
        self.total_slots = 0;

        self.free_slots.clear();
        self.free_slots.shrink_to_fit();

        self.directory.shrink_to_fit();
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    #[allow(
        clippy::arithmetic_side_effects,
        reason = "integrity check sums counters bounded by the slot count"
    )]
    fn integrity_check(&self) {
        let total = self.total_slots();

        assert_eq!(
            self.live + self.reserved + self.free_slots.len(),
            total,
            "live {} + reserved {} + free {} does not add up to {} slots in size class of {} bytes",
            self.live,
            self.reserved,
            self.free_slots.len(),
            total,
            self.size()
        );
    }
}

/// The alignment of slots of the given size: the largest power of two that divides it.
fn slot_alignment(size: usize) -> usize {
    1_usize << size.trailing_zeros()
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

    fn insert_u64(class: &mut SizeClass, value: u64) -> u64 {
        let slot = class.reserve();
        unsafe {
            class.slot_ptr(slot).cast::<u64>().write(value);
        }
        class.commit(slot, ErasedDrop::of::<u64>())
    }

    fn insert_u32(class: &mut SizeClass, value: u32) -> u64 {
        let slot = class.reserve();
        unsafe {
            class.slot_ptr(slot).cast::<u32>().write(value);
        }
        class.commit(slot, ErasedDrop::of::<u32>())
    }

    fn read_u64(class: &SizeClass, slot_key: u64) -> u64 {
        unsafe { class.resolve(slot_key).cast::<u64>().read() }
    }

    fn remove(class: &mut SizeClass, slot_key: u64) {
        let (slot, ptr, dropper) = class.unregister(slot_key);
        unsafe {
            dropper.drop_in_place(ptr);
        }
        class.release(slot);
    }

    #[test]
    fn alignment_follows_size() {
        assert_eq!(slot_alignment(1), 1);
        assert_eq!(slot_alignment(2), 2);
        assert_eq!(slot_alignment(12), 4);
        assert_eq!(slot_alignment(32), 32);
        assert_eq!(slot_alignment(24), 8);
    }

    #[test]
    fn new_class_has_initial_chunk() {
        let class = SizeClass::new(16, nz!(5));

        assert_eq!(class.size(), 16);
        assert_eq!(class.align(), 16);
        assert_eq!(class.total_slots(), 5);
        assert_eq!(class.free(), 5);
        assert_eq!(class.live(), 0);
        assert_eq!(class.growth_increment().get(), 5);
    }

    #[test]
    fn fits_checks_size_and_alignment() {
        let class = SizeClass::new(12, nz!(1));

        assert!(class.fits(Layout::new::<u32>()));
        assert!(class.fits(Layout::new::<[u32; 3]>()));
        assert!(!class.fits(Layout::new::<[u32; 4]>()));
        assert!(!class.fits(Layout::new::<u64>()));
    }

    #[test]
    fn grows_by_fixed_increment() {
        let mut class = SizeClass::new(8, nz!(2));

        let _a = insert_u64(&mut class, 1);
        let _b = insert_u64(&mut class, 2);
        assert_eq!(class.total_slots(), 2);

        let _c = insert_u64(&mut class, 3);
        assert_eq!(class.total_slots(), 4);

        let _d = insert_u64(&mut class, 4);
        let _e = insert_u64(&mut class, 5);
        assert_eq!(class.total_slots(), 6);
        assert_eq!(class.live(), 5);
    }

    #[test]
    fn release_makes_slot_reusable() {
        let mut class = SizeClass::new(8, nz!(1));

        let a = insert_u64(&mut class, 1);
        remove(&mut class, a);

        let b = insert_u64(&mut class, 2);
        assert_eq!(class.total_slots(), 1);
        assert_eq!(read_u64(&class, b), 2);
    }

    #[test]
    fn cancel_returns_slot() {
        let mut class = SizeClass::new(8, nz!(1));

        let slot = class.reserve();
        assert_eq!(class.free(), 0);
        assert_eq!(class.occupied(), 1);

        class.cancel(slot);
        assert_eq!(class.free(), 1);
        assert_eq!(class.occupied(), 0);
        assert_eq!(class.live(), 0);
    }

    #[test]
    fn shrink_relocates_live_objects() {
        let mut class = SizeClass::new(8, nz!(2));

        let keys: Vec<u64> = (0..7).map(|value| insert_u64(&mut class, value)).collect();
        assert_eq!(class.total_slots(), 8);

        remove(&mut class, keys[0]);
        remove(&mut class, keys[3]);
        remove(&mut class, keys[5]);

        let relocated = class.shrink_to_fit();
        assert_eq!(relocated, 4);
        assert_eq!(class.total_slots(), 4);
        assert_eq!(class.free(), 0);

        for (value, key) in keys.iter().enumerate() {
            if [0, 3, 5].contains(&value) {
                continue;
            }

            assert_eq!(read_u64(&class, *key), u64::try_from(value).unwrap());
        }

        // Growth still uses the original increment.
        let _extra = insert_u64(&mut class, 100);
        assert_eq!(class.total_slots(), 6);
    }

    #[test]
    fn shrink_empty_class_discards_everything() {
        let mut class = SizeClass::new(4, nz!(10));

        let key = insert_u32(&mut class, 7);
        remove(&mut class, key);

        assert_eq!(class.shrink_to_fit(), 0);
        assert_eq!(class.total_slots(), 0);
        assert_eq!(class.free(), 0);

        let _again = insert_u32(&mut class, 8);
        assert_eq!(class.total_slots(), 10);
    }

    /// Recomputes the slot count from the chunks, for comparison with the tracked count.
    fn counted_slots(class: &SizeClass) -> usize {
        class.chunks.iter().map(Chunk::capacity).sum()
    }

    #[test]
    fn shrink_releases_bookkeeping_capacity() {
        let mut class = SizeClass::new(2, nz!(1));

        let slots: Vec<SlotAddress> = (0..10_000).map(|_| class.reserve()).collect();
        assert!(class.chunks.capacity() >= 10_000);

        for slot in slots {
            class.cancel(slot);
        }
        assert!(class.free_slots.capacity() >= 10_000);

        class.shrink_to_fit();
        assert_eq!(class.total_slots(), 0);
        assert_eq!(class.chunks.capacity(), 0);
        assert_eq!(class.free_slots.capacity(), 0);
        assert_eq!(class.directory.capacity(), 0);
    }

    #[test]
    fn shrink_with_live_objects_keeps_only_needed_capacity() {
        let mut class = SizeClass::new(8, nz!(1));

        let keys: Vec<u64> = (0..1000).map(|value| insert_u64(&mut class, value)).collect();
        for key in keys.iter().skip(1) {
            remove(&mut class, *key);
        }

        assert_eq!(class.shrink_to_fit(), 1);
        assert_eq!(class.chunks.capacity(), 1);
        assert_eq!(class.free_slots.capacity(), 0);
        assert!(class.directory.capacity() < 16);
        assert_eq!(read_u64(&class, keys[0]), 0);
    }

    #[test]
    fn reset_releases_bookkeeping_capacity() {
        let mut class = SizeClass::new(8, nz!(1));

        let slots: Vec<SlotAddress> = (0..1000).map(|_| class.reserve()).collect();
        for slot in slots {
            class.cancel(slot);
        }

        class.reset(nz!(3));

        // Only the minimum a Vec reserves for its first elements is left.
        assert!(class.chunks.capacity() <= 4);
        assert!(class.free_slots.capacity() <= 4);
        assert_eq!(class.free(), 3);
    }

    #[test]
    fn tracked_slot_count_matches_chunks() {
        let mut class = SizeClass::new(8, nz!(3));
        assert_eq!(class.total_slots(), counted_slots(&class));

        let keys: Vec<u64> = (0..10).map(|value| insert_u64(&mut class, value)).collect();
        assert_eq!(class.total_slots(), 12);
        assert_eq!(class.total_slots(), counted_slots(&class));

        for key in keys.iter().step_by(3) {
            remove(&mut class, *key);
        }

        class.shrink_to_fit();
        assert_eq!(class.total_slots(), 6);
        assert_eq!(class.total_slots(), counted_slots(&class));

        let grown = insert_u64(&mut class, 50);
        assert_eq!(class.total_slots(), 9);
        assert_eq!(class.total_slots(), counted_slots(&class));

        for (_, key) in keys.iter().enumerate().filter(|(index, _)| index % 3 != 0) {
            remove(&mut class, *key);
        }
        remove(&mut class, grown);

        class.reset(nz!(4));
        assert_eq!(class.total_slots(), 4);
        assert_eq!(class.total_slots(), counted_slots(&class));
    }

    #[test]
    #[should_panic]
    fn shrink_with_reservation_panics() {
        let mut class = SizeClass::new(8, nz!(1));
        let _slot = class.reserve();
        class.shrink_to_fit();
    }

    #[test]
    fn reset_replaces_storage_and_increment() {
        let mut class = SizeClass::new(8, nz!(3));
        let keys: Vec<u64> = (0..4).map(|value| insert_u64(&mut class, value)).collect();
        assert_eq!(class.total_slots(), 6);

        for key in keys {
            remove(&mut class, key);
        }

        class.reset(nz!(2));
        assert_eq!(class.total_slots(), 2);
        assert_eq!(class.free(), 2);
        assert_eq!(class.growth_increment().get(), 2);
    }

    #[test]
    #[should_panic]
    fn reset_with_live_object_panics() {
        let mut class = SizeClass::new(8, nz!(3));
        let _key = insert_u64(&mut class, 1);
        class.reset(nz!(2));
    }
}
