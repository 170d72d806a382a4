use std::alloc::Layout;
use std::num::NonZero;
use std::ptr::NonNull;

use tracing::{debug, trace};

use crate::error::Result;
use crate::{BlockKey, ErasedDrop, PoolError, SizeClass, SizeClassInfo, SlotAddress};

/// The slot bookkeeping of a pool, without any ownership or lifetime management.
///
/// This type never runs user code. Construction, dropping and the handles that trigger them
/// are layered on top by [`SizeClassPool`][crate::SizeClassPool], which calls into this type
/// only for short, non-reentrant bookkeeping steps.
#[derive(Debug)]
pub(crate) struct RawSizeClassPool {
    /// Strictly ascending by slot size.
    classes: Vec<SizeClass>,
}

/// A slot taken from a size class for a construction that has not yet completed.
///
/// Must be passed to either [`RawSizeClassPool::commit()`] or [`RawSizeClassPool::cancel()`].
#[derive(Debug)]
#[must_use]
pub(crate) struct Reservation {
    class_index: usize,
    slot: SlotAddress,
}

/// A live object whose block identity has been retired but whose slot has not yet
/// been released.
#[derive(Debug)]
#[must_use]
pub(crate) struct Unregistered {
    class_index: usize,
    slot: SlotAddress,
    ptr: NonNull<u8>,
    dropper: ErasedDrop,
}

impl Unregistered {
    /// Current storage of the object.
    #[must_use]
    pub(crate) fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    #[must_use]
    pub(crate) fn dropper(&self) -> ErasedDrop {
        self.dropper
    }
}

impl RawSizeClassPool {
    /// Creates a pool with one size class per distinct size, each with one chunk of
    /// `initial_count` slots.
    ///
    /// # Panics
    ///
    /// Panics if `sizes` is empty or contains a zero.
    #[must_use]
    pub(crate) fn new(initial_count: NonZero<usize>, sizes: impl IntoIterator<Item = usize>) -> Self {
        let mut sizes: Vec<usize> = sizes.into_iter().collect();
        sizes.sort_unstable();
        sizes.dedup();

        assert!(!sizes.is_empty(), "a pool must have at least one size class");
        assert!(
            sizes.first() != Some(&0),
            "size classes must have a non-zero size"
        );

        debug!(?sizes, initial_count = initial_count.get(), "creating size classes");

        Self {
            classes: sizes
                .into_iter()
                .map(|size| SizeClass::new(size, initial_count))
                .collect(),
        }
    }

    /// Returns the index of the smallest size class that can hold a value of `layout`.
    pub(crate) fn select_class(&self, layout: Layout) -> Result<usize> {
        self.classes
            .iter()
            .position(|class| class.fits(layout))
            .ok_or(PoolError::NoFittingSizeClass {
                size: layout.size(),
                align: layout.align(),
            })
    }

    /// Reserves a slot for a value of `layout` in the smallest size class that fits it.
    pub(crate) fn reserve(&mut self, layout: Layout) -> Result<Reservation> {
        let class_index = self.select_class(layout)?;

        let slot = self.class_mut(class_index).reserve();

        Ok(Reservation { class_index, slot })
    }

    /// Returns a pointer to the reserved storage, valid for writes of the reserved layout.
    #[must_use]
    pub(crate) fn reservation_ptr(&self, reservation: &Reservation) -> NonNull<u8> {
        self.class(reservation.class_index)
            .slot_ptr(reservation.slot)
    }

    /// Completes a construction whose value has been written to the reserved storage.
    #[must_use]
    pub(crate) fn commit(&mut self, reservation: Reservation, dropper: ErasedDrop) -> BlockKey {
        let slot_key = self
            .class_mut(reservation.class_index)
            .commit(reservation.slot, dropper);

        BlockKey::from_parts(reservation.class_index, slot_key)
    }

    /// Abandons a construction, returning the reserved slot to the free set.
    pub(crate) fn cancel(&mut self, reservation: Reservation) {
        let class = self.class_mut(reservation.class_index);

        trace!(class_size = class.size(), "construction abandoned, slot returned");

        class.cancel(reservation.slot);
    }

    /// Returns the current storage of a live object.
    #[must_use]
    pub(crate) fn resolve(&self, key: BlockKey) -> NonNull<u8> {
        self.class(key.class_index()).resolve(key.slot_key())
    }

    /// Retires the block identity of a live object. The caller becomes responsible for
    /// dropping or moving out the object and then calling [`release()`][Self::release].
    pub(crate) fn unregister(&mut self, key: BlockKey) -> Unregistered {
        let (slot, ptr, dropper) = self.class_mut(key.class_index()).unregister(key.slot_key());

        Unregistered {
            class_index: key.class_index(),
            slot,
            ptr,
            dropper,
        }
    }

    /// Returns the slot of an unregistered object to the free set. The object must no
    /// longer exist in the slot.
    pub(crate) fn release(&mut self, unregistered: Unregistered) {
        self.class_mut(unregistered.class_index)
            .release(unregistered.slot);
    }

    /// Sum over size classes of their total slots.
    #[must_use]
    pub(crate) fn total_block_count(&self) -> usize {
        self.classes.iter().map(SizeClass::total_slots).sum()
    }

    /// Sum over size classes of their slot size times their total slots.
    #[must_use]
    pub(crate) fn total_byte_size(&self) -> usize {
        self.classes
            .iter()
            // Cannot overflow because the storage has been successfully allocated.
            .map(|class| class.size().wrapping_mul(class.total_slots()))
            .sum()
    }

    /// Number of live objects across all size classes.
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.classes.iter().map(SizeClass::live).sum()
    }

    #[must_use]
    pub(crate) fn class_infos(&self) -> Vec<SizeClassInfo> {
        self.classes
            .iter()
            .map(|class| {
                SizeClassInfo::new(
                    class.size(),
                    class.align(),
                    class.growth_increment(),
                    class.total_slots(),
                    class.live(),
                    class.free(),
                )
            })
            .collect()
    }

    /// Compacts every size class to exactly its live objects.
    pub(crate) fn shrink_to_fit(&mut self) {
        let relocated: usize = self.classes.iter_mut().map(SizeClass::shrink_to_fit).sum();

        debug!(
            relocated,
            total_slots = self.total_block_count(),
            "pool shrunk to fit"
        );
    }

    /// Resets every size class to one chunk of `count` free slots. Fails without making any
    /// change if any size class holds objects.
    pub(crate) fn resize(&mut self, count: NonZero<usize>) -> Result<()> {
        if let Some(class) = self.classes.iter().find(|class| class.occupied() != 0) {
            return Err(PoolError::InvalidState {
                class_size: class.size(),
                occupied: class.occupied(),
            });
        }

        for class in &mut self.classes {
            class.reset(count);
        }

        debug!(count = count.get(), "pool resized");

        Ok(())
    }

    fn class(&self, class_index: usize) -> &SizeClass {
        self.classes
            .get(class_index)
            .expect("block key refers to a size class that does not exist")
    }

    fn class_mut(&mut self, class_index: usize) -> &mut SizeClass {
        self.classes
            .get_mut(class_index)
            .expect("block key refers to a size class that does not exist")
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

    fn insert<T>(pool: &mut RawSizeClassPool, value: T) -> BlockKey {
        let reservation = pool.reserve(Layout::new::<T>()).unwrap();
        unsafe {
            pool.reservation_ptr(&reservation).cast::<T>().write(value);
        }
        pool.commit(reservation, ErasedDrop::of::<T>())
    }

    #[test]
    fn sizes_are_sorted_and_deduplicated() {
        let pool = RawSizeClassPool::new(nz!(1), [32, 8, 2, 8, 64]);

        let sizes: Vec<usize> = pool.class_infos().iter().map(SizeClassInfo::size).collect();
        assert_eq!(sizes, vec![2, 8, 32, 64]);
    }

    #[test]
    #[should_panic]
    fn empty_size_list_panics() {
        drop(RawSizeClassPool::new(nz!(1), Vec::<usize>::new()));
    }

    #[test]
    #[should_panic]
    fn zero_size_panics() {
        drop(RawSizeClassPool::new(nz!(1), [0, 8]));
    }

    #[test]
    fn selects_smallest_fitting_class() {
        let pool = RawSizeClassPool::new(nz!(1), [2, 8, 32, 64]);

        assert_eq!(pool.select_class(Layout::new::<u8>()), Ok(0));
        assert_eq!(pool.select_class(Layout::new::<u16>()), Ok(0));
        assert_eq!(pool.select_class(Layout::new::<f32>()), Ok(1));
        assert_eq!(pool.select_class(Layout::new::<(f64, f64)>()), Ok(2));
        assert_eq!(pool.select_class(Layout::new::<[u64; 8]>()), Ok(3));
        assert_eq!(
            pool.select_class(Layout::new::<[u64; 9]>()),
            Err(PoolError::NoFittingSizeClass { size: 72, align: 8 })
        );
    }

    #[test]
    fn selection_skips_insufficiently_aligned_classes() {
        // A 12-byte class only guarantees 4-byte alignment.
        let pool = RawSizeClassPool::new(nz!(1), [12, 16]);

        assert_eq!(pool.select_class(Layout::new::<[u32; 3]>()), Ok(0));
        assert_eq!(pool.select_class(Layout::new::<u64>()), Ok(1));
    }

    #[test]
    fn resolve_after_commit() {
        let mut pool = RawSizeClassPool::new(nz!(2), [8]);

        let key = insert(&mut pool, 1234_u64);
        assert_eq!(unsafe { pool.resolve(key).cast::<u64>().read() }, 1234);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn cancel_leaves_no_trace() {
        let mut pool = RawSizeClassPool::new(nz!(1), [8]);

        let reservation = pool.reserve(Layout::new::<u64>()).unwrap();
        pool.cancel(reservation);

        assert_eq!(pool.len(), 0);
        pool.shrink_to_fit();
        assert_eq!(pool.total_block_count(), 0);
    }

    #[test]
    fn unregister_and_release() {
        let mut pool = RawSizeClassPool::new(nz!(1), [8]);

        let key = insert(&mut pool, 5_u64);
        let unregistered = pool.unregister(key);
        assert_eq!(unsafe { unregistered.ptr().cast::<u64>().read() }, 5);

        // Still counted as live until released.
        assert_eq!(pool.len(), 1);

        pool.release(unregistered);
        assert_eq!(pool.len(), 0);
        assert_eq!(pool.class_infos()[0].free(), 1);
    }

    #[test]
    fn resize_fails_while_occupied_without_changes() {
        let mut pool = RawSizeClassPool::new(nz!(3), [4, 16]);
        let _key = insert(&mut pool, 1_u32);

        let before = pool.class_infos();
        assert_eq!(
            pool.resize(nz!(10)),
            Err(PoolError::InvalidState {
                class_size: 4,
                occupied: 1
            })
        );
        assert_eq!(pool.class_infos(), before);
    }

    #[test]
    fn resize_fails_while_reserved() {
        let mut pool = RawSizeClassPool::new(nz!(3), [4, 16]);
        let reservation = pool.reserve(Layout::new::<[u8; 10]>()).unwrap();

        assert!(matches!(
            pool.resize(nz!(10)),
            Err(PoolError::InvalidState {
                class_size: 16,
                occupied: 1
            })
        ));

        pool.cancel(reservation);
        assert_eq!(pool.resize(nz!(10)), Ok(()));
        assert_eq!(pool.total_block_count(), 20);
    }

    #[test]
    fn totals_sum_over_classes() {
        let pool = RawSizeClassPool::new(nz!(5), [2, 8, 32, 64]);

        assert_eq!(pool.total_block_count(), 20);
        assert_eq!(pool.total_byte_size(), (2 + 8 + 32 + 64) * 5);
    }
}
