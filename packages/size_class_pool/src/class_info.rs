use std::num::NonZero;

/// A snapshot of the state of one size class of a [`SizeClassPool`][crate::SizeClassPool].
///
/// Returned by [`SizeClassPool::size_classes()`][crate::SizeClassPool::size_classes].
///
/// # Example
///
/// ```
/// use new_zealand::nz;
/// use size_class_pool::SizeClassPool;
///
/// let pool = SizeClassPool::new(nz!(4), [8, 32]);
/// let _value = pool.construct(42_u64).unwrap();
///
/// let classes = pool.size_classes();
/// assert_eq!(classes[0].size(), 8);
/// assert_eq!(classes[0].live(), 1);
/// assert_eq!(classes[0].free(), 3);
/// assert_eq!(classes[1].live(), 0);
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SizeClassInfo {
    size: usize,
    align: usize,
    growth_increment: NonZero<usize>,
    total_slots: usize,
    live: usize,
    free: usize,
}

impl SizeClassInfo {
    #[must_use]
    pub(crate) fn new(
        size: usize,
        align: usize,
        growth_increment: NonZero<usize>,
        total_slots: usize,
        live: usize,
        free: usize,
    ) -> Self {
        Self {
            size,
            align,
            growth_increment,
            total_slots,
            live,
            free,
        }
    }

    /// Slot size in bytes.
    #[must_use]
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Alignment in bytes guaranteed for every slot of the class.
    #[must_use]
    #[inline]
    pub fn align(&self) -> usize {
        self.align
    }

    /// Number of slots added whenever the class runs out of free slots.
    #[must_use]
    #[inline]
    pub fn growth_increment(&self) -> NonZero<usize> {
        self.growth_increment
    }

    /// Number of slots the class currently owns, free or not.
    #[must_use]
    #[inline]
    pub fn total_slots(&self) -> usize {
        self.total_slots
    }

    /// Number of bytes of slot storage the class currently owns.
    #[must_use]
    #[inline]
    pub fn total_bytes(&self) -> usize {
        // Cannot overflow because the storage has been successfully allocated.
        self.size.wrapping_mul(self.total_slots)
    }

    /// Number of live objects in the class.
    #[must_use]
    #[inline]
    pub fn live(&self) -> usize {
        self.live
    }

    /// Number of free slots in the class.
    #[must_use]
    #[inline]
    pub fn free(&self) -> usize {
        self.free
    }
}
