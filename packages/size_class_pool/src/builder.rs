use std::cell::Cell;
use std::marker::PhantomData;
use std::num::NonZero;

use new_zealand::nz;

use crate::{RawSizeClassPool, SizeClassPool};

/// Number of slots each size class starts with unless configured otherwise.
const DEFAULT_INITIAL_COUNT: NonZero<usize> = nz!(128);

/// Builder for creating an instance of [`SizeClassPool`].
///
/// At least one size class is mandatory. Size classes can be given as byte sizes via
/// `.size_class()` and `.size_classes()`, or derived from a type via `.size_class_of::<T>()`.
/// Sizes may be added in any order and duplicates are ignored.
///
/// The initial number of slots per size class is optional and defaults to 128.
///
/// # Example
///
/// ```
/// use new_zealand::nz;
/// use size_class_pool::SizeClassPool;
///
/// let pool = SizeClassPool::builder()
///     .initial_count(nz!(5))
///     .size_classes([2, 8, 32])
///     .size_class(64)
///     .build();
///
/// assert_eq!(pool.total_block_count(), 20);
/// assert_eq!(pool.total_byte_size(), (2 + 8 + 32 + 64) * 5);
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) but not thread-safe ([`Sync`]).
#[derive(Debug)]
#[must_use]
pub struct SizeClassPoolBuilder {
    initial_count: NonZero<usize>,
    sizes: Vec<usize>,

    _not_sync: PhantomData<Cell<()>>,
}

impl SizeClassPoolBuilder {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            initial_count: DEFAULT_INITIAL_COUNT,
            sizes: Vec::new(),
            _not_sync: PhantomData,
        }
    }

    /// Sets the number of slots every size class starts with. This is also the number of
    /// slots a size class grows by when it runs out of free slots.
    #[inline]
    pub fn initial_count(mut self, count: NonZero<usize>) -> Self {
        self.initial_count = count;
        self
    }

    /// Adds a size class with slots of `size` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    #[inline]
    pub fn size_class(mut self, size: usize) -> Self {
        assert!(size > 0, "size classes must have a non-zero size");
        self.sizes.push(size);
        self
    }

    /// Adds a size class for each of the given byte sizes.
    ///
    /// # Panics
    ///
    /// Panics if any size is zero.
    ///
    /// # Example
    ///
    /// ```
    /// use size_class_pool::{SizeClassPool, size_classes_for};
    ///
    /// let pool = SizeClassPool::builder()
    ///     .size_classes(size_classes_for![u8, u32, (f64, f64)])
    ///     .build();
    ///
    /// assert_eq!(pool.size_classes().len(), 3);
    /// ```
    pub fn size_classes(self, sizes: impl IntoIterator<Item = usize>) -> Self {
        sizes.into_iter().fold(self, Self::size_class)
    }

    /// Adds a size class whose slots are exactly as large as a `T`.
    ///
    /// # Panics
    ///
    /// Panics if `T` is a zero-sized type.
    ///
    /// # Example
    ///
    /// ```
    /// use size_class_pool::SizeClassPool;
    ///
    /// let pool = SizeClassPool::builder().size_class_of::<[u32; 3]>().build();
    ///
    /// assert_eq!(pool.size_classes()[0].size(), 12);
    /// assert_eq!(pool.size_classes()[0].align(), 4);
    /// ```
    #[inline]
    pub fn size_class_of<T>(self) -> Self {
        self.size_class(size_of::<T>())
    }

    /// Builds the pool with the specified configuration.
    ///
    /// # Panics
    ///
    /// Panics if no size class has been added.
    #[must_use]
    pub fn build(self) -> SizeClassPool {
        assert!(
            !self.sizes.is_empty(),
            "at least one size class must be added before calling .build()"
        );

        SizeClassPool::from_raw(RawSizeClassPool::new(self.initial_count, self.sizes))
    }
}
