use std::alloc::Layout;
use std::cell::{Cell, RefCell};
use std::num::NonZero;
use std::ptr::NonNull;
use std::rc::Rc;

use scopeguard::ScopeGuard;

use crate::{
    BlockKey, ErasedDrop, Fence, OwnedBlock, PoolError, Pooled, PooledMut, RawSizeClassPool,
    SizeClassInfo, SizeClassPoolBuilder,
};

/// An object pool that stores values of any type in slots of a fixed set of sizes.
///
/// The pool is created with a list of slot sizes (the size classes) and an initial number of
/// slots per size class. A value of type `T` is always stored in the smallest size class whose
/// slots are at least `size_of::<T>()` bytes large and at least `align_of::<T>()` aligned.
///
/// Values are owned by handles:
///
/// - [`PooledMut<T>`] from [`construct()`][Self::construct] - exclusive ownership with
///   mutable access.
/// - [`Pooled<T>`] from [`construct_shared()`][Self::construct_shared] - reference-counted
///   shared ownership.
///
/// When the last handle to a value is dropped or reset, the value is dropped and its slot
/// becomes available for reuse.
///
/// # Memory management
///
/// A size class that runs out of free slots grows by a fixed number of slots, equal to the
/// count that last sized the class (the initial count, or the count given to the most recent
/// [`resize()`][Self::resize]). Growth never moves existing values.
///
/// Memory is only returned by [`shrink_to_fit()`][Self::shrink_to_fit], which compacts every
/// size class to exactly its live values, moving them if needed, and by
/// [`resize()`][Self::resize]. Handles identify their value by a stable [`BlockKey`] rather
/// than by address, so they remain valid when values move.
///
/// # Pool handles
///
/// `SizeClassPool` is a cheap reference to shared pool state; cloning it yields another
/// reference to the same pool. Every value handle also holds such a reference, so the pool
/// state lives for as long as any value in it.
///
/// # Example
///
/// ```
/// use new_zealand::nz;
/// use size_class_pool::SizeClassPool;
///
/// let pool = SizeClassPool::new(nz!(5), [2, 8, 32, 64]);
/// assert_eq!(pool.total_block_count(), 20);
/// assert_eq!(pool.total_byte_size(), (2 + 8 + 32 + 64) * 5);
///
/// // A 16-byte tuple goes into the 32-byte size class.
/// let point = pool.construct((35.0_f64, 36.0_f64)).unwrap();
/// assert_eq!(point.get().0, 35.0);
/// assert_eq!(point.get().1, 36.0);
///
/// pool.shrink_to_fit();
/// assert_eq!(pool.total_block_count(), 1);
/// assert_eq!(pool.total_byte_size(), 32);
///
/// drop(point);
/// pool.shrink_to_fit();
/// assert_eq!(pool.total_block_count(), 0);
///
/// pool.resize(nz!(6)).unwrap();
/// assert_eq!(pool.total_block_count(), 24);
/// ```
///
/// # Thread safety
///
/// The pool is single-threaded: neither the pool nor its handles are [`Send`] or [`Sync`].
#[derive(Clone, Debug)]
pub struct SizeClassPool {
    core: Rc<PoolCore>,
}

#[derive(Debug)]
struct PoolCore {
    /// Borrowed only for short bookkeeping steps that never run user code, so that
    /// constructors and destructors are free to use the pool themselves.
    raw: RefCell<RawSizeClassPool>,

    /// Number of live [`Fence`]s. Objects may only be relocated while this is zero.
    fences: Cell<usize>,
}

impl SizeClassPool {
    /// Creates a pool with the given size classes, each starting with `initial_count` slots.
    ///
    /// The sizes may be given in any order and may contain duplicates.
    ///
    /// # Panics
    ///
    /// Panics if `sizes` is empty or contains a zero.
    ///
    /// # Example
    ///
    /// ```
    /// use new_zealand::nz;
    /// use size_class_pool::SizeClassPool;
    ///
    /// let pool = SizeClassPool::new(nz!(5), [16, 4]);
    ///
    /// assert_eq!(pool.total_block_count(), 10);
    /// assert_eq!(pool.total_byte_size(), (4 + 16) * 5);
    /// ```
    #[must_use]
    pub fn new(initial_count: NonZero<usize>, sizes: impl IntoIterator<Item = usize>) -> Self {
        Self::from_raw(RawSizeClassPool::new(initial_count, sizes))
    }

    /// Creates a builder for configuring and constructing a [`SizeClassPool`].
    ///
    /// # Example
    ///
    /// ```
    /// use new_zealand::nz;
    /// use size_class_pool::SizeClassPool;
    ///
    /// let pool = SizeClassPool::builder()
    ///     .initial_count(nz!(10))
    ///     .size_class_of::<u64>()
    ///     .size_class_of::<[u64; 4]>()
    ///     .build();
    ///
    /// assert_eq!(pool.total_block_count(), 20);
    /// ```
    #[inline]
    pub fn builder() -> SizeClassPoolBuilder {
        SizeClassPoolBuilder::new()
    }

    #[must_use]
    pub(crate) fn from_raw(raw: RawSizeClassPool) -> Self {
        Self {
            core: Rc::new(PoolCore {
                raw: RefCell::new(raw),
                fences: Cell::new(0),
            }),
        }
    }

    /// Moves a value into the pool and returns an exclusive handle to it.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NoFittingSizeClass`] if no size class can hold a `T`. The pool
    /// is not modified in that case.
    ///
    /// # Example
    ///
    /// ```
    /// use new_zealand::nz;
    /// use size_class_pool::{PoolError, SizeClassPool};
    ///
    /// let pool = SizeClassPool::new(nz!(5), [4, 16]);
    ///
    /// let answer = pool.construct(42_i32).unwrap();
    /// assert_eq!(*answer.get(), 42);
    ///
    /// let too_large = pool.construct([0_u8; 17]);
    /// assert_eq!(
    ///     too_large.unwrap_err(),
    ///     PoolError::NoFittingSizeClass { size: 17, align: 1 }
    /// );
    /// ```
    pub fn construct<T>(&self, value: T) -> Result<PooledMut<T>, PoolError> {
        self.construct_with(|| value)
    }

    /// Constructs a value in the pool by calling `f` and returns an exclusive handle to it.
    ///
    /// The slot for the value is reserved before `f` is called. If `f` panics, the slot is
    /// returned to the pool before the panic continues to unwind.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NoFittingSizeClass`] if no size class can hold a `T`. In that
    /// case `f` is not called and the pool is not modified.
    ///
    /// # Example
    ///
    /// ```
    /// use new_zealand::nz;
    /// use size_class_pool::SizeClassPool;
    ///
    /// let pool = SizeClassPool::new(nz!(5), [32]);
    ///
    /// let numbers = pool.construct_with(|| (1..=4).collect::<Vec<u32>>()).unwrap();
    /// assert_eq!(*numbers.get(), vec![1, 2, 3, 4]);
    /// ```
    pub fn construct_with<T>(&self, f: impl FnOnce() -> T) -> Result<PooledMut<T>, PoolError> {
        self.try_construct_with(|| Ok::<T, PoolError>(f()))
    }

    /// Constructs a value in the pool by calling a fallible `f` and returns an exclusive
    /// handle to it.
    ///
    /// The slot for the value is reserved before `f` is called. If `f` returns an error or
    /// panics, the slot is returned to the pool first and the error or panic is then passed on
    /// unchanged. A failed construction leaves no live value behind, although a size class
    /// may have grown to provide the slot.
    ///
    /// # Errors
    ///
    /// Returns the error returned by `f`, or a [`PoolError::NoFittingSizeClass`] converted
    /// into `E` if no size class can hold a `T` (in which case `f` is not called).
    ///
    /// # Example
    ///
    /// ```
    /// use new_zealand::nz;
    /// use size_class_pool::{PoolError, SizeClassPool};
    ///
    /// #[derive(Debug)]
    /// enum ConfigError {
    ///     Pool(PoolError),
    ///     Invalid,
    /// }
    ///
    /// impl From<PoolError> for ConfigError {
    ///     fn from(error: PoolError) -> Self {
    ///         Self::Pool(error)
    ///     }
    /// }
    ///
    /// let pool = SizeClassPool::new(nz!(5), [8, 32]);
    ///
    /// let result = pool.try_construct_with(|| -> Result<u64, ConfigError> { Err(ConfigError::Invalid) });
    /// assert!(matches!(result, Err(ConfigError::Invalid)));
    ///
    /// // The reserved slot was returned, nothing is left behind.
    /// pool.shrink_to_fit();
    /// assert_eq!(pool.total_block_count(), 0);
    /// ```
    pub fn try_construct_with<T, E>(
        &self,
        f: impl FnOnce() -> Result<T, E>,
    ) -> Result<PooledMut<T>, E>
    where
        E: From<PoolError>,
    {
        self.construct_block(f).map(PooledMut::new)
    }

    /// Moves a value into the pool and returns a shared handle to it.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NoFittingSizeClass`] if no size class can hold a `T`. The pool
    /// is not modified in that case.
    ///
    /// # Example
    ///
    /// ```
    /// use new_zealand::nz;
    /// use size_class_pool::SizeClassPool;
    ///
    /// let pool = SizeClassPool::new(nz!(5), [2, 8, 32, 64]);
    ///
    /// let a = pool.construct_shared(35.0_f32).unwrap();
    /// let b = a.clone();
    /// assert_eq!(*a.get(), 35.0);
    /// assert_eq!(*b.get(), 35.0);
    ///
    /// drop(a);
    /// assert_eq!(pool.len(), 1);
    /// drop(b);
    /// assert_eq!(pool.len(), 0);
    /// ```
    pub fn construct_shared<T>(&self, value: T) -> Result<Pooled<T>, PoolError> {
        self.construct_shared_with(|| value)
    }

    /// Constructs a value in the pool by calling `f` and returns a shared handle to it.
    ///
    /// Slot handling on panic is as described for [`construct_with()`][Self::construct_with].
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NoFittingSizeClass`] if no size class can hold a `T`. In that
    /// case `f` is not called and the pool is not modified.
    pub fn construct_shared_with<T>(&self, f: impl FnOnce() -> T) -> Result<Pooled<T>, PoolError> {
        self.try_construct_shared_with(|| Ok::<T, PoolError>(f()))
    }

    /// Constructs a value in the pool by calling a fallible `f` and returns a shared handle
    /// to it.
    ///
    /// Failure handling is as described for
    /// [`try_construct_with()`][Self::try_construct_with].
    ///
    /// # Errors
    ///
    /// Returns the error returned by `f`, or a [`PoolError::NoFittingSizeClass`] converted
    /// into `E` if no size class can hold a `T` (in which case `f` is not called).
    pub fn try_construct_shared_with<T, E>(
        &self,
        f: impl FnOnce() -> Result<T, E>,
    ) -> Result<Pooled<T>, E>
    where
        E: From<PoolError>,
    {
        self.construct_block(f).map(Pooled::new)
    }

    /// The total number of slots owned by the pool, free or not, across all size classes.
    ///
    /// # Example
    ///
    /// ```
    /// use new_zealand::nz;
    /// use size_class_pool::SizeClassPool;
    ///
    /// let pool = SizeClassPool::new(nz!(1), [8]);
    /// assert_eq!(pool.total_block_count(), 1);
    ///
    /// let first = pool.construct(1_u64).unwrap();
    /// assert_eq!(pool.total_block_count(), 1);
    ///
    /// // The size class is full, so it grows by its growth increment of 1.
    /// let second = pool.construct(2_u64).unwrap();
    /// assert_eq!(pool.total_block_count(), 2);
    /// ```
    #[must_use]
    pub fn total_block_count(&self) -> usize {
        self.core.raw.borrow().total_block_count()
    }

    /// The total number of bytes of slot storage owned by the pool across all size classes.
    ///
    /// For each size class this is the slot size times the number of slots.
    ///
    /// # Example
    ///
    /// ```
    /// use new_zealand::nz;
    /// use size_class_pool::SizeClassPool;
    ///
    /// let pool = SizeClassPool::new(nz!(5), [4, 16]);
    /// assert_eq!(pool.total_byte_size(), 100);
    /// ```
    #[must_use]
    pub fn total_byte_size(&self) -> usize {
        self.core.raw.borrow().total_byte_size()
    }

    /// The number of live values in the pool.
    ///
    /// # Example
    ///
    /// ```
    /// use new_zealand::nz;
    /// use size_class_pool::SizeClassPool;
    ///
    /// let pool = SizeClassPool::new(nz!(5), [4, 16]);
    /// assert_eq!(pool.len(), 0);
    ///
    /// let a = pool.construct(1_u32).unwrap();
    /// let b = pool.construct_shared(2_u128).unwrap();
    /// assert_eq!(pool.len(), 2);
    ///
    /// drop(a);
    /// assert_eq!(pool.len(), 1);
    /// ```
    #[must_use]
    pub fn len(&self) -> usize {
        self.core.raw.borrow().len()
    }

    /// Whether the pool has no live values.
    ///
    /// An empty pool may still own slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a snapshot of every size class, in ascending size order.
    ///
    /// # Example
    ///
    /// ```
    /// use new_zealand::nz;
    /// use size_class_pool::SizeClassPool;
    ///
    /// let pool = SizeClassPool::new(nz!(2), [2, 8, 32, 64]);
    /// let _pair = pool.construct((1.0_f64, 2.0_f64)).unwrap();
    ///
    /// let live: Vec<usize> = pool.size_classes().iter().map(|c| c.live()).collect();
    /// assert_eq!(live, vec![0, 0, 1, 0]);
    /// ```
    #[must_use]
    pub fn size_classes(&self) -> Vec<SizeClassInfo> {
        self.core.raw.borrow().class_infos()
    }

    /// Releases all unused slot storage.
    ///
    /// Each size class without live values releases all its storage. Each size class with
    /// live values moves them into a single new chunk holding exactly as many slots as there
    /// are live values and releases all previous storage. Handles keep referring to their
    /// values after they move.
    ///
    /// Growth increments are not affected.
    ///
    /// # Panics
    ///
    /// Panics if any value is currently borrowed through a [`PooledRef`][crate::PooledRef] or
    /// [`PooledRefMut`][crate::PooledRefMut], or if called from a constructor or destructor of a
    /// value stored in this pool.
    ///
    /// # Example
    ///
    /// ```
    /// use new_zealand::nz;
    /// use size_class_pool::SizeClassPool;
    ///
    /// let pool = SizeClassPool::new(nz!(5), [4, 16]);
    /// let value = pool.construct(42_i32).unwrap();
    ///
    /// pool.shrink_to_fit();
    /// assert_eq!(pool.total_block_count(), 1);
    /// assert_eq!(pool.total_byte_size(), 4);
    /// assert_eq!(*value.get(), 42);
    /// ```
    pub fn shrink_to_fit(&self) {
        assert!(
            self.core.fences.get() == 0,
            "cannot shrink a pool while its values are borrowed, being constructed or being dropped"
        );

        self.core.raw.borrow_mut().shrink_to_fit();
    }

    /// Replaces the storage of every size class with exactly `count` free slots and makes
    /// `count` the growth increment of every size class.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidState`] if any size class holds a value. The pool is not
    /// modified in that case.
    ///
    /// # Example
    ///
    /// ```
    /// use new_zealand::nz;
    /// use size_class_pool::{PoolError, SizeClassPool};
    ///
    /// let pool = SizeClassPool::new(nz!(5), [4, 16]);
    ///
    /// let value = pool.construct(1_u32).unwrap();
    /// assert!(matches!(
    ///     pool.resize(nz!(6)),
    ///     Err(PoolError::InvalidState { .. })
    /// ));
    ///
    /// drop(value);
    /// pool.resize(nz!(6)).unwrap();
    /// assert_eq!(pool.total_block_count(), 12);
    /// assert_eq!(pool.total_byte_size(), (4 + 16) * 6);
    /// ```
    pub fn resize(&self, count: NonZero<usize>) -> Result<(), PoolError> {
        self.core.raw.borrow_mut().resize(count)
    }

    /// Runs a construction: reserve a slot, run `f`, then either commit the value to the slot
    /// or return the slot to the free set.
    fn construct_block<T, E>(&self, f: impl FnOnce() -> Result<T, E>) -> Result<OwnedBlock<T>, E>
    where
        E: From<PoolError>,
    {
        let reservation = self.core.raw.borrow_mut().reserve(Layout::new::<T>())?;

        // The reserved slot must not move while `f` runs. Declared before the guard below,
        // so the slot is returned before the fence is lifted.
        let _fence = self.fence();

        let reservation = scopeguard::guard(reservation, |reservation| {
            self.core.raw.borrow_mut().cancel(reservation);
        });

        let value = f()?;

        // The constructor succeeded, so the reservation is committed instead of cancelled.
        let reservation = ScopeGuard::into_inner(reservation);

        let key = {
            let mut raw = self.core.raw.borrow_mut();
            let ptr = raw.reservation_ptr(&reservation).cast::<T>();

            // SAFETY: The slot was reserved for a layout that fits T, so the pointer is
            // aligned and valid for writes of T. Nothing else refers to a reserved slot.
            unsafe {
                ptr.write(value);
            }

            raw.commit(reservation, ErasedDrop::of::<T>())
        };

        Ok(OwnedBlock::new(self.clone(), key))
    }

    /// Returns a pointer to the current storage of a live block, together with a fence that
    /// keeps it there.
    #[must_use]
    pub(crate) fn access<T>(&self, key: BlockKey) -> (NonNull<T>, Fence<'_>) {
        let fence = self.fence();
        let ptr = self.core.raw.borrow().resolve(key).cast::<T>();

        (ptr, fence)
    }

    /// Drops the value of a live block and returns its slot to the free set.
    pub(crate) fn release(&self, key: BlockKey) {
        let unregistered = self.core.raw.borrow_mut().unregister(key);

        // The slot must not move while the destructor runs. Declared before the guard below,
        // so the slot is released before the fence is lifted.
        let _fence = self.fence();

        let ptr = unregistered.ptr();
        let dropper = unregistered.dropper();

        // The slot is released even if the destructor panics.
        let _unregistered = scopeguard::guard(unregistered, |unregistered| {
            self.core.raw.borrow_mut().release(unregistered);
        });

        // SAFETY: The block was live, so the slot holds an initialized value of the type the
        // dropper was created for. Its directory entry is gone, so nothing can reach it again.
        unsafe {
            dropper.drop_in_place(ptr);
        }
    }

    /// Moves the value of a live block out of the pool and returns its slot to the free set.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that the block holds a value of type `T`.
    #[must_use]
    pub(crate) unsafe fn take<T>(&self, key: BlockKey) -> T {
        let mut raw = self.core.raw.borrow_mut();
        let unregistered = raw.unregister(key);

        // SAFETY: The caller guarantees the type. The block was live, so the value is
        // initialized, and its directory entry is gone, so it will not be dropped in place.
        let value = unsafe { unregistered.ptr().cast::<T>().read() };

        raw.release(unregistered);

        value
    }

    fn fence(&self) -> Fence<'_> {
        Fence::new(&self.core.fences)
    }
}
