use std::fmt;

use crate::{BlockKey, OwnedBlock, Pooled, PooledRef, PooledRefMut};

/// Exclusive owner of a value stored in a [`SizeClassPool`][crate::SizeClassPool].
///
/// Created by [`SizeClassPool::construct()`][crate::SizeClassPool::construct] and its
/// variants. Dropping or resetting the handle drops the value and returns its slot to the pool.
///
/// A handle can also be empty, owning nothing. [`Default`] creates an empty handle and
/// [`reset()`][Self::reset] makes a handle empty.
///
/// Access to the value goes through the guards returned by [`get()`][Self::get] and
/// [`get_mut()`][Self::get_mut], which keep the value in place while they exist.
///
/// # Example
///
/// ```
/// use new_zealand::nz;
/// use size_class_pool::SizeClassPool;
///
/// let pool = SizeClassPool::new(nz!(4), [8, 32]);
///
/// let mut counter = pool.construct(0_u64).unwrap();
/// *counter.get_mut() += 5;
/// assert_eq!(*counter.get(), 5);
///
/// counter.reset();
/// assert!(counter.is_empty());
/// assert!(pool.is_empty());
/// ```
///
/// # Thread safety
///
/// This type is neither [`Send`] nor [`Sync`].
pub struct PooledMut<T> {
    block: Option<OwnedBlock<T>>,
}

impl<T> PooledMut<T> {
    #[must_use]
    pub(crate) fn new(block: OwnedBlock<T>) -> Self {
        Self { block: Some(block) }
    }

    /// Whether the handle owns no value.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.block.is_none()
    }

    /// The stable identity of the owned value, or `None` if the handle is empty.
    #[must_use]
    pub fn block_key(&self) -> Option<BlockKey> {
        self.block.as_ref().map(OwnedBlock::key)
    }

    /// Borrows the value.
    ///
    /// # Panics
    ///
    /// Panics if the handle is empty.
    #[must_use]
    pub fn get(&self) -> PooledRef<'_, T> {
        self.try_get().expect("cannot access the value of an empty handle")
    }

    /// Borrows the value, or returns `None` if the handle is empty.
    #[must_use]
    pub fn try_get(&self) -> Option<PooledRef<'_, T>> {
        self.block.as_ref().map(OwnedBlock::get)
    }

    /// Borrows the value mutably.
    ///
    /// # Panics
    ///
    /// Panics if the handle is empty.
    #[must_use]
    pub fn get_mut(&mut self) -> PooledRefMut<'_, T> {
        self.try_get_mut()
            .expect("cannot access the value of an empty handle")
    }

    /// Borrows the value mutably, or returns `None` if the handle is empty.
    #[must_use]
    pub fn try_get_mut(&mut self) -> Option<PooledRefMut<'_, T>> {
        self.block.as_mut().map(OwnedBlock::get_mut)
    }

    /// Drops the owned value, if any, and leaves the handle empty.
    ///
    /// Resetting an empty handle has no effect.
    pub fn reset(&mut self) {
        // Taken first, so the handle is already empty if the destructor panics.
        drop(self.block.take());
    }

    /// Converts the handle into a shared handle that owns the same value.
    ///
    /// The value stays where it is. An empty handle converts into an empty shared handle.
    ///
    /// # Example
    ///
    /// ```
    /// use new_zealand::nz;
    /// use size_class_pool::SizeClassPool;
    ///
    /// let pool = SizeClassPool::new(nz!(4), [32]);
    ///
    /// let mut list = pool.construct(vec![1, 2]).unwrap();
    /// list.get_mut().push(3);
    ///
    /// let shared = list.into_shared();
    /// let alias = shared.clone();
    /// assert_eq!(*alias.get(), vec![1, 2, 3]);
    /// assert_eq!(shared.use_count(), 2);
    /// ```
    #[must_use]
    pub fn into_shared(mut self) -> Pooled<T> {
        match self.block.take() {
            Some(block) => Pooled::new(block),
            None => Pooled::default(),
        }
    }

    /// Moves the value out of the pool, returning its slot to the pool without dropping the
    /// value. Returns `None` if the handle is empty.
    ///
    /// # Example
    ///
    /// ```
    /// use new_zealand::nz;
    /// use size_class_pool::SizeClassPool;
    ///
    /// let pool = SizeClassPool::new(nz!(4), [32]);
    ///
    /// let name = pool.construct("pooled".to_string()).unwrap();
    /// let name: String = name.into_inner().unwrap();
    ///
    /// assert_eq!(name, "pooled");
    /// assert!(pool.is_empty());
    /// ```
    #[must_use]
    pub fn into_inner(mut self) -> Option<T> {
        self.block.take().map(OwnedBlock::into_inner)
    }
}

impl<T> Default for PooledMut<T> {
    fn default() -> Self {
        Self { block: None }
    }
}

impl<T> fmt::Debug for PooledMut<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledMut")
            .field("block_key", &self.block_key())
            .finish()
    }
}
