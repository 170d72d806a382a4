use std::fmt;
use std::rc::Rc;

use crate::{BlockKey, OwnedBlock, PooledRef};

/// Shared owner of a value stored in a [`SizeClassPool`][crate::SizeClassPool].
///
/// Created by [`SizeClassPool::construct_shared()`][crate::SizeClassPool::construct_shared] and
/// its variants, or from an exclusive handle via
/// [`PooledMut::into_shared()`][crate::PooledMut::into_shared]. Cloning the handle creates
/// another owner of the same value. The value is dropped and its slot returned to the pool
/// when the last owner is dropped or reset.
///
/// All owners keep referring to the same value when the pool relocates it during
/// [`shrink_to_fit()`][crate::SizeClassPool::shrink_to_fit].
///
/// # Example
///
/// ```
/// use new_zealand::nz;
/// use size_class_pool::SizeClassPool;
///
/// let pool = SizeClassPool::new(nz!(4), [8, 32]);
///
/// let a = pool.construct_shared(35.0_f64).unwrap();
/// let b = a.clone();
/// assert!(a.ptr_eq(&b));
/// assert_eq!(a.use_count(), 2);
///
/// drop(a);
/// assert_eq!(*b.get(), 35.0);
/// assert_eq!(b.use_count(), 1);
/// ```
///
/// # Thread safety
///
/// This type is neither [`Send`] nor [`Sync`].
pub struct Pooled<T> {
    block: Option<Rc<OwnedBlock<T>>>,
}

impl<T> Pooled<T> {
    #[must_use]
    pub(crate) fn new(block: OwnedBlock<T>) -> Self {
        Self {
            block: Some(Rc::new(block)),
        }
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
        self.block.as_deref().map(OwnedBlock::key)
    }

    /// Number of handles that own the value, including this one. Zero if the handle is empty.
    #[must_use]
    pub fn use_count(&self) -> usize {
        self.block.as_ref().map_or(0, Rc::strong_count)
    }

    /// Whether both handles own the same value. Two empty handles are considered equal.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.block, &other.block) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
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
        self.block.as_deref().map(OwnedBlock::get)
    }

    /// Gives up this handle's ownership and leaves the handle empty. If this was the last
    /// owner, the value is dropped.
    ///
    /// Resetting an empty handle has no effect.
    pub fn reset(&mut self) {
        // Taken first, so the handle is already empty if the destructor panics.
        drop(self.block.take());
    }

    /// Moves the value out of the pool if this handle is its only owner.
    ///
    /// Returns `Ok(None)` for an empty handle and gives the handle back unchanged if other
    /// owners exist.
    ///
    /// # Example
    ///
    /// ```
    /// use new_zealand::nz;
    /// use size_class_pool::SizeClassPool;
    ///
    /// let pool = SizeClassPool::new(nz!(4), [8]);
    ///
    /// let a = pool.construct_shared(7_u32).unwrap();
    /// let b = a.clone();
    ///
    /// let a = a.try_into_inner().unwrap_err();
    /// drop(b);
    ///
    /// assert_eq!(a.try_into_inner().unwrap(), Some(7));
    /// assert!(pool.is_empty());
    /// ```
    pub fn try_into_inner(mut self) -> Result<Option<T>, Self> {
        let Some(block) = self.block.take() else {
            return Ok(None);
        };

        match Rc::try_unwrap(block) {
            Ok(block) => Ok(Some(block.into_inner())),
            Err(block) => Err(Self { block: Some(block) }),
        }
    }
}

impl<T> Clone for Pooled<T> {
    fn clone(&self) -> Self {
        Self {
            block: self.block.clone(),
        }
    }
}

impl<T> Default for Pooled<T> {
    fn default() -> Self {
        Self { block: None }
    }
}

impl<T> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("block_key", &self.block_key())
            .field("use_count", &self.use_count())
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;

    use new_zealand::nz;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::SizeClassPool;

    assert_impl_all!(Pooled<u32>: Clone, Default);
    assert_not_impl_any!(Pooled<u32>: Send, Sync);

    #[test]
    fn last_owner_drops_value() {
        struct Flag(Rc<Cell<bool>>);

        impl Drop for Flag {
            fn drop(&mut self) {
                self.0.set(true);
            }
        }

        let pool = SizeClassPool::new(nz!(2), [8]);
        let dropped = Rc::new(Cell::new(false));

        let mut a = pool
            .construct_shared(Flag(Rc::clone(&dropped)))
            .unwrap();
        let b = a.clone();

        a.reset();
        assert!(!dropped.get());
        assert_eq!(b.use_count(), 1);

        drop(b);
        assert!(dropped.get());
        assert!(pool.is_empty());
    }

    #[test]
    fn empty_handles() {
        let a = Pooled::<u64>::default();
        let b = a.clone();

        assert!(a.is_empty());
        assert!(a.ptr_eq(&b));
        assert_eq!(a.use_count(), 0);
        assert!(a.try_get().is_none());
        assert!(matches!(b.try_into_inner(), Ok(None)));
    }

    #[test]
    fn distinct_values_are_not_ptr_eq() {
        let pool = SizeClassPool::new(nz!(2), [8]);

        let a = pool.construct_shared(1_u64).unwrap();
        let b = pool.construct_shared(1_u64).unwrap();

        assert!(!a.ptr_eq(&b));
        assert!(!a.ptr_eq(&Pooled::default()));
        assert_ne!(a.block_key(), b.block_key());
    }

    #[test]
    #[should_panic]
    fn get_on_empty_panics() {
        let handle = Pooled::<u64>::default();
        _ = handle.get();
    }
}
