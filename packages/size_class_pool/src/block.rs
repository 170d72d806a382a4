use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ptr;

use crate::{BlockKey, PooledRef, PooledRefMut, SizeClassPool};

/// Sole owner of one live `T` stored in a pool.
///
/// Dropping the owner drops the value and returns its slot to the pool. Both handle types are
/// built on top of this: [`PooledMut<T>`][crate::PooledMut] owns one directly, while
/// [`Pooled<T>`][crate::Pooled] shares one through an `Rc`.
pub(crate) struct OwnedBlock<T> {
    pool: SizeClassPool,
    key: BlockKey,

    // We drop a T when we are dropped.
    _value: PhantomData<T>,
}

impl<T> OwnedBlock<T> {
    /// The block must hold a live value of type `T`.
    #[must_use]
    pub(crate) fn new(pool: SizeClassPool, key: BlockKey) -> Self {
        Self {
            pool,
            key,
            _value: PhantomData,
        }
    }

    #[must_use]
    pub(crate) fn key(&self) -> BlockKey {
        self.key
    }

    #[must_use]
    pub(crate) fn get(&self) -> PooledRef<'_, T> {
        let (ptr, fence) = self.pool.access::<T>(self.key);

        // SAFETY: The block holds an initialized T for as long as we exist. The fence keeps it
        // at this address for the lifetime of the guard. We hand out only shared references
        // from a shared borrow of the owner.
        let value = unsafe { ptr.as_ref() };

        PooledRef::new(value, fence)
    }

    #[must_use]
    pub(crate) fn get_mut(&mut self) -> PooledRefMut<'_, T> {
        let (mut ptr, fence) = self.pool.access::<T>(self.key);

        // SAFETY: As for `get()`, and we are the only owner of the value, borrowed exclusively.
        let value = unsafe { ptr.as_mut() };

        PooledRefMut::new(value, fence)
    }

    /// Moves the value out of the pool, returning its slot to the pool.
    #[must_use]
    pub(crate) fn into_inner(self) -> T {
        let this = ManuallyDrop::new(self);

        // SAFETY: The block was created for a T.
        let value = unsafe { this.pool.take::<T>(this.key) };

        // SAFETY: `this` is never used or dropped after this point, so the pool handle is
        // moved out exactly once.
        drop(unsafe { ptr::read(&this.pool) });

        value
    }
}

impl<T> Drop for OwnedBlock<T> {
    fn drop(&mut self) {
        self.pool.release(self.key);
    }
}

impl<T> fmt::Debug for OwnedBlock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedBlock")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
