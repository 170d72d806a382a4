use std::cell::Cell;
use std::fmt;
use std::ops::{Deref, DerefMut};

/// Keeps pooled objects in place for as long as it exists.
///
/// [`SizeClassPool::shrink_to_fit()`][crate::SizeClassPool::shrink_to_fit] moves objects to new
/// storage and refuses to run while any fence exists. A fence is held by every access guard and
/// by the pool itself while it runs user code (constructors and destructors) against a slot.
#[derive(Debug)]
pub(crate) struct Fence<'a> {
    count: &'a Cell<usize>,
}

impl<'a> Fence<'a> {
    #[must_use]
    pub(crate) fn new(count: &'a Cell<usize>) -> Self {
        count.set(
            count
                .get()
                .checked_add(1)
                .expect("fence count cannot overflow without exhausting memory first"),
        );

        Self { count }
    }
}

impl Drop for Fence<'_> {
    fn drop(&mut self) {
        // Cannot underflow because this fence incremented the count when it was created.
        self.count.set(self.count.get().wrapping_sub(1));
    }
}

/// Shared access to a value stored in a [`SizeClassPool`][crate::SizeClassPool].
///
/// Returned by [`Pooled::get()`][crate::Pooled::get] and
/// [`PooledMut::get()`][crate::PooledMut::get]. While this guard exists, the pool will not
/// relocate any of its objects: calling
/// [`shrink_to_fit()`][crate::SizeClassPool::shrink_to_fit] panics.
///
/// # Example
///
/// ```
/// use new_zealand::nz;
/// use size_class_pool::SizeClassPool;
///
/// let pool = SizeClassPool::new(nz!(4), [8, 32]);
/// let name = pool.construct_shared("pooled".to_string()).unwrap();
///
/// let value = name.get();
/// assert_eq!(value.len(), 6);
/// assert!(value.starts_with("pool"));
/// ```
pub struct PooledRef<'a, T> {
    value: &'a T,
    _fence: Fence<'a>,
}

impl<'a, T> PooledRef<'a, T> {
    #[must_use]
    pub(crate) fn new(value: &'a T, fence: Fence<'a>) -> Self {
        Self {
            value,
            _fence: fence,
        }
    }
}

impl<T> Deref for PooledRef<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for PooledRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.value, f)
    }
}

/// Exclusive access to a value stored in a [`SizeClassPool`][crate::SizeClassPool].
///
/// Returned by [`PooledMut::get_mut()`][crate::PooledMut::get_mut]. While this guard exists,
/// the pool will not relocate any of its objects.
///
/// # Example
///
/// ```
/// use new_zealand::nz;
/// use size_class_pool::SizeClassPool;
///
/// let pool = SizeClassPool::new(nz!(4), [32]);
/// let mut greeting = pool.construct("Hello".to_string()).unwrap();
///
/// greeting.get_mut().push_str(", world");
/// assert_eq!(*greeting.get(), "Hello, world");
/// ```
pub struct PooledRefMut<'a, T> {
    value: &'a mut T,
    _fence: Fence<'a>,
}

impl<'a, T> PooledRefMut<'a, T> {
    #[must_use]
    pub(crate) fn new(value: &'a mut T, fence: Fence<'a>) -> Self {
        Self {
            value,
            _fence: fence,
        }
    }
}

impl<T> Deref for PooledRefMut<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.value
    }
}

impl<T> DerefMut for PooledRefMut<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for PooledRefMut<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.value, f)
    }
}
