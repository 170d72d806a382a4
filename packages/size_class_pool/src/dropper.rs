use std::ptr::{self, NonNull};

/// Remembers how to drop an object of some type while forgetting the type.
///
/// Unlike a pointer-bound dropper, this does not remember where the object is. The pool may
/// relocate objects, so the current address is supplied at the time of dropping.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ErasedDrop {
    drop_fn: unsafe fn(NonNull<u8>),
}

impl ErasedDrop {
    /// Creates an `ErasedDrop` that drops objects of type `T`.
    #[must_use]
    pub(crate) fn of<T>() -> Self {
        Self {
            drop_fn: drop_fn::<T>,
        }
    }

    /// Drops the object at `target` in place.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// 1. `target` points to a valid, initialized object of the type this `ErasedDrop`
    ///    was created for.
    /// 2. The object is not used or dropped again afterwards.
    pub(crate) unsafe fn drop_in_place(self, target: NonNull<u8>) {
        // SAFETY: Forwarding safety requirements to the caller.
        unsafe {
            (self.drop_fn)(target);
        }
    }
}

/// # Safety
///
/// Same requirements as [`ErasedDrop::drop_in_place()`].
unsafe fn drop_fn<T>(target: NonNull<u8>) {
    // SAFETY: ErasedDrop::drop_in_place() forwards its safety requirements here.
    unsafe {
        ptr::drop_in_place(target.cast::<T>().as_ptr());
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;
    use std::mem::ManuallyDrop;
    use std::rc::Rc;

    use super::*;

    /// Test helper that counts how many times it has been dropped.
    struct DropCounter {
        drops: Rc<Cell<usize>>,
    }

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    #[test]
    fn drops_target_once() {
        let drops = Rc::new(Cell::new(0));
        let mut target = ManuallyDrop::new(DropCounter {
            drops: Rc::clone(&drops),
        });

        let dropper = ErasedDrop::of::<DropCounter>();
        assert_eq!(drops.get(), 0);

        // SAFETY: The target is initialized and ManuallyDrop prevents a second drop.
        unsafe {
            dropper.drop_in_place(NonNull::from(&mut *target).cast());
        }

        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn drops_complex_types() {
        let drops = Rc::new(Cell::new(0));
        let mut target = ManuallyDrop::new((
            vec!["hello".to_string(), "world".to_string()],
            DropCounter {
                drops: Rc::clone(&drops),
            },
        ));

        let dropper = ErasedDrop::of::<(Vec<String>, DropCounter)>();

        // SAFETY: The target is initialized and ManuallyDrop prevents a second drop.
        unsafe {
            dropper.drop_in_place(NonNull::from(&mut *target).cast());
        }

        assert_eq!(drops.get(), 1);
    }
}
