//! Tests for `SizeClassPool` through its public API.
//!
//! These cover storage accounting, growth, compaction, resizing, failed constructions and the
//! lifetime rules of both handle types.

use std::cell::{Cell, RefCell};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr;
use std::rc::Rc;

use new_zealand::nz;
use size_class_pool::{
    PoolError, Pooled, PooledMut, SizeClassPool, SizeClassSelector, size_classes_for,
};
use static_assertions::assert_not_impl_any;

assert_not_impl_any!(SizeClassPool: Send, Sync);
assert_not_impl_any!(PooledMut<u64>: Send, Sync);
assert_not_impl_any!(Pooled<u64>: Send, Sync);

/// Counts how many times values created from it have been dropped.
#[derive(Clone, Debug, Default)]
struct DropTracker(Rc<Cell<usize>>);

impl DropTracker {
    fn value(&self, payload: u64) -> Tracked {
        Tracked {
            payload,
            tracker: self.clone(),
        }
    }

    fn drops(&self) -> usize {
        self.0.get()
    }
}

#[derive(Debug)]
struct Tracked {
    payload: u64,
    tracker: DropTracker,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.tracker.0.set(self.tracker.0.get() + 1);
    }
}

#[test]
fn shrinks_and_resizes_with_four_classes() {
    let pool = SizeClassPool::new(nz!(5), [2, 8, 32, 64]);
    let mut pair = pool.construct((35.0_f64, 36.0_f64)).unwrap();

    assert_eq!(pool.total_block_count(), 5 * 4);
    assert_eq!(pool.total_byte_size(), (2 + 8 + 32 + 64) * 5);

    assert_eq!(pair.get().0.to_bits(), 35.0_f64.to_bits());
    assert_eq!(pair.get().1.to_bits(), 36.0_f64.to_bits());

    pool.shrink_to_fit();
    assert_eq!(pool.total_block_count(), 1);
    assert_eq!(pool.total_byte_size(), 32);

    pair.reset();
    pool.shrink_to_fit();
    assert_eq!(pool.total_block_count(), 0);
    assert_eq!(pool.total_byte_size(), 0);

    pool.resize(nz!(6)).unwrap();
    assert_eq!(pool.total_block_count(), 6 * 4);
    assert_eq!(pool.total_byte_size(), (2 + 8 + 32 + 64) * 6);
}

#[test]
fn shrinks_and_resizes_with_two_classes() {
    let pool = SizeClassPool::new(nz!(5), [4, 16]);
    let mut answer = pool.construct(42_i32).unwrap();

    assert_eq!(pool.total_block_count(), 5 * 2);
    assert_eq!(pool.total_byte_size(), (4 + 16) * 5);
    assert_eq!(*answer.get(), 42);

    pool.shrink_to_fit();
    assert_eq!(pool.total_block_count(), 1);
    assert_eq!(pool.total_byte_size(), 4);

    answer.reset();
    pool.shrink_to_fit();
    assert_eq!(pool.total_block_count(), 0);
    assert_eq!(pool.total_byte_size(), 0);

    pool.resize(nz!(6)).unwrap();
    assert_eq!(pool.total_block_count(), 6 * 2);
    assert_eq!(pool.total_byte_size(), (4 + 16) * 6);
}

#[test]
fn shared_handles_keep_value_through_shrink() {
    let pool = SizeClassPool::new(nz!(5), [2, 8, 32, 64]);
    let mut a = pool.construct_shared(35.0_f32).unwrap();
    let mut b = a.clone();

    assert_eq!(pool.total_block_count(), 5 * 4);
    assert_eq!(pool.total_byte_size(), (2 + 8 + 32 + 64) * 5);
    assert_eq!(a.get().to_bits(), 35.0_f32.to_bits());
    assert_eq!(b.get().to_bits(), 35.0_f32.to_bits());

    pool.shrink_to_fit();
    assert_eq!(pool.total_block_count(), 1);
    assert_eq!(pool.total_byte_size(), 8);

    a.reset();
    pool.shrink_to_fit();
    assert_eq!(pool.total_block_count(), 1);
    assert_eq!(pool.total_byte_size(), 8);
    assert_eq!(b.get().to_bits(), 35.0_f32.to_bits());

    b.reset();
    pool.shrink_to_fit();
    assert_eq!(pool.total_block_count(), 0);
    assert_eq!(pool.total_byte_size(), 0);
}

#[test]
fn shared_handles_with_two_classes() {
    let pool = SizeClassPool::new(nz!(5), [4, 16]);
    let mut a = pool.construct_shared(42_i32).unwrap();
    let mut b = a.clone();

    assert_eq!(pool.total_block_count(), 5 * 2);
    assert_eq!(pool.total_byte_size(), (4 + 16) * 5);
    assert_eq!(*a.get(), 42);
    assert_eq!(*b.get(), 42);

    pool.shrink_to_fit();
    assert_eq!(pool.total_block_count(), 1);
    assert_eq!(pool.total_byte_size(), 4);

    a.reset();
    pool.shrink_to_fit();
    assert_eq!(pool.total_block_count(), 1);
    assert_eq!(pool.total_byte_size(), 4);

    b.reset();
    pool.shrink_to_fit();
    assert_eq!(pool.total_block_count(), 0);
    assert_eq!(pool.total_byte_size(), 0);
}

#[test]
fn failed_constructor_returns_slot() {
    #[derive(Debug, PartialEq)]
    enum BuildError {
        Pool(PoolError),
        Refused,
    }

    impl From<PoolError> for BuildError {
        fn from(error: PoolError) -> Self {
            Self::Pool(error)
        }
    }

    let pool = SizeClassPool::new(nz!(5), [2, 8, 32, 64]);

    let result = pool.try_construct_with(|| -> Result<[u64; 2], BuildError> {
        Err(BuildError::Refused)
    });
    assert_eq!(result.unwrap_err(), BuildError::Refused);
    assert!(pool.is_empty());

    pool.shrink_to_fit();
    assert_eq!(pool.total_block_count(), 0);
    assert_eq!(pool.total_byte_size(), 0);
}

#[test]
fn panicking_constructor_returns_slot() {
    let pool = SizeClassPool::new(nz!(5), [2, 8, 32, 64]);
    let mut handle = PooledMut::<u64>::default();

    let result = catch_unwind(AssertUnwindSafe(|| {
        handle = pool
            .construct_with(|| -> u64 { panic!("constructor failed") })
            .unwrap();
    }));

    assert!(result.is_err());
    assert!(handle.is_empty());
    assert!(pool.is_empty());

    pool.shrink_to_fit();
    assert_eq!(pool.total_block_count(), 0);
    assert_eq!(pool.total_byte_size(), 0);
}

#[test]
fn panicking_shared_constructor_returns_slot() {
    let pool = SizeClassPool::new(nz!(1), [8]);

    let result = catch_unwind(AssertUnwindSafe(|| {
        let _handle = pool.construct_shared_with(|| -> u64 { panic!("constructor failed") });
    }));

    assert!(result.is_err());
    assert_eq!(pool.size_classes()[0].free(), 1);
    assert_eq!(pool.total_block_count(), 1);
}

#[test]
fn no_fitting_class_leaves_pool_untouched() {
    let pool = SizeClassPool::new(nz!(2), [4, 16]);
    let before = pool.size_classes();

    let called = Cell::new(false);
    let result = pool.construct_with(|| {
        called.set(true);
        [0_u8; 32]
    });

    assert_eq!(
        result.unwrap_err(),
        PoolError::NoFittingSizeClass {
            size: 32,
            align: 1
        }
    );
    assert!(!called.get());
    assert_eq!(pool.size_classes(), before);
}

#[test]
fn alignment_is_part_of_class_selection() {
    // A 24-byte class only guarantees 8-byte alignment, so a 16-aligned type skips it.
    #[repr(align(16))]
    struct Aligned(u8);

    let pool = SizeClassPool::new(nz!(1), [24, 32]);

    let value = pool.construct(Aligned(3)).unwrap();
    assert_eq!(value.block_key().unwrap().class_index(), 1);
    assert_eq!(value.get().0, 3);

    let address = ptr::from_ref(&*value.get()).addr();
    assert_eq!(address % 16, 0);
}

#[test]
fn grows_one_slot_at_a_time() {
    let pool = SizeClassPool::new(nz!(1), [8]);
    let mut handles = Vec::new();

    for expected in 1..=4_usize {
        handles.push(pool.construct(expected).unwrap());
        assert_eq!(pool.total_block_count(), expected);
    }

    for (index, handle) in handles.iter().enumerate() {
        assert_eq!(*handle.get(), index + 1);
    }

    drop(handles);
    assert_eq!(pool.total_block_count(), 4);
    assert_eq!(pool.size_classes()[0].free(), 4);
}

#[test]
fn released_slot_is_reused_before_growing() {
    let pool = SizeClassPool::new(nz!(1), [8]);

    let first = pool.construct(1_u64).unwrap();
    let mut second = pool.construct(2_u64).unwrap();
    let _third = pool.construct(3_u64).unwrap();
    assert_eq!(pool.total_block_count(), 3);

    let freed_address = ptr::from_ref(&*second.get()).addr();
    second.reset();

    let fourth = pool.construct(4_u64).unwrap();
    assert_eq!(pool.total_block_count(), 3);
    assert_eq!(ptr::from_ref(&*fourth.get()).addr(), freed_address);
    assert_eq!(*first.get(), 1);
}

#[test]
fn growth_does_not_move_values() {
    let pool = SizeClassPool::new(nz!(2), [8]);

    let first = pool.construct(1_u64).unwrap();
    let address_before = ptr::from_ref(&*first.get()).addr();

    let _more: Vec<_> = (0..10_u64).map(|i| pool.construct(i).unwrap()).collect();

    let address_after = ptr::from_ref(&*first.get()).addr();
    assert_eq!(address_before, address_after);
}

#[test]
fn selector_feeds_pool() {
    let sizes = SizeClassSelector::new()
        .with::<u64>()
        .with::<u32>()
        .with::<f64>()
        .with::<u8>()
        .with::<i32>()
        .with::<u16>()
        .into_sizes();
    assert_eq!(sizes, vec![1, 2, 4, 8]);
    assert_eq!(sizes, size_classes_for![u64, u32, f64, u8, i32, u16]);

    let pool = SizeClassPool::new(nz!(1), sizes);
    assert_eq!(pool.total_block_count(), 4);
    assert_eq!(pool.total_byte_size(), 15);
}

#[test]
fn resize_rejected_while_value_is_live() {
    let pool = SizeClassPool::new(nz!(3), [4, 16]);
    let value = pool.construct_shared(1_u32).unwrap();
    let before = pool.size_classes();

    assert_eq!(
        pool.resize(nz!(10)),
        Err(PoolError::InvalidState {
            class_size: 4,
            occupied: 1
        })
    );
    assert_eq!(pool.size_classes(), before);
    assert_eq!(*value.get(), 1);
}

#[test]
fn resize_changes_growth_increment() {
    let pool = SizeClassPool::new(nz!(5), [8]);
    pool.resize(nz!(2)).unwrap();

    let _handles: Vec<_> = (0..3_u64).map(|i| pool.construct(i).unwrap()).collect();

    // Two in the resized chunk, then one growth step of two more.
    assert_eq!(pool.total_block_count(), 4);
    assert_eq!(pool.size_classes()[0].growth_increment(), nz!(2));
}

#[test]
fn shrink_preserves_values_and_aliases() {
    let pool = SizeClassPool::new(nz!(4), [8, 32]);
    let tracker = DropTracker::default();

    let mut exclusive: Vec<PooledMut<Tracked>> = (0..10)
        .map(|i| pool.construct(tracker.value(i)).unwrap())
        .collect();
    let shared = pool.construct_shared(tracker.value(100)).unwrap();
    let alias = shared.clone();

    // Leave gaps so that the shrink has to move values.
    for handle in exclusive.iter_mut().step_by(2) {
        handle.reset();
    }
    assert_eq!(tracker.drops(), 5);

    pool.shrink_to_fit();

    // Five exclusive plus one shared value remain.
    assert_eq!(pool.len(), 6);
    assert_eq!(pool.total_block_count(), 6);
    assert_eq!(tracker.drops(), 5);

    let remaining: Vec<u64> = exclusive
        .iter()
        .filter_map(|handle| handle.try_get().map(|value| value.payload))
        .collect();
    assert_eq!(remaining, vec![1, 3, 5, 7, 9]);

    assert!(shared.ptr_eq(&alias));
    assert_eq!(alias.get().payload, 100);
    assert_eq!(
        ptr::from_ref(&*shared.get()).addr(),
        ptr::from_ref(&*alias.get()).addr()
    );

    // Handles can still mutate after the move.
    exclusive[1].get_mut().payload = 33;
    assert_eq!(exclusive[1].get().payload, 33);

    drop(exclusive);
    drop(shared);
    assert_eq!(tracker.drops(), 10);

    drop(alias);
    assert_eq!(tracker.drops(), 11);
    assert!(pool.is_empty());
}

#[test]
fn every_value_dropped_exactly_once() {
    let pool = SizeClassPool::new(nz!(2), [8, 32, 64]);
    let tracker = DropTracker::default();

    {
        let a = pool.construct(tracker.value(1)).unwrap();
        let b = pool.construct_shared(tracker.value(2)).unwrap();
        let c = b.clone();
        let d = pool.construct(tracker.value(3)).unwrap().into_shared();

        pool.shrink_to_fit();

        drop(a);
        drop(b);
        drop(c);
        drop(d);
    }

    assert_eq!(tracker.drops(), 3);
    assert!(pool.is_empty());
}

#[test]
fn into_inner_moves_out_without_drop() {
    let pool = SizeClassPool::new(nz!(2), [32]);
    let tracker = DropTracker::default();

    let handle = pool.construct(tracker.value(9)).unwrap();
    let value = handle.into_inner().unwrap();

    assert_eq!(tracker.drops(), 0);
    assert_eq!(value.payload, 9);
    assert!(pool.is_empty());
    assert_eq!(pool.size_classes()[0].free(), 2);

    drop(value);
    assert_eq!(tracker.drops(), 1);
}

#[test]
fn values_outlive_pool_reference() {
    let handle = {
        let pool = SizeClassPool::new(nz!(2), [32]);
        pool.construct("still here".to_string()).unwrap()
    };

    assert_eq!(*handle.get(), "still here");
}

#[test]
fn pools_are_independent() {
    let a = SizeClassPool::new(nz!(1), [8]);
    let b = SizeClassPool::new(nz!(1), [8]);

    let _value = a.construct(1_u64).unwrap();

    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 0);
}

#[test]
fn values_may_hold_handles_into_same_pool() {
    struct Node {
        value: u32,
        next: Option<Pooled<Node>>,
    }

    let pool = SizeClassPool::new(nz!(2), [32]);

    let tail = pool
        .construct_shared(Node {
            value: 2,
            next: None,
        })
        .unwrap();
    let head = pool
        .construct_shared(Node {
            value: 1,
            next: Some(tail.clone()),
        })
        .unwrap();
    drop(tail);

    pool.shrink_to_fit();

    let next_value = head.get().next.as_ref().map(|next| next.get().value);
    assert_eq!(head.get().value, 1);
    assert_eq!(next_value, Some(2));

    // Dropping the head releases the tail from inside its destructor.
    drop(head);
    assert!(pool.is_empty());
}

#[test]
fn destructor_order_is_per_handle() {
    struct Logged(u32, Rc<RefCell<Vec<u32>>>);

    impl Drop for Logged {
        fn drop(&mut self) {
            self.1.borrow_mut().push(self.0);
        }
    }

    let pool = SizeClassPool::new(nz!(4), [32]);
    let log = Rc::new(RefCell::new(Vec::new()));

    let one = pool.construct(Logged(1, Rc::clone(&log))).unwrap();
    let two = pool.construct(Logged(2, Rc::clone(&log))).unwrap();
    let three = pool.construct(Logged(3, Rc::clone(&log))).unwrap();

    drop(two);
    drop(three);
    drop(one);

    assert_eq!(*log.borrow(), vec![2, 3, 1]);
}

#[test]
fn zero_sized_values_use_smallest_class() {
    let pool = SizeClassPool::new(nz!(1), [4, 8]);

    let unit = pool.construct(()).unwrap();
    assert_eq!(unit.block_key().unwrap().class_index(), 0);
    assert_eq!(pool.size_classes()[0].live(), 1);
}
