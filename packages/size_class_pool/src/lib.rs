#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! An object pool that stores values of any type in slots of a fixed set of sizes.
//!
//! This crate provides [`SizeClassPool`], a pool created with a list of slot sizes (size
//! classes). Each size class owns chunks of equally sized slots. Every value is stored in the
//! smallest size class whose slots are large enough and sufficiently aligned for its type, so
//! values of many different types share one pool without any per-value heap allocation.
//!
//! # Key Features
//!
//! - **Any value type**: The size class is chosen from the type at construction time.
//! - **Two handle types**: [`PooledMut<T>`] for exclusive ownership, [`Pooled<T>`] for
//!   reference-counted shared ownership.
//! - **Automatic cleanup**: A value is dropped and its slot reused when its last handle goes.
//! - **Failure-safe construction**: A slot reserved for a constructor that fails or panics is
//!   returned to the pool.
//! - **Predictable growth**: Size classes grow by a fixed number of slots without moving
//!   existing values.
//! - **Compaction**: [`SizeClassPool::shrink_to_fit()`] releases unused storage, moving live
//!   values while their handles stay valid.
//!
//! # Accessing values
//!
//! Because the pool may move values during compaction, handles do not dereference to the value
//! directly. Instead, [`PooledMut::get()`], [`PooledMut::get_mut()`] and [`Pooled::get()`]
//! return short-lived guards ([`PooledRef`], [`PooledRefMut`]) that dereference to the value.
//! While any guard exists, the pool keeps every value in place and compaction panics.
//!
//! # Example
//!
//! ```rust
//! use new_zealand::nz;
//! use size_class_pool::{SizeClassPool, size_classes_for};
//!
//! let pool = SizeClassPool::new(nz!(16), size_classes_for![u8, u64, [u64; 4]]);
//!
//! let mut name = pool.construct("pooled".to_string()).unwrap();
//! name.get_mut().push_str(" value");
//!
//! let shared = pool.construct_shared(7_u8).unwrap();
//! let alias = shared.clone();
//!
//! assert_eq!(*name.get(), "pooled value");
//! assert_eq!(*alias.get(), 7);
//! assert_eq!(pool.len(), 2);
//!
//! drop(name);
//! drop(shared);
//! drop(alias);
//!
//! pool.shrink_to_fit();
//! assert_eq!(pool.total_block_count(), 0);
//! ```
//!
//! # Thread safety
//!
//! The pool and its handles are single-threaded: none of them are [`Send`] or [`Sync`].

mod access;
mod block;
mod builder;
mod chunk;
mod class_info;
mod coordinates;
mod directory;
mod dropper;
mod error;
mod pool;
mod pooled;
mod pooled_mut;
mod raw;
mod selector;
mod size_class;

pub(crate) use access::Fence;
pub use access::{PooledRef, PooledRefMut};
pub(crate) use block::*;
pub use builder::*;
pub(crate) use chunk::*;
pub use class_info::*;
pub use coordinates::BlockKey;
pub(crate) use coordinates::SlotAddress;
pub(crate) use directory::*;
pub(crate) use dropper::*;
pub use error::PoolError;
pub use pool::*;
pub use pooled::*;
pub use pooled_mut::*;
pub(crate) use raw::*;
pub use selector::*;
pub(crate) use size_class::*;
