use thiserror::Error;

/// Errors reported by [`SizeClassPool`][crate::SizeClassPool] operations.
///
/// Every operation that returns one of these errors has left the pool exactly as it was
/// before the call.
#[derive(Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum PoolError {
    /// None of the size classes of the pool is large enough, or sufficiently aligned,
    /// to hold a value of the requested type.
    #[error("no size class can hold a value of {size} bytes with alignment {align}")]
    NoFittingSizeClass {
        /// Size in bytes of the type that was requested.
        size: usize,

        /// Alignment in bytes of the type that was requested.
        align: usize,
    },

    /// The operation requires every size class to be empty but at least one size class
    /// still holds objects.
    #[error("size class of {class_size} bytes still holds {occupied} objects")]
    InvalidState {
        /// Slot size in bytes of the first size class found to be non-empty.
        class_size: usize,

        /// Number of objects held by that size class, including any whose construction
        /// is still in progress.
        occupied: usize,
    },
}

/// A specialized `Result` type for pool operations, returning the crate's
/// [`PoolError`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, PoolError>;
