/// Computes a list of size classes from the types that are going to be stored in a pool.
///
/// The result is the distinct sizes of all candidate types, in ascending order. Zero-sized
/// types contribute nothing.
///
/// See also [`size_classes_for!`][crate::size_classes_for] for a more compact form.
///
/// # Example
///
/// ```
/// use new_zealand::nz;
/// use size_class_pool::{SizeClassPool, SizeClassSelector};
///
/// let sizes = SizeClassSelector::new()
///     .with::<u64>()
///     .with::<u32>()
///     .with::<f64>()
///     .with::<u8>()
///     .with_size(2)
///     .into_sizes();
///
/// assert_eq!(sizes, vec![1, 2, 4, 8]);
///
/// let pool = SizeClassPool::new(nz!(1), sizes);
/// assert_eq!(pool.total_block_count(), 4);
/// assert_eq!(pool.total_byte_size(), 15);
/// ```
#[derive(Clone, Debug, Default)]
#[must_use]
pub struct SizeClassSelector {
    sizes: Vec<usize>,
}

impl SizeClassSelector {
    /// Creates a selector without any candidates.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the size of `T` as a candidate.
    pub fn with<T>(self) -> Self {
        self.with_size(size_of::<T>())
    }

    /// Adds an explicit byte size as a candidate. A size of zero is ignored.
    pub fn with_size(mut self, size: usize) -> Self {
        if size != 0 {
            self.sizes.push(size);
        }

        self
    }

    /// The distinct candidate sizes in ascending order.
    #[must_use]
    pub fn into_sizes(mut self) -> Vec<usize> {
        self.sizes.sort_unstable();
        self.sizes.dedup();
        self.sizes
    }
}

/// Lists the distinct sizes of the given types in ascending order, as a `Vec<usize>` that can
/// be used to create a [`SizeClassPool`][crate::SizeClassPool].
///
/// Zero-sized types contribute nothing.
///
/// # Example
///
/// ```
/// use size_class_pool::size_classes_for;
///
/// let sizes = size_classes_for![u64, u32, f64, u8, u32, u16, ()];
/// assert_eq!(sizes, vec![1, 2, 4, 8]);
/// ```
#[macro_export]
macro_rules! size_classes_for {
    ($($candidate:ty),* $(,)?) => {
        $crate::SizeClassSelector::new()
            $(.with::<$candidate>())*
            .into_sizes()
    };
}
