use core::alloc::Layout;
use core::fmt;

/// The error type for [`HashMap::try_reserve`] and the fallible growth paths
/// behind it.
///
/// A failed reservation leaves the map exactly as it was: the new group
/// storage is allocated before any entry is moved.
///
/// [`HashMap::try_reserve`]: crate::HashMap::try_reserve
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum TryReserveError {
    /// The requested group count does not fit in `usize` or exceeds
    /// `isize::MAX` bytes.
    CapacityOverflow,
    /// The allocator returned an error.
    AllocError {
        /// The layout of the allocation request that failed.
        layout: Layout,
    },
}

impl fmt::Display for TryReserveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryReserveError::CapacityOverflow => {
                f.write_str("capacity overflow while sizing hash table groups")
            }
            TryReserveError::AllocError { layout } => write!(
                f,
                "memory allocation of {} bytes for hash table groups failed",
                layout.size()
            ),
        }
    }
}

impl core::error::Error for TryReserveError {}

impl TryReserveError {
    /// Converts the error into the panic or allocation-failure abort that
    /// infallible entry points use.
    #[cold]
    #[inline(never)]
    pub(crate) fn handle(self) -> ! {
        match self {
            TryReserveError::CapacityOverflow => panic!("capacity overflow"),
            TryReserveError::AllocError { layout } => alloc::alloc::handle_alloc_error(layout),
        }
    }
}
