use core::alloc::Layout;
use core::fmt;

/// Errors reported by [`HashMap`](crate::HashMap) and
/// [`HashTable`](crate::HashTable).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The requested key is not present in the map.
    KeyNotFound,
    /// The requested capacity does not fit in the address space.
    CapacityOverflow,
    /// The allocator failed to provide memory for the given layout. The table
    /// is left unchanged.
    AllocationFailure {
        /// The layout of the allocation that failed.
        layout: Layout,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::KeyNotFound => f.write_str("key not found"),
            Error::CapacityOverflow => f.write_str("capacity overflow"),
            Error::AllocationFailure { layout } => write!(
                f,
                "memory allocation of {} bytes (align {}) failed",
                layout.size(),
                layout.align()
            ),
        }
    }
}

impl core::error::Error for Error {}

#[cfg(test)]
mod tests {
    use alloc::string::ToString;

    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(Error::KeyNotFound.to_string(), "key not found");
        assert_eq!(Error::CapacityOverflow.to_string(), "capacity overflow");

        let layout = Layout::from_size_align(64, 8).unwrap();
        assert_eq!(
            Error::AllocationFailure { layout }.to_string(),
            "memory allocation of 64 bytes (align 8) failed"
        );
    }
}
