//! Error type shared by every MMU operation.

/// Non-fatal failures reported by the MMU backend.
///
/// Conditions that would leave translation state corrupt (switching into an
/// unsupported address space, freeing a table that still holds entries) are
/// not represented here; they halt instead of returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MmuError {
    /// Misaligned address, range outside the address space window, or a
    /// flag combination that has no meaning on this backend.
    #[error("invalid argument")]
    InvalidArgument,
    /// The page allocator could not supply storage for a new table.
    #[error("out of memory for page tables")]
    OutOfMemory,
    /// No valid translation exists for the address.
    #[error("no mapping found")]
    NotFound,
    /// The backend does not implement the requested capability.
    #[error("operation not supported by this MMU")]
    NotSupported,
}
