//! Architecture-neutral mapping flags.

use bitflags::bitflags;

bitflags! {
    /// Generic permission and cacheability bits for a leaf mapping.
    ///
    /// The empty set means a cached, read-write, kernel-only, executable page.
    /// The two low bits form the cache field; setting both is not a valid
    /// cache policy and is rejected by `map`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MappingFlags: u32 {
        /// Strongly ordered, non-cacheable normal memory.
        const UNCACHED = 1 << 0;
        /// Device memory (non-cacheable, serialized).
        const UNCACHED_DEVICE = 1 << 1;
        /// Accessible from user mode.
        const USER = 1 << 2;
        /// Writes fault.
        const READ_ONLY = 1 << 3;
        /// Instruction fetches fault.
        const NO_EXECUTE = 1 << 4;
        /// Non-secure world mapping.
        const NON_SECURE = 1 << 5;
    }
}

/// Cache behavior selected by the two-bit cache field of [`MappingFlags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    Cached,
    Uncached,
    Device,
}

impl MappingFlags {
    /// Bits that make up the cache field.
    pub const CACHE_MASK: Self = Self::UNCACHED.union(Self::UNCACHED_DEVICE);

    /// Returns the cache policy, or `None` if the cache field holds the
    /// unassigned encoding.
    pub const fn cache_policy(self) -> Option<CachePolicy> {
        match self.bits() & Self::CACHE_MASK.bits() {
            0 => Some(CachePolicy::Cached),
            1 => Some(CachePolicy::Uncached),
            2 => Some(CachePolicy::Device),
            _ => None,
        }
    }

    /// Replaces the cache field with `policy`.
    pub const fn with_cache_policy(self, policy: CachePolicy) -> Self {
        let cleared = self.difference(Self::CACHE_MASK);
        match policy {
            CachePolicy::Cached => cleared,
            CachePolicy::Uncached => cleared.union(Self::UNCACHED),
            CachePolicy::Device => cleared.union(Self::UNCACHED_DEVICE),
        }
    }
}
