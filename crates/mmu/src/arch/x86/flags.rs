//! Flag codec shared by the 32-bit and 64-bit x86 formats.
//!
//! The low twelve bits of a 32-bit PTE and a 64-bit PTE have the same
//! meaning, so both formats encode through [`PageTableFlags`] and the 32-bit
//! backend truncates. Only the 64-bit format has an NX bit.

use x86_64::structures::paging::PageTableFlags;

use crate::arch::Validity;
use crate::{CachePolicy, MappingFlags};

/// Flags written into every pointer entry.
///
/// Permissions are decided at the leaf, so intermediate entries grant
/// everything.
pub(super) const TABLE_FLAGS: PageTableFlags = PageTableFlags::PRESENT
    .union(PageTableFlags::WRITABLE)
    .union(PageTableFlags::USER_ACCESSIBLE);

pub(super) fn encode_leaf(flags: MappingFlags, nx: bool) -> PageTableFlags {
    let mut bits = PageTableFlags::PRESENT;
    if !flags.contains(MappingFlags::READ_ONLY) {
        bits |= PageTableFlags::WRITABLE;
    }
    // Kernel pages are the same in every address space.
    if flags.contains(MappingFlags::USER) {
        bits |= PageTableFlags::USER_ACCESSIBLE;
    } else {
        bits |= PageTableFlags::GLOBAL;
    }
    match flags.cache_policy() {
        Some(CachePolicy::Uncached) => bits |= PageTableFlags::NO_CACHE,
        Some(CachePolicy::Device) => {
            bits |= PageTableFlags::NO_CACHE | PageTableFlags::WRITE_THROUGH
        }
        Some(CachePolicy::Cached) | None => {}
    }
    if nx && flags.contains(MappingFlags::NO_EXECUTE) {
        bits |= PageTableFlags::NO_EXECUTE;
    }
    bits
}

pub(super) fn decode_leaf(bits: PageTableFlags) -> (Validity, MappingFlags) {
    if !bits.contains(PageTableFlags::PRESENT) {
        return (Validity::Invalid, MappingFlags::empty());
    }

    let mut flags = MappingFlags::empty();
    flags.set(
        MappingFlags::READ_ONLY,
        !bits.contains(PageTableFlags::WRITABLE),
    );
    flags.set(
        MappingFlags::USER,
        bits.contains(PageTableFlags::USER_ACCESSIBLE),
    );
    flags.set(
        MappingFlags::NO_EXECUTE,
        bits.contains(PageTableFlags::NO_EXECUTE),
    );
    let policy = match (
        bits.contains(PageTableFlags::NO_CACHE),
        bits.contains(PageTableFlags::WRITE_THROUGH),
    ) {
        (true, true) => CachePolicy::Device,
        (true, false) => CachePolicy::Uncached,
        (false, _) => CachePolicy::Cached,
    };
    (Validity::Resident, flags.with_cache_policy(policy))
}

/// Validity of a pointer entry.
///
/// A present entry with `PS` set maps a large page. This crate never
/// creates those, so they are reported as reserved rather than followed.
pub(super) fn table_validity(bits: PageTableFlags) -> Validity {
    if !bits.contains(PageTableFlags::PRESENT) {
        Validity::Invalid
    } else if bits.contains(PageTableFlags::HUGE_PAGE) {
        Validity::Reserved
    } else {
        Validity::Resident
    }
}
