//! Repeat-group fan-out between the walker and the descriptor codec.
//!
//! The walker thinks in logical entries. On levels whose hardware table is
//! finer than the logical one, a logical entry is a group of raw slots and
//! each slot points `group_stride` bytes further than the previous one. On
//! levels without repeats the group is a single slot and these helpers
//! degenerate to a plain read or write.

use crate::arch::{ArchMmu, Level};
use crate::table::Table;
use crate::{PhysicalAddress, VirtualAddress};

/// Writes the group translating `vaddr` at `level` so that slot `i` of the
/// group names `target + i * group_stride`.
pub(crate) fn write_group<A, F>(
    table: &mut Table<A>,
    level: usize,
    vaddr: VirtualAddress,
    target: PhysicalAddress,
    encode: F,
) where
    A: ArchMmu,
    F: Fn(PhysicalAddress) -> A::Raw,
{
    let geometry = A::LEVELS[level];
    let base = geometry.raw_base(vaddr);
    for i in 0..geometry.repeats() {
        let raw = encode(target + i * geometry.group_stride);
        log::trace!(
            "{}: table {} level {level} slot {} <- {raw:x?}",
            A::NAME,
            table.phys(),
            base + i
        );
        table.write(base + i, raw);
    }
}

/// Clears the group translating `vaddr` at `level`.
pub(crate) fn clear_group<A: ArchMmu>(table: &mut Table<A>, level: usize, vaddr: VirtualAddress) {
    let geometry = A::LEVELS[level];
    clear_slots(table, geometry, geometry.raw_base(vaddr));
}

/// Clears the group whose first raw slot is `first`.
pub(crate) fn clear_slots<A: ArchMmu>(table: &mut Table<A>, geometry: Level, first: usize) {
    for slot in first..first + geometry.repeats() {
        table.clear(slot);
    }
}

/// Reads the logical entry translating `vaddr` at `level`.
///
/// Groups are only ever written whole, so the first slot speaks for all.
pub(crate) fn read_group<A: ArchMmu>(
    table: &Table<A>,
    level: usize,
    vaddr: VirtualAddress,
) -> A::Raw {
    table.read(A::LEVELS[level].raw_base(vaddr))
}
