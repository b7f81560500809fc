//! Table walks: create on map, read-only on query, reclaim on unmap, and
//! full teardown.
//!
//! None of the walks recurse. Depth is bounded by [`MAX_LEVELS`], so every
//! path is kept in a small fixed array indexed by level.

use crate::arch::{ArchMmu, LeafDescriptor, MAX_LEVELS, Validity, root_level};
use crate::error::MmuError;
use crate::radix;
use crate::table_allocator::TableAllocator;
use crate::{MappingFlags, PhysicalAddress, VirtualAddress};

/// Result of unmapping a single page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Unmapped {
    /// A leaf was cleared.
    Page,
    /// Nothing was mapped: the entry at `level` is not a resident table or
    /// page, so the whole span it covers can be skipped.
    Hole { level: usize },
}

/// A pointer entry written during the current map call.
#[derive(Debug, Clone, Copy, Default)]
struct Link {
    level: usize,
    parent: PhysicalAddress,
    child: PhysicalAddress,
}

/// Maps one page, creating missing tables on the way down.
///
/// If a table cannot be allocated, the tables linked so far for this page
/// are unlinked and freed before the error is returned.
pub(crate) fn map_page<A: ArchMmu>(
    tables: &mut TableAllocator,
    root: PhysicalAddress,
    vaddr: VirtualAddress,
    frame: PhysicalAddress,
    flags: MappingFlags,
) -> Result<(), MmuError> {
    let mut links = [Link::default(); MAX_LEVELS];
    let mut linked = 0;
    let mut current = root;

    for level in (1..=root_level::<A>()).rev() {
        let mut table = tables.table::<A>(current);
        let raw = radix::read_group(&table, level, vaddr);
        current = match A::validity(level, raw) {
            Validity::Resident => A::decode_table(level, raw).table,
            Validity::Invalid => {
                let child = match tables.alloc_table::<A>(level - 1) {
                    Ok(child) => child.phys(),
                    Err(err) => {
                        unlink::<A>(tables, vaddr, &links[..linked]);
                        return Err(err);
                    }
                };
                radix::write_group(&mut table, level, vaddr, child, |pa| {
                    A::encode_table(level, pa)
                });
                links[linked] = Link {
                    level,
                    parent: current,
                    child,
                };
                linked += 1;
                child
            }
            Validity::Reserved => {
                log::warn!(
                    "{}: {vaddr} lies under a foreign level {level} entry {raw:x?}",
                    A::NAME
                );
                unlink::<A>(tables, vaddr, &links[..linked]);
                return Err(MmuError::InvalidArgument);
            }
        };
    }

    let mut leaf = tables.table::<A>(current);
    radix::write_group(&mut leaf, 0, vaddr, frame, |pa| A::encode_leaf(pa, flags));
    Ok(())
}

fn unlink<A: ArchMmu>(tables: &mut TableAllocator, vaddr: VirtualAddress, links: &[Link]) {
    for link in links.iter().rev() {
        radix::clear_group(&mut tables.table::<A>(link.parent), link.level, vaddr);
        A::invalidate_page(vaddr);
        tables.free_table::<A>(link.level - 1, link.child);
    }
}

/// Looks up the leaf translating `vaddr` without touching any table.
pub(crate) fn query_page<A: ArchMmu>(
    tables: &TableAllocator,
    root: PhysicalAddress,
    vaddr: VirtualAddress,
) -> Result<LeafDescriptor, MmuError> {
    let mut current = root;
    for level in (1..=root_level::<A>()).rev() {
        let raw = radix::read_group(&tables.table::<A>(current), level, vaddr);
        let desc = A::decode_table(level, raw);
        if desc.validity != Validity::Resident {
            return Err(MmuError::NotFound);
        }
        current = desc.table;
    }

    let leaf = A::decode_leaf(radix::read_group(&tables.table::<A>(current), 0, vaddr));
    match leaf.validity {
        Validity::Resident => Ok(leaf),
        Validity::Invalid | Validity::Reserved => Err(MmuError::NotFound),
    }
}

/// Unmaps one page and frees every table the removal leaves empty.
pub(crate) fn unmap_page<A: ArchMmu>(
    tables: &mut TableAllocator,
    root: PhysicalAddress,
    vaddr: VirtualAddress,
) -> Unmapped {
    let top = root_level::<A>();
    let mut path = [PhysicalAddress::default(); MAX_LEVELS];
    path[top] = root;

    for level in (1..=top).rev() {
        let raw = radix::read_group(&tables.table::<A>(path[level]), level, vaddr);
        let desc = A::decode_table(level, raw);
        if desc.validity != Validity::Resident {
            return Unmapped::Hole { level };
        }
        path[level - 1] = desc.table;
    }

    let mut leaf = tables.table::<A>(path[0]);
    if A::validity(0, radix::read_group(&leaf, 0, vaddr)) == Validity::Invalid {
        return Unmapped::Hole { level: 0 };
    }
    radix::clear_group(&mut leaf, 0, vaddr);
    A::invalidate_page(vaddr);

    for level in 0..top {
        if !tables.table::<A>(path[level]).is_empty(level) {
            break;
        }
        radix::clear_group(&mut tables.table::<A>(path[level + 1]), level + 1, vaddr);
        A::invalidate_page(vaddr);
        tables.free_table::<A>(level, path[level]);
    }
    Unmapped::Page
}

/// Clears and frees every table below `root`. The root itself is left
/// zeroed for the caller to dispose of. Mapped frames are not touched.
pub(crate) fn teardown<A: ArchMmu>(tables: &mut TableAllocator, root: PhysicalAddress) {
    #[derive(Debug, Clone, Copy, Default)]
    struct Cursor {
        level: usize,
        table: PhysicalAddress,
        slot: usize,
    }

    let mut stack = [Cursor::default(); MAX_LEVELS];
    stack[0] = Cursor {
        level: root_level::<A>(),
        table: root,
        slot: 0,
    };
    let mut depth = 1;

    while depth > 0 {
        let Cursor { level, table, slot } = stack[depth - 1];
        let geometry = A::LEVELS[level];

        if slot >= geometry.raw_slots {
            // Finished a table; unlink it from its parent and free it.
            depth -= 1;
            if depth > 0 {
                let parent = &mut stack[depth - 1];
                let parent_geometry = A::LEVELS[parent.level];
                radix::clear_slots(
                    &mut tables.table::<A>(parent.table),
                    parent_geometry,
                    parent.slot,
                );
                parent.slot += parent_geometry.repeats();
                tables.free_table::<A>(level, table);
            }
            continue;
        }

        let mut view = tables.table::<A>(table);
        let raw = view.read(slot);
        if A::validity(level, raw) == Validity::Resident {
            let child = A::decode_table(level, raw).table;
            if level > 1 {
                stack[depth] = Cursor {
                    level: level - 1,
                    table: child,
                    slot: 0,
                };
                depth += 1;
                continue;
            }
            // Leaf tables hold only page descriptors; drop them wholesale.
            tables.table::<A>(child).zero();
            radix::clear_slots(&mut view, geometry, slot);
            tables.free_table::<A>(0, child);
        } else {
            radix::clear_slots(&mut view, geometry, slot);
        }
        stack[depth - 1].slot += geometry.repeats();
    }
}
