//! Storage for page tables.
//!
//! Tables come from a [`PageAllocator`] supplied by the kernel. Early in boot
//! that is a [`BootArena`](crate::BootArena); once the real physical page
//! pool exists the address space switches over. Tables carved from the old
//! allocator stay linked, so the allocator that was replaced is remembered
//! for address translation and for routing frees.

use crate::arch::ArchMmu;
use crate::error::MmuError;
use crate::table::Table;
use crate::{PhysicalAddress, VirtualAddress};

/// Source of page-sized, page-aligned physical memory.
///
/// Implementations must be safe to call from several address spaces at once.
pub trait PageAllocator: Sync {
    /// Allocates one page, or `None` when the pool is exhausted.
    fn alloc_page(&self) -> Option<PhysicalAddress>;

    /// Returns a page obtained from [`alloc_page`](Self::alloc_page).
    fn free_page(&self, page: PhysicalAddress);

    /// Kernel-virtual address through which `page` can be read and written.
    fn phys_to_virt(&self, page: PhysicalAddress) -> VirtualAddress;

    /// Whether `page` came from this allocator.
    ///
    /// The default claims everything, which suits a kernel-wide pool with a
    /// single direct map.
    fn owns(&self, _page: PhysicalAddress) -> bool {
        true
    }
}

/// Allocates, views and frees the tables of one address space.
pub struct TableAllocator {
    pool: &'static dyn PageAllocator,
    retired: Option<&'static dyn PageAllocator>,
    outstanding: usize,
}

impl TableAllocator {
    pub fn new(pool: &'static dyn PageAllocator) -> Self {
        Self {
            pool,
            retired: None,
            outstanding: 0,
        }
    }

    /// Sends future allocations to `pool`.
    ///
    /// The previous allocator keeps resolving (but never reclaims) the
    /// tables it already handed out. Only one switch is allowed, since a
    /// second would lose track of the first allocator's tables.
    pub fn switch_pool(&mut self, pool: &'static dyn PageAllocator) -> Result<(), MmuError> {
        if self.retired.is_some() {
            return Err(MmuError::InvalidArgument);
        }
        log::debug!("switching page-table allocator ({} tables live)", self.outstanding);
        self.retired = Some(self.pool);
        self.pool = pool;
        Ok(())
    }

    /// Tables allocated through this allocator and not yet freed.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    fn owner(&self, page: PhysicalAddress) -> &'static dyn PageAllocator {
        match self.retired {
            Some(retired) if retired.owns(page) => retired,
            _ => self.pool,
        }
    }

    /// Returns a view of the table at `phys`.
    pub fn table<A: ArchMmu>(&self, phys: PhysicalAddress) -> Table<A> {
        let virt = self.owner(phys).phys_to_virt(phys);
        // SAFETY: `phys` names a page-table page handed out by one of our
        // allocators, and their `phys_to_virt` maps the whole page.
        unsafe { Table::new(phys, virt) }
    }

    /// Allocates a zeroed table for `level`.
    pub fn alloc_table<A: ArchMmu>(&mut self, level: usize) -> Result<Table<A>, MmuError> {
        let phys = self.pool.alloc_page().ok_or(MmuError::OutOfMemory)?;
        let mut table = self.table::<A>(phys);
        table.zero();
        self.outstanding += 1;
        log::trace!("{}: allocated level {level} table at {phys}", A::NAME);
        Ok(table)
    }

    /// Frees the table at `phys`. Its parent entry must already be cleared.
    pub fn free_table<A: ArchMmu>(&mut self, level: usize, phys: PhysicalAddress) {
        debug_assert!(
            self.table::<A>(phys).is_empty(level),
            "freeing non-empty level {level} table at {phys}"
        );
        let owner = self.owner(phys);
        match self.retired {
            Some(retired) if core::ptr::addr_eq(owner, retired) => {
                log::warn!(
                    "{}: level {level} table at {phys} is retired allocator storage, not reclaimed",
                    A::NAME
                );
            }
            _ => owner.free_page(phys),
        }
        self.outstanding -= 1;
        log::trace!("{}: freed level {level} table at {phys}", A::NAME);
    }
}
