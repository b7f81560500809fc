//! The process-wide kernel address space.
//!
//! Bring-up happens in two steps. [`Kernel::early_init`] runs before any
//! physical memory manager exists and takes every table from a
//! [`BootArena`](crate::BootArena). [`Kernel::init`] runs once the page pool
//! is up: later tables come from the pool, and the temporary identity
//! mapping used to get into the kernel is removed.
//!
//! Secondary CPUs must not walk the kernel tables until the boot CPU has
//! pushed them out of its caches, so the boot CPU calls
//! [`Kernel::publish`] and the others block in [`Kernel::wait_published`].

use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::address_space::{AddressSpace, MapRange};
use crate::arch::{ArchMmu, PAGE_SIZE, SpaceClass};
use crate::error::MmuError;
use crate::table_allocator::PageAllocator;
use crate::{PhysicalAddress, VirtualAddress};

/// Slot holding the kernel address space for backend `A`.
pub struct Kernel<A: ArchMmu> {
    space: Mutex<Option<AddressSpace<A>>>,
    published: AtomicBool,
}

impl<A: ArchMmu> Kernel<A> {
    pub const fn new() -> Self {
        Self {
            space: Mutex::new(None),
            published: AtomicBool::new(false),
        }
    }

    /// Creates the kernel address space over `[base, base + size)` with
    /// tables from `arena`, then maps each of `boot_ranges`.
    ///
    /// The window must cover every boot range, including any identity
    /// mapping that [`init`](Self::init) will later remove.
    ///
    /// On failure nothing is installed, but the arena pages already carved
    /// for the attempt stay used. A retry needs an arena with room for them.
    pub fn early_init(
        &self,
        arena: &'static dyn PageAllocator,
        base: VirtualAddress,
        size: usize,
        boot_ranges: &[MapRange],
    ) -> Result<(), MmuError> {
        let mut slot = self.space.lock();
        if slot.is_some() {
            return Err(MmuError::InvalidArgument);
        }

        let mut space = AddressSpace::<A>::new(arena, base, size, SpaceClass::Kernel)?;
        for range in boot_ranges {
            space.map_range(range)?;
        }
        log::debug!(
            "{}: early kernel address space ready, {} boot ranges, {} tables",
            A::NAME,
            boot_ranges.len(),
            space.tables_in_use()
        );
        *slot = Some(space);
        Ok(())
    }

    /// Moves table allocation to `pool` and drops the boot identity range.
    ///
    /// Tables already carved from the boot arena stay in place. If one of
    /// them empties while the identity range is removed it is unlinked but
    /// its storage is not reused.
    ///
    /// The identity range is checked before anything changes, so a rejected
    /// call can be retried. Once a call has succeeded, later calls return
    /// [`MmuError::InvalidArgument`].
    pub fn init(
        &self,
        pool: &'static dyn PageAllocator,
        boot_identity: Option<&MapRange>,
    ) -> Result<(), MmuError> {
        let mut slot = self.space.lock();
        let space = slot.as_mut().ok_or(MmuError::NotFound)?;
        let identity_pages = match boot_identity {
            Some(range) if range.size % PAGE_SIZE != 0 => return Err(MmuError::InvalidArgument),
            Some(range) => {
                let count = range.size / PAGE_SIZE;
                space.check_pages(range.vaddr, count)?;
                Some((range.vaddr, count))
            }
            None => None,
        };
        space.switch_pool(pool)?;

        if let Some((vaddr, count)) = identity_pages {
            space.unmap(vaddr, count)?;
        }
        log::debug!("{}: kernel address space switched to page pool", A::NAME);
        Ok(())
    }

    /// Runs `f` on the kernel address space.
    ///
    /// Returns [`MmuError::NotFound`] before [`early_init`](Self::early_init).
    pub fn with<R>(&self, f: impl FnOnce(&mut AddressSpace<A>) -> R) -> Result<R, MmuError> {
        let mut slot = self.space.lock();
        let space = slot.as_mut().ok_or(MmuError::NotFound)?;
        Ok(f(space))
    }

    /// Resolves `vaddr` through the kernel address space.
    pub fn translate(&self, vaddr: VirtualAddress) -> Result<PhysicalAddress, MmuError> {
        self.with(|space| space.translate(vaddr))?
    }

    /// Loads the kernel address space on the calling CPU.
    ///
    /// # Safety
    ///
    /// See [`AddressSpace::context_switch`].
    pub unsafe fn activate(&self) -> Result<(), MmuError> {
        // SAFETY: forwarded to the caller.
        self.with(|space| unsafe { space.context_switch() })
    }

    /// Makes the kernel tables visible to every CPU, then releases waiters.
    pub fn publish(&self) {
        A::publish_tables();
        self.published.store(true, Ordering::Release);
    }

    /// Spins until [`publish`](Self::publish) has been called.
    pub fn wait_published(&self) {
        while !self.published.load(Ordering::Acquire) {
            core::hint::spin_loop();
        }
    }

    pub fn is_published(&self) -> bool {
        self.published.load(Ordering::Acquire)
    }
}

impl<A: ArchMmu> Default for Kernel<A> {
    fn default() -> Self {
        Self::new()
    }
}
