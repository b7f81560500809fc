//! Throwaway address spaces for jumping to physical code.
//!
//! Chain-loading a new image means running code at a physical address the
//! kernel address space may not map. A [`Trampoline`] is a minimal kernel
//! class space that identity maps just that region. It is torn down when
//! dropped.

use crate::address_space::AddressSpace;
use crate::arch::{ArchMmu, PAGE_SIZE, SpaceClass};
use crate::error::MmuError;
use crate::table_allocator::PageAllocator;
use crate::{MappingFlags, PhysicalAddress, VirtualAddress};

/// An identity-mapped kernel space around a physical jump target.
pub struct Trampoline<A: ArchMmu> {
    space: Option<AddressSpace<A>>,
}

impl<A: ArchMmu> Trampoline<A> {
    /// Identity maps every page covering `[target, target + len)`.
    pub fn new(
        pool: &'static dyn PageAllocator,
        target: PhysicalAddress,
        len: usize,
    ) -> Result<Self, MmuError> {
        if len == 0 {
            return Err(MmuError::InvalidArgument);
        }
        let first = target.align_down(PAGE_SIZE);
        let end = target
            .checked_add(len)
            .and_then(|end| end.as_usize().checked_add(PAGE_SIZE - 1))
            .ok_or(MmuError::InvalidArgument)?
            & !(PAGE_SIZE - 1);
        let size = end - first.as_usize();

        let mut space = AddressSpace::<A>::new(
            pool,
            VirtualAddress::new(first.as_usize()),
            size,
            SpaceClass::Kernel,
        )?;
        if let Err(err) = space.map(
            VirtualAddress::new(first.as_usize()),
            first,
            size / PAGE_SIZE,
            MappingFlags::empty(),
        ) {
            space.destroy()?;
            return Err(err);
        }
        log::debug!("{}: trampoline identity maps {first}..{end:#x}", A::NAME);
        Ok(Self { space: Some(space) })
    }

    pub fn address_space(&self) -> Option<&AddressSpace<A>> {
        self.space.as_ref()
    }

    /// Switches the calling CPU onto the trampoline.
    ///
    /// # Safety
    ///
    /// Only code and data inside the mapped region remain reachable.
    pub unsafe fn activate(&self) {
        if let Some(space) = &self.space {
            // SAFETY: forwarded to the caller.
            unsafe { space.context_switch() };
        }
    }

    /// Tears the trampoline down now instead of on drop.
    pub fn destroy(mut self) -> Result<(), MmuError> {
        match self.space.take() {
            Some(space) => space.destroy(),
            None => Ok(()),
        }
    }
}

impl<A: ArchMmu> Drop for Trampoline<A> {
    fn drop(&mut self) {
        if let Some(space) = self.space.take() {
            if let Err(err) = space.destroy() {
                log::warn!("{}: trampoline teardown failed: {err}", A::NAME);
            }
        }
    }
}
