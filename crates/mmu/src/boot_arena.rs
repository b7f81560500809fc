//! Statically reserved page-table storage for early boot.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::arch::PAGE_SIZE;
use crate::table_allocator::PageAllocator;
use crate::{PhysicalAddress, VirtualAddress};

/// Marks a physical base that was never set: the arena is identity mapped.
const IDENTITY: usize = usize::MAX;

#[repr(C, align(4096))]
struct ArenaPage(UnsafeCell<[u8; PAGE_SIZE]>);

/// `N` pages of table storage living in the kernel image.
///
/// Pages are handed out by bumping an index and are never reclaimed, so the
/// arena works before any physical memory manager exists. Place it in a
/// `static` and hand it to [`Kernel::early_init`](crate::Kernel::early_init).
pub struct BootArena<const N: usize> {
    pages: [ArenaPage; N],
    next: AtomicUsize,
    phys_base: AtomicUsize,
}

// SAFETY: each page is handed out once; page contents are only reached
// through pointers returned by `phys_to_virt`.
unsafe impl<const N: usize> Sync for BootArena<N> {}

impl<const N: usize> BootArena<N> {
    pub const fn new() -> Self {
        Self {
            pages: [const { ArenaPage(UnsafeCell::new([0; PAGE_SIZE])) }; N],
            next: AtomicUsize::new(0),
            phys_base: AtomicUsize::new(IDENTITY),
        }
    }

    /// Records where the arena lives in physical memory.
    ///
    /// Without this call the arena's physical address is taken to equal its
    /// virtual address.
    ///
    /// # Safety
    ///
    /// `base` must be the physical address of the arena's first page, and
    /// no page may have been handed out yet.
    pub unsafe fn set_phys_base(&self, base: PhysicalAddress) {
        assert!(base.is_page_aligned(), "arena base must be page-aligned");
        self.phys_base.store(base.as_usize(), Ordering::Relaxed);
    }

    /// Pages handed out so far.
    pub fn used(&self) -> usize {
        self.next.load(Ordering::Relaxed).min(N)
    }

    fn base(&self) -> usize {
        match self.phys_base.load(Ordering::Relaxed) {
            IDENTITY => self.pages.as_ptr() as usize,
            base => base,
        }
    }

    fn index_of(&self, page: PhysicalAddress) -> Option<usize> {
        let index = page.as_usize().checked_sub(self.base())? / PAGE_SIZE;
        (index < N).then_some(index)
    }
}

impl<const N: usize> Default for BootArena<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> PageAllocator for BootArena<N> {
    fn alloc_page(&self) -> Option<PhysicalAddress> {
        let index = self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |next| {
                (next < N).then_some(next + 1)
            })
            .ok()?;
        Some(PhysicalAddress::new(self.base() + index * PAGE_SIZE))
    }

    fn free_page(&self, page: PhysicalAddress) {
        log::warn!("boot arena page {page} released; arena pages are never reused");
    }

    fn phys_to_virt(&self, page: PhysicalAddress) -> VirtualAddress {
        let index = self
            .index_of(page)
            .unwrap_or_else(|| panic!("{page} is outside the boot arena"));
        VirtualAddress::from_ptr(self.pages[index].0.get() as *const u8) + page.page_offset()
    }

    fn owns(&self, page: PhysicalAddress) -> bool {
        self.index_of(page).is_some()
    }
}
