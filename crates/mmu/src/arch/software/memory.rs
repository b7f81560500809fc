use core::cell::UnsafeCell;
use std::boxed::Box;
use std::vec::Vec;

use spin::Mutex;

use crate::arch::PAGE_SIZE;
use crate::table_allocator::PageAllocator;
use crate::{PhysicalAddress, VirtualAddress};

/// Default first physical address handed out by an emulated pool.
///
/// Low enough that every backend's pointer descriptors can hold it.
pub const DEFAULT_PHYS_BASE: usize = 0x0010_0000;

/// Byte written over every page on allocation, so tests catch any table
/// that is linked without being zeroed first.
const POISON: u8 = 0xA5;

#[repr(C, align(4096))]
struct Frame(UnsafeCell<[u8; PAGE_SIZE]>);

struct PoolState {
    free: Vec<usize>,
    outstanding: usize,
    limit: Option<usize>,
}

/// A physical page pool backed by host memory.
///
/// Pages are named by fake physical addresses starting at `phys_base`.
/// `phys_to_virt` resolves them to the host buffer, which is what lets the
/// walker follow pointer descriptors without real hardware.
pub struct EmulatedMemory {
    frames: Box<[Frame]>,
    phys_base: usize,
    state: Mutex<PoolState>,
}

// SAFETY: page contents are only reached through raw pointers handed out by
// `phys_to_virt`; the pool bookkeeping is behind a lock.
unsafe impl Sync for EmulatedMemory {}
unsafe impl Send for EmulatedMemory {}

impl EmulatedMemory {
    /// Creates a pool of `pages` frames at [`DEFAULT_PHYS_BASE`].
    pub fn new(pages: usize) -> Self {
        Self::with_phys_base(pages, PhysicalAddress::new(DEFAULT_PHYS_BASE))
    }

    /// Creates a pool of `pages` frames whose first frame is at `phys_base`.
    pub fn with_phys_base(pages: usize, phys_base: PhysicalAddress) -> Self {
        assert!(phys_base.is_page_aligned(), "pool base must be page-aligned");
        let frames = (0..pages)
            .map(|_| Frame(UnsafeCell::new([0; PAGE_SIZE])))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            frames,
            phys_base: phys_base.as_usize(),
            state: Mutex::new(PoolState {
                free: (0..pages).rev().collect(),
                outstanding: 0,
                limit: None,
            }),
        }
    }

    /// Moves the pool into a `'static` reference, as address spaces require.
    pub fn leak(self) -> &'static Self {
        Box::leak(Box::new(self))
    }

    /// Pages currently allocated and not yet freed.
    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }

    /// Caps the number of outstanding pages; allocations beyond it fail.
    pub fn set_limit(&self, limit: Option<usize>) {
        self.state.lock().limit = limit;
    }

    /// Total frames in the pool.
    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    fn frame_index(&self, page: PhysicalAddress) -> Option<usize> {
        let offset = page.as_usize().checked_sub(self.phys_base)?;
        let index = offset / PAGE_SIZE;
        (index < self.frames.len()).then_some(index)
    }
}

impl PageAllocator for EmulatedMemory {
    fn alloc_page(&self) -> Option<PhysicalAddress> {
        let mut state = self.state.lock();
        if state.limit.is_some_and(|limit| state.outstanding >= limit) {
            return None;
        }
        let index = state.free.pop()?;
        state.outstanding += 1;
        drop(state);

        // SAFETY: the frame was on the free list, so nobody else holds it.
        unsafe { (*self.frames[index].0.get()).fill(POISON) };
        Some(PhysicalAddress::new(self.phys_base + index * PAGE_SIZE))
    }

    fn free_page(&self, page: PhysicalAddress) {
        assert!(page.is_page_aligned(), "freeing unaligned page {page}");
        let index = self
            .frame_index(page)
            .unwrap_or_else(|| panic!("{page} is not part of this pool"));
        let mut state = self.state.lock();
        assert!(!state.free.contains(&index), "double free of {page}");
        state.free.push(index);
        state.outstanding -= 1;
    }

    fn phys_to_virt(&self, page: PhysicalAddress) -> VirtualAddress {
        let aligned = page.align_down(PAGE_SIZE);
        let index = self
            .frame_index(aligned)
            .unwrap_or_else(|| panic!("physical address {page} out of bounds"));
        VirtualAddress::from_ptr(self.frames[index].0.get() as *const u8) + page.page_offset()
    }

    fn owns(&self, page: PhysicalAddress) -> bool {
        self.frame_index(page).is_some()
    }
}
