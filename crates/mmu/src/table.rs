//! A view of one hardware table in memory.

use core::marker::PhantomData;

use crate::arch::{ArchMmu, PAGE_SIZE, RawEntry, Validity};
use crate::{PhysicalAddress, VirtualAddress};

/// Raw-slot access to a table at one level.
///
/// A `Table` does not own its storage: it is a (physical, kernel-virtual)
/// pair created by the table allocator for the duration of a walk step.
/// Every access is volatile because the MMU reads the same memory.
pub struct Table<A: ArchMmu> {
    phys: PhysicalAddress,
    slots: *mut A::Raw,
    _arch: PhantomData<A>,
}

impl<A: ArchMmu> Table<A> {
    /// Number of raw slots that fit in one page.
    pub const CAPACITY: usize = PAGE_SIZE / size_of::<A::Raw>();

    /// # Safety
    ///
    /// `virt` must map the page at `phys`, be aligned for `A::Raw`, and stay
    /// valid while the returned view is used.
    pub(crate) unsafe fn new(phys: PhysicalAddress, virt: VirtualAddress) -> Self {
        Self {
            phys,
            slots: virt.as_mut_ptr(),
            _arch: PhantomData,
        }
    }

    pub fn phys(&self) -> PhysicalAddress {
        self.phys
    }

    pub fn read(&self, slot: usize) -> A::Raw {
        assert!(slot < Self::CAPACITY, "slot {slot} out of range");
        // SAFETY: in bounds of the page per the constructor contract.
        unsafe { self.slots.add(slot).read_volatile() }
    }

    pub fn write(&mut self, slot: usize, raw: A::Raw) {
        assert!(slot < Self::CAPACITY, "slot {slot} out of range");
        // SAFETY: in bounds of the page per the constructor contract.
        unsafe { self.slots.add(slot).write_volatile(raw) }
    }

    pub fn clear(&mut self, slot: usize) {
        self.write(slot, A::Raw::ZERO);
    }

    /// Zeroes the whole page, including slots past the level's raw count.
    pub fn zero(&mut self) {
        for slot in 0..Self::CAPACITY {
            self.clear(slot);
        }
    }

    /// True when every raw slot a table at `level` uses reads as invalid.
    ///
    /// Reserved encodings count as occupied.
    pub fn is_empty(&self, level: usize) -> bool {
        let raw_slots = A::LEVELS[level].raw_slots;
        (0..raw_slots).all(|slot| A::validity(level, self.read(slot)) == Validity::Invalid)
    }
}
