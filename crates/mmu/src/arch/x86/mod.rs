//! x86 paging: the 2-level 32-bit format and the 4-level long-mode format.

mod flags;
#[cfg(target_pointer_width = "64")]
mod four_level;
mod two_level;

#[cfg(target_pointer_width = "64")]
pub use four_level::X86_64;
pub use two_level::X86;

/// The value loaded into `CR3` for an address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cr3Value(pub u64);

#[cfg(any(test, feature = "software-emulation"))]
mod hw {
    use crate::arch::software;
    use crate::{PhysicalAddress, VirtualAddress};

    pub fn invlpg(vaddr: VirtualAddress) {
        software::record_invalidate(vaddr);
    }

    pub fn flush_all() {
        software::record_invalidate_all();
    }

    pub unsafe fn load_cr3(value: u64) {
        software::record_activate(PhysicalAddress::new(value as usize));
    }

    pub fn barrier() {
        software::record_barrier();
    }
}

#[cfg(all(target_arch = "x86_64", not(any(test, feature = "software-emulation"))))]
mod hw {
    use x86_64::instructions::tlb;
    use x86_64::registers::control::{Cr3, Cr3Flags};
    use x86_64::structures::paging::PhysFrame;
    use x86_64::{PhysAddr, VirtAddr};

    use crate::VirtualAddress;

    pub fn invlpg(vaddr: VirtualAddress) {
        tlb::flush(VirtAddr::new_truncate(vaddr.as_usize() as u64));
    }

    pub fn flush_all() {
        tlb::flush_all();
    }

    pub unsafe fn load_cr3(value: u64) {
        let frame = PhysFrame::containing_address(PhysAddr::new_truncate(value));
        // SAFETY: forwarded to the caller of `activate`.
        unsafe { Cr3::write(frame, Cr3Flags::empty()) };
    }

    pub fn barrier() {
        // Table walks snoop the data cache; ordering is all that is needed.
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(all(target_arch = "x86", not(any(test, feature = "software-emulation"))))]
mod hw {
    use core::arch::asm;

    use crate::VirtualAddress;

    pub fn invlpg(vaddr: VirtualAddress) {
        // SAFETY: invlpg has no effect besides dropping a TLB entry.
        unsafe { asm!("invlpg [{}]", in(reg) vaddr.as_usize(), options(nostack, preserves_flags)) };
    }

    pub fn flush_all() {
        // SAFETY: reloading CR3 with its current value only flushes the TLB.
        unsafe {
            asm!(
                "mov {tmp}, cr3",
                "mov cr3, {tmp}",
                tmp = out(reg) _,
                options(nostack, preserves_flags),
            )
        };
    }

    pub unsafe fn load_cr3(value: u64) {
        // SAFETY: forwarded to the caller of `activate`.
        unsafe { asm!("mov cr3, {}", in(reg) value as u32, options(nostack, preserves_flags)) };
    }

    pub fn barrier() {
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
    }
}

// Off-target builds can still encode x86 tables, they just cannot load them.
#[cfg(all(
    not(any(target_arch = "x86", target_arch = "x86_64")),
    not(any(test, feature = "software-emulation"))
))]
mod hw {
    use crate::VirtualAddress;

    pub fn invlpg(_vaddr: VirtualAddress) {}

    pub fn flush_all() {}

    pub unsafe fn load_cr3(_value: u64) {
        panic!("x86 page tables cannot be loaded on this CPU");
    }

    pub fn barrier() {
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
    }
}
