//! Motorola 68040 paging with 4 KiB pages.
//!
//! The hardware walks a 128-entry root table (VA bits 31:25), 128-entry
//! pointer tables (bits 24:18) and 64-entry page tables (bits 17:12). The
//! logical scheme is coarser: a 16-entry root (bits 31:28), a 64-entry
//! level 1 (bits 27:22) and a 1024-entry leaf (bits 21:12).
//!
//! Each logical level 1 table is eight hardware pointer tables laid out back
//! to back, so one logical root entry becomes a group of eight root slots
//! pointing 512 bytes apart. Each logical leaf table is sixteen hardware page
//! tables, so one logical level 1 entry is a group of sixteen slots pointing
//! 256 bytes apart. Leaf slots line up with hardware page descriptors.

mod entry;

use self::entry::{
    CM_COPYBACK, CM_NONCACHEABLE, CM_SERIALIZED, CM_WRITE_THROUGH, PDT_INDIRECT, PDT_INVALID,
    PDT_RESIDENT, PageDescriptor, PointerDescriptor, RootDescriptor, UDT_RESIDENT,
};
use crate::arch::{ArchMmu, LeafDescriptor, Level, SpaceClass, TableDescriptor, Validity};
use crate::{CachePolicy, MappingFlags, PhysicalAddress, VirtualAddress};

const ROOT_LEVEL: usize = 2;

const LEVELS: [Level; 3] = [
    Level::new(12, 10),
    Level::with_repeat(22, 6, 4, 1024, 256),
    Level::with_repeat(28, 4, 3, 128, 512),
];

/// The 68040 MMU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct M68k040;

/// Root pointer register contents for an address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootPointer {
    pub value: u32,
    /// Whether the value belongs in the supervisor (SRP) or user (URP)
    /// root pointer register.
    pub supervisor: bool,
}

impl ArchMmu for M68k040 {
    const NAME: &'static str = "68040";
    const PHYS_BITS: u32 = 32;
    const VIRT_BITS: u32 = 32;
    const LEVELS: &'static [Level] = &LEVELS;

    const SUPPORTS_USER_ASPACES: bool = false;
    const SUPPORTS_NX: bool = false;
    const SUPPORTS_NS: bool = false;

    type Raw = u32;
    type Extension = RootPointer;

    fn encode_leaf(frame: PhysicalAddress, flags: MappingFlags) -> u32 {
        let cm = match flags.cache_policy() {
            Some(CachePolicy::Uncached) => CM_NONCACHEABLE,
            Some(CachePolicy::Device) => CM_SERIALIZED,
            Some(CachePolicy::Cached) | None => CM_WRITE_THROUGH,
        };
        PageDescriptor::new()
            .with_pdt(PDT_RESIDENT)
            .with_w(flags.contains(MappingFlags::READ_ONLY))
            .with_cm(cm)
            .with_s(!flags.contains(MappingFlags::USER))
            .with_page_address((frame.as_usize() >> 12) as u32)
            .into_bits()
    }

    fn decode_leaf(raw: u32) -> LeafDescriptor {
        let desc = PageDescriptor::from_bits(raw);
        let validity = match desc.pdt() {
            PDT_INVALID => Validity::Invalid,
            PDT_INDIRECT => Validity::Reserved,
            _ => Validity::Resident,
        };
        let policy = match desc.cm() {
            CM_WRITE_THROUGH | CM_COPYBACK => CachePolicy::Cached,
            CM_SERIALIZED => CachePolicy::Device,
            _ => CachePolicy::Uncached,
        };
        let mut flags = MappingFlags::empty().with_cache_policy(policy);
        flags.set(MappingFlags::READ_ONLY, desc.w());
        flags.set(MappingFlags::USER, !desc.s());
        LeafDescriptor {
            validity,
            frame: PhysicalAddress::new((desc.page_address() as usize) << 12),
            flags,
        }
    }

    fn encode_table(level: usize, table: PhysicalAddress) -> u32 {
        let addr = table.as_usize() as u32;
        if level == ROOT_LEVEL {
            debug_assert!(addr & 0x1FF == 0, "pointer table {table} not 512-byte aligned");
            RootDescriptor::new()
                .with_udt(UDT_RESIDENT)
                .with_table_address(addr >> 9)
                .into_bits()
        } else {
            debug_assert!(addr & 0xFF == 0, "page table {table} not 256-byte aligned");
            PointerDescriptor::new()
                .with_udt(UDT_RESIDENT)
                .with_table_address(addr >> 8)
                .into_bits()
        }
    }

    fn decode_table(level: usize, raw: u32) -> TableDescriptor {
        let (udt, addr) = if level == ROOT_LEVEL {
            let desc = RootDescriptor::from_bits(raw);
            (desc.udt(), desc.table_address() << 9)
        } else {
            let desc = PointerDescriptor::from_bits(raw);
            (desc.udt(), desc.table_address() << 8)
        };
        TableDescriptor {
            validity: if udt & 0b10 != 0 {
                Validity::Resident
            } else {
                Validity::Invalid
            },
            table: PhysicalAddress::new(addr as usize),
        }
    }

    fn extension(root: PhysicalAddress, class: SpaceClass) -> RootPointer {
        RootPointer {
            value: root.as_usize() as u32,
            supervisor: class == SpaceClass::Kernel,
        }
    }

    fn invalidate_page(vaddr: VirtualAddress) {
        hw::pflush(vaddr);
    }

    fn invalidate_all() {
        hw::pflusha();
    }

    unsafe fn activate(_root: PhysicalAddress, extension: &RootPointer) {
        // SAFETY: forwarded to the caller.
        unsafe { hw::load_root(*extension) };
    }

    fn publish_tables() {
        hw::push_data_cache();
    }
}

#[cfg(any(test, feature = "software-emulation"))]
mod hw {
    use super::RootPointer;
    use crate::arch::software;
    use crate::{PhysicalAddress, VirtualAddress};

    pub fn pflush(vaddr: VirtualAddress) {
        software::record_invalidate(vaddr);
    }

    pub fn pflusha() {
        software::record_invalidate_all();
    }

    pub unsafe fn load_root(root: RootPointer) {
        software::record_activate(PhysicalAddress::new(root.value as usize));
    }

    pub fn push_data_cache() {
        software::record_barrier();
    }
}

#[cfg(all(target_arch = "m68k", not(any(test, feature = "software-emulation"))))]
mod hw {
    use core::arch::asm;

    use super::RootPointer;
    use crate::VirtualAddress;

    pub fn pflush(vaddr: VirtualAddress) {
        // SAFETY: only drops the ATC entry for the address.
        unsafe { asm!("pflush ({})", in(reg_addr) vaddr.as_usize(), options(nostack)) };
    }

    pub fn pflusha() {
        // SAFETY: only drops ATC entries.
        unsafe { asm!("pflusha", options(nostack)) };
    }

    pub unsafe fn load_root(root: RootPointer) {
        // SAFETY: forwarded to the caller of `activate`.
        unsafe {
            if root.supervisor {
                asm!("movec {}, %srp", in(reg_data) root.value, options(nostack));
            } else {
                asm!("movec {}, %urp", in(reg_data) root.value, options(nostack));
            }
            asm!("pflusha", options(nostack));
        }
    }

    pub fn push_data_cache() {
        // SAFETY: writes dirty lines back without invalidating them.
        unsafe { asm!("cpusha %dc", options(nostack)) };
    }
}

#[cfg(all(
    not(target_arch = "m68k"),
    not(any(test, feature = "software-emulation"))
))]
mod hw {
    use super::RootPointer;
    use crate::VirtualAddress;

    pub fn pflush(_vaddr: VirtualAddress) {}

    pub fn pflusha() {}

    pub unsafe fn load_root(_root: RootPointer) {
        panic!("68040 page tables cannot be loaded on this CPU");
    }

    pub fn push_data_cache() {
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
    }
}
