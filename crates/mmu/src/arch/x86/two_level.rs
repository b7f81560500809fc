//! 32-bit x86 paging without PAE: a 1024-entry page directory over
//! 1024-entry page tables, 4 KiB pages, 32-bit entries.

use x86_64::structures::paging::PageTableFlags;

use super::{Cr3Value, flags, hw};
use crate::arch::{ArchMmu, LeafDescriptor, Level, SpaceClass, TableDescriptor};
use crate::{MappingFlags, PhysicalAddress, VirtualAddress};

const ADDRESS_MASK: u32 = 0xFFFF_F000;

const LEVELS: [Level; 2] = [Level::new(12, 10), Level::new(22, 10)];

/// Classic 2-level x86 paging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct X86;

impl ArchMmu for X86 {
    const NAME: &'static str = "x86";
    const PHYS_BITS: u32 = 32;
    const VIRT_BITS: u32 = 32;
    const LEVELS: &'static [Level] = &LEVELS;

    const SUPPORTS_USER_ASPACES: bool = false;
    const SUPPORTS_NX: bool = false;
    const SUPPORTS_NS: bool = false;

    type Raw = u32;
    type Extension = Cr3Value;

    fn encode_leaf(frame: PhysicalAddress, flags: MappingFlags) -> u32 {
        (frame.as_usize() as u32 & ADDRESS_MASK) | flags::encode_leaf(flags, false).bits() as u32
    }

    fn decode_leaf(raw: u32) -> LeafDescriptor {
        let (validity, flags) =
            flags::decode_leaf(PageTableFlags::from_bits_truncate(u64::from(raw)));
        LeafDescriptor {
            validity,
            frame: PhysicalAddress::new((raw & ADDRESS_MASK) as usize),
            flags,
        }
    }

    fn encode_table(_level: usize, table: PhysicalAddress) -> u32 {
        (table.as_usize() as u32 & ADDRESS_MASK) | flags::TABLE_FLAGS.bits() as u32
    }

    fn decode_table(_level: usize, raw: u32) -> TableDescriptor {
        TableDescriptor {
            validity: flags::table_validity(PageTableFlags::from_bits_truncate(u64::from(raw))),
            table: PhysicalAddress::new((raw & ADDRESS_MASK) as usize),
        }
    }

    fn extension(root: PhysicalAddress, _class: SpaceClass) -> Cr3Value {
        Cr3Value(root.as_usize() as u64 & u64::from(ADDRESS_MASK))
    }

    fn invalidate_page(vaddr: VirtualAddress) {
        hw::invlpg(vaddr);
    }

    fn invalidate_all() {
        hw::flush_all();
    }

    unsafe fn activate(_root: PhysicalAddress, extension: &Cr3Value) {
        assert!(
            cfg!(any(test, feature = "software-emulation", target_arch = "x86")),
            "2-level x86 tables cannot be activated on this CPU"
        );
        // SAFETY: forwarded to the caller.
        unsafe { hw::load_cr3(extension.0) };
    }

    fn publish_tables() {
        hw::barrier();
    }
}
