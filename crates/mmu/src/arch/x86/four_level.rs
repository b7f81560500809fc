//! x86-64 long-mode paging: PML4, PDPT, PD and PT, 512 entries each.

use x86_64::structures::paging::PageTableFlags;

use super::{Cr3Value, flags, hw};
use crate::arch::{ArchMmu, LeafDescriptor, Level, SpaceClass, TableDescriptor};
use crate::{MappingFlags, PhysicalAddress, VirtualAddress};

/// Bits 12-51 hold the frame or table address.
const ADDRESS_MASK: u64 = 0x000F_FFFF_FFFF_F000;

const LEVELS: [Level; 4] = [
    Level::new(12, 9),
    Level::new(21, 9),
    Level::new(30, 9),
    Level::new(39, 9),
];

/// 4-level x86-64 paging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct X86_64;

impl ArchMmu for X86_64 {
    const NAME: &'static str = "x86-64";
    const PHYS_BITS: u32 = 52;
    const VIRT_BITS: u32 = 48;
    const SIGN_EXTENDED: bool = true;
    const LEVELS: &'static [Level] = &LEVELS;

    const SUPPORTS_USER_ASPACES: bool = false;
    const SUPPORTS_NX: bool = true;
    const SUPPORTS_NS: bool = false;

    type Raw = u64;
    type Extension = Cr3Value;

    fn encode_leaf(frame: PhysicalAddress, flags: MappingFlags) -> u64 {
        (frame.as_usize() as u64 & ADDRESS_MASK) | flags::encode_leaf(flags, true).bits()
    }

    fn decode_leaf(raw: u64) -> LeafDescriptor {
        let (validity, flags) = flags::decode_leaf(PageTableFlags::from_bits_truncate(raw));
        LeafDescriptor {
            validity,
            frame: PhysicalAddress::new((raw & ADDRESS_MASK) as usize),
            flags,
        }
    }

    fn encode_table(_level: usize, table: PhysicalAddress) -> u64 {
        (table.as_usize() as u64 & ADDRESS_MASK) | flags::TABLE_FLAGS.bits()
    }

    fn decode_table(_level: usize, raw: u64) -> TableDescriptor {
        TableDescriptor {
            validity: flags::table_validity(PageTableFlags::from_bits_truncate(raw)),
            table: PhysicalAddress::new((raw & ADDRESS_MASK) as usize),
        }
    }

    fn extension(root: PhysicalAddress, _class: SpaceClass) -> Cr3Value {
        Cr3Value(root.as_usize() as u64 & ADDRESS_MASK)
    }

    fn invalidate_page(vaddr: VirtualAddress) {
        hw::invlpg(vaddr);
    }

    fn invalidate_all() {
        hw::flush_all();
    }

    unsafe fn activate(_root: PhysicalAddress, extension: &Cr3Value) {
        assert!(
            cfg!(any(test, feature = "software-emulation", target_arch = "x86_64")),
            "long-mode tables cannot be activated on this CPU"
        );
        // SAFETY: forwarded to the caller.
        unsafe { hw::load_cr3(extension.0) };
    }

    fn publish_tables() {
        hw::barrier();
    }
}
