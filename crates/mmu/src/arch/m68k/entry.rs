//! 68040 descriptor words.
//!
//! Fields are listed from bit 0 upward. Addresses are stored pre-shifted, so
//! each pointer kind can only name tables aligned to its own table size.

use bitfield_struct::bitfield;

/// Page descriptor type: invalid.
pub const PDT_INVALID: u8 = 0;
/// Page descriptor type: resident (both 1 and 2 mean resident).
pub const PDT_RESIDENT: u8 = 1;
/// Page descriptor type: indirect.
pub const PDT_INDIRECT: u8 = 3;

/// Upper descriptor type written for a resident pointer. Values 2 and 3 are
/// both resident; 0 and 1 are invalid.
pub const UDT_RESIDENT: u8 = 3;

/// Leaf page descriptor for a 4 KiB page.
#[bitfield(u32)]
pub struct PageDescriptor {
    #[bits(2)]
    pub pdt: u8,
    /// Write protected.
    pub w: bool,
    /// Used (set by hardware on access).
    pub u: bool,
    /// Modified (set by hardware on write).
    pub m: bool,
    #[bits(2)]
    pub cm: u8,
    /// Supervisor only.
    pub s: bool,
    pub u0: bool,
    pub u1: bool,
    pub g: bool,
    pub ur: bool,
    /// Physical address bits 31:12.
    #[bits(20)]
    pub page_address: u32,
}

/// Level 1 descriptor: points at a 64-entry page table.
#[bitfield(u32)]
pub struct PointerDescriptor {
    #[bits(2)]
    pub udt: u8,
    pub w: bool,
    pub u: bool,
    #[bits(4)]
    __: u8,
    /// Table address bits 31:8.
    #[bits(24)]
    pub table_address: u32,
}

/// Root descriptor: points at a 128-entry pointer table.
#[bitfield(u32)]
pub struct RootDescriptor {
    #[bits(2)]
    pub udt: u8,
    pub w: bool,
    pub u: bool,
    #[bits(5)]
    __: u8,
    /// Table address bits 31:9.
    #[bits(23)]
    pub table_address: u32,
}

/// Cache mode: cacheable, write-through.
pub const CM_WRITE_THROUGH: u8 = 0;
/// Cache mode: cacheable, copyback.
pub const CM_COPYBACK: u8 = 1;
/// Cache mode: non-cacheable, serialized.
pub const CM_SERIALIZED: u8 = 2;
/// Cache mode: non-cacheable.
pub const CM_NONCACHEABLE: u8 = 3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_descriptor_bits() {
        let desc = PageDescriptor::new()
            .with_pdt(PDT_RESIDENT)
            .with_w(true)
            .with_cm(CM_NONCACHEABLE)
            .with_s(true)
            .with_page_address(0xABCDE);
        assert_eq!(desc.into_bits(), 0xABCD_E0E5);
        assert_eq!(PageDescriptor::from_bits(0xABCD_E0E5).page_address(), 0xABCDE);
    }

    #[test]
    fn pointer_descriptor_bits() {
        let desc = PointerDescriptor::new()
            .with_udt(UDT_RESIDENT)
            .with_table_address(0x0012_3400 >> 8);
        assert_eq!(desc.into_bits(), 0x0012_3403);
    }

    #[test]
    fn root_descriptor_bits() {
        let desc = RootDescriptor::new()
            .with_udt(UDT_RESIDENT)
            .with_table_address(0x0012_3600 >> 9);
        assert_eq!(desc.into_bits(), 0x0012_3603);
    }
}
