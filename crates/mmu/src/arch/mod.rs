//! Architecture backends.
//!
//! Every CPU family is a zero-sized type implementing [`ArchMmu`]. The
//! generic walker and address space code are instantiated once per backend;
//! nothing here dispatches at runtime. [`Native`] names the backend that
//! matches the compilation target.
//!
//! Levels are numbered from the leaf: level 0 holds page descriptors and the
//! last entry of [`ArchMmu::LEVELS`] describes the root table.
//!
//! Hardware hooks (TLB invalidation, root register writes, cache write-back)
//! go to the emulated hardware log under `cfg(test)` or the
//! `software-emulation` feature, and to the real instructions otherwise.

use core::fmt::Debug;

use crate::{MappingFlags, PhysicalAddress, VirtualAddress};

pub mod m68k;
pub mod x86;

// NOTE: The emulated hardware is only built for tests and the emulation
// feature; kernel builds never see it.
#[cfg(any(test, feature = "software-emulation"))]
pub mod software;

pub use m68k::M68k040;
pub use x86::X86;
#[cfg(target_pointer_width = "64")]
pub use x86::X86_64;

/// The backend matching the compilation target.
#[cfg(target_arch = "x86")]
pub type Native = X86;
/// The backend matching the compilation target.
#[cfg(target_arch = "x86_64")]
pub type Native = X86_64;
/// The backend matching the compilation target.
#[cfg(target_arch = "m68k")]
pub type Native = M68k040;

/// Size of a mapped page in bytes. All backends use 4 KiB pages.
pub const PAGE_SIZE: usize = 4096;

/// Deepest hierarchy any backend uses. Bounds the walker's explicit stacks.
pub const MAX_LEVELS: usize = 4;

/// Fixed-width storage word of a hardware table slot.
pub trait RawEntry: Copy + Eq + Debug + Send + Sync + 'static {
    /// The all-zero word. Reads as invalid on every backend.
    const ZERO: Self;
}

impl RawEntry for u32 {
    const ZERO: Self = 0;
}

impl RawEntry for u64 {
    const ZERO: Self = 0;
}

/// Geometry of one level of the table hierarchy.
///
/// `shift` and `index_bits` describe the logical index the walker extracts
/// from a virtual address. When the hardware table at this level is finer
/// than the logical one, each logical index owns a repeat group of
/// `1 << repeat_shift` raw slots, and consecutive slots of a group point
/// `group_stride` bytes further into the next-level storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Level {
    /// Lowest virtual address bit of the logical index.
    pub shift: u32,
    /// Width of the logical index.
    pub index_bits: u32,
    /// Log2 of the raw slots per logical entry.
    pub repeat_shift: u32,
    /// Hardware slots in a table at this level.
    pub raw_slots: usize,
    /// Bytes between the targets of consecutive slots in a group.
    pub group_stride: usize,
}

impl Level {
    /// A level whose hardware radix equals its logical radix.
    pub const fn new(shift: u32, index_bits: u32) -> Self {
        Self {
            shift,
            index_bits,
            repeat_shift: 0,
            raw_slots: 1 << index_bits,
            group_stride: 0,
        }
    }

    /// A level emulating a coarser logical radix over finer hardware slots.
    ///
    /// # Panics
    ///
    /// Panics (at compile time when used in a const) if the raw slot count
    /// does not equal the logical entry count times the group size.
    pub const fn with_repeat(
        shift: u32,
        index_bits: u32,
        repeat_shift: u32,
        raw_slots: usize,
        group_stride: usize,
    ) -> Self {
        assert!((1usize << index_bits) << repeat_shift == raw_slots);
        Self {
            shift,
            index_bits,
            repeat_shift,
            raw_slots,
            group_stride,
        }
    }

    /// Logical index of `vaddr` at this level.
    #[inline]
    pub const fn index(&self, vaddr: VirtualAddress) -> usize {
        (vaddr.as_usize() >> self.shift) & ((1 << self.index_bits) - 1)
    }

    /// Number of logical entries in a table at this level.
    #[inline]
    pub const fn entries(&self) -> usize {
        1 << self.index_bits
    }

    /// Number of raw slots written per logical entry.
    #[inline]
    pub const fn repeats(&self) -> usize {
        1 << self.repeat_shift
    }

    /// First raw slot of the repeat group that translates `vaddr`.
    #[inline]
    pub const fn raw_base(&self, vaddr: VirtualAddress) -> usize {
        self.index(vaddr) << self.repeat_shift
    }

    /// Bytes of virtual address space covered by one logical entry.
    #[inline]
    pub const fn span(&self) -> usize {
        1 << self.shift
    }
}

/// Decoded validity discriminant of a table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Invalid,
    Resident,
    /// An encoding this crate never writes (an indirect descriptor, a large
    /// page). Not translated by `query`, never reclaimed as empty.
    Reserved,
}

/// Generic view of a leaf (page) descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafDescriptor {
    pub validity: Validity,
    pub frame: PhysicalAddress,
    pub flags: MappingFlags,
}

/// Generic view of a pointer (table) descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDescriptor {
    pub validity: Validity,
    pub table: PhysicalAddress,
}

/// Space class recorded by an address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceClass {
    Kernel,
    User,
}

/// Contract implemented by each CPU family.
///
/// The codec methods are pure functions over a single slot word. They never
/// reject flags; unsupported requests are filtered before they get here.
pub trait ArchMmu: Send + Sync + 'static {
    /// Short name used in log lines.
    const NAME: &'static str;
    /// Width of a physical address the descriptors can hold.
    const PHYS_BITS: u32;
    /// Width of a virtual address the root table can translate.
    const VIRT_BITS: u32;
    /// Whether bits above `VIRT_BITS` must repeat the top translated bit,
    /// splitting the address space into a lower and an upper half.
    const SIGN_EXTENDED: bool = false;
    /// Level geometry, leaf first.
    const LEVELS: &'static [Level];

    const SUPPORTS_USER_ASPACES: bool;
    const SUPPORTS_NX: bool;
    const SUPPORTS_NS: bool;

    type Raw: RawEntry;
    /// Extra per-space state, typically the root register value.
    type Extension: Copy + Debug + Send + Sync;

    fn encode_leaf(frame: PhysicalAddress, flags: MappingFlags) -> Self::Raw;
    fn decode_leaf(raw: Self::Raw) -> LeafDescriptor;
    fn encode_table(level: usize, table: PhysicalAddress) -> Self::Raw;
    fn decode_table(level: usize, raw: Self::Raw) -> TableDescriptor;

    /// Validity of `raw` read from a table at `level`.
    fn validity(level: usize, raw: Self::Raw) -> Validity {
        if level == 0 {
            Self::decode_leaf(raw).validity
        } else {
            Self::decode_table(level, raw).validity
        }
    }

    fn extension(root: PhysicalAddress, class: SpaceClass) -> Self::Extension;

    /// Drops any cached translation of `vaddr` on the current CPU.
    fn invalidate_page(vaddr: VirtualAddress);

    /// Drops every cached translation on the current CPU.
    fn invalidate_all();

    /// Points the translation hardware at `root`.
    ///
    /// # Safety
    ///
    /// The tables under `root` must map the code and data the CPU touches
    /// after this returns.
    unsafe fn activate(root: PhysicalAddress, extension: &Self::Extension);

    /// Forces table writes out of any write-back cache so other CPUs see them.
    fn publish_tables();
}

/// Level geometry of `A`'s root table.
#[inline]
pub(crate) fn root_level<A: ArchMmu>() -> usize {
    A::LEVELS.len() - 1
}
