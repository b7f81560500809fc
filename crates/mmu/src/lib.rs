#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]
#![cfg_attr(target_arch = "m68k", feature(asm_experimental_arch))]

//! # Polaris MMU backend
//!
//! Builds, walks and tears down hardware page tables for the kernel's
//! virtual memory layer. The crate provides:
//!
//! - Descriptor codecs for 2-level x86, 4-level x86-64 and the 68040,
//!   including the repeat groups the 68040 needs to emulate a coarser radix.
//! - [`AddressSpace`]: map, unmap, query and teardown over a root table.
//! - [`Kernel`]: the two-phase kernel address space, first backed by a
//!   [`BootArena`] and then by the physical page pool.
//! - [`Trampoline`]: a throwaway identity mapping for chain-loading.
//! - Software emulation of the TLB and root registers for testing in
//!   non-kernel environments.

extern crate alloc;

mod address;
mod address_space;
pub mod arch;
mod boot_arena;
mod error;
mod flags;
mod kernel;
mod radix;
pub mod shootdown;
mod table;
mod table_allocator;
mod trampoline;
mod walker;

pub use address::{PhysicalAddress, VirtualAddress};
pub use address_space::{AddressSpace, MapRange};
pub use arch::{ArchMmu, SpaceClass, PAGE_SIZE};
pub use boot_arena::BootArena;
pub use error::MmuError;
pub use flags::{CachePolicy, MappingFlags};
pub use kernel::Kernel;
pub use table_allocator::PageAllocator;
pub use trampoline::Trampoline;

/// The kernel address space of the CPU this crate is built for.
#[cfg(any(target_arch = "x86", target_arch = "x86_64", target_arch = "m68k"))]
pub static KERNEL_ASPACE: Kernel<arch::Native> = Kernel::new();
