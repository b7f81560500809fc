//! Address spaces.
//!
//! An [`AddressSpace`] owns a root table and the tables hanging off it, a
//! virtual window `[base, base + size)` that every map and unmap must stay
//! inside, and its space class. It is the entry point the generic VM layer
//! calls; the walker and codec below it are private.
//!
//! Nothing here locks. Callers serialize mutation of one address space.

use crate::arch::{ArchMmu, PAGE_SIZE, SpaceClass, root_level};
use crate::error::MmuError;
use crate::shootdown;
use crate::table_allocator::{PageAllocator, TableAllocator};
use crate::walker::{self, Unmapped};
use crate::{MappingFlags, PhysicalAddress, VirtualAddress};

/// A contiguous run of pages to map with one set of flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapRange {
    pub vaddr: VirtualAddress,
    pub paddr: PhysicalAddress,
    /// Length in bytes; a multiple of the page size.
    pub size: usize,
    pub flags: MappingFlags,
}

impl MapRange {
    pub const fn new(
        vaddr: VirtualAddress,
        paddr: PhysicalAddress,
        size: usize,
        flags: MappingFlags,
    ) -> Self {
        Self {
            vaddr,
            paddr,
            size,
            flags,
        }
    }

    /// A range mapping `paddr` at the numerically equal virtual address.
    pub const fn identity(paddr: PhysicalAddress, size: usize, flags: MappingFlags) -> Self {
        Self::new(VirtualAddress::new(paddr.as_usize()), paddr, size, flags)
    }
}

/// Whether every address in `[first, last]` reaches a distinct root slot.
///
/// On sign-extended backends both ends must be canonical and in the same
/// half; otherwise nothing may be set above the translated width.
fn translatable<A: ArchMmu>(first: usize, last: usize) -> bool {
    if A::VIRT_BITS >= usize::BITS {
        return true;
    }
    if !A::SIGN_EXTENDED {
        return last >> A::VIRT_BITS == 0;
    }
    let unused = usize::BITS - A::VIRT_BITS;
    let canonical = |addr: usize| ((((addr << unused) as isize) >> unused) as usize) == addr;
    let half = |addr: usize| addr >> (A::VIRT_BITS - 1);
    canonical(first) && canonical(last) && half(first) == half(last)
}

/// One translation context for backend `A`.
pub struct AddressSpace<A: ArchMmu> {
    root: PhysicalAddress,
    base: VirtualAddress,
    size: usize,
    class: SpaceClass,
    tables: TableAllocator,
    extension: A::Extension,
}

impl<A: ArchMmu> AddressSpace<A> {
    /// Creates an empty address space covering `[base, base + size)`.
    ///
    /// Returns [`MmuError::NotSupported`] for a user space on a backend
    /// without multiple address spaces, and [`MmuError::InvalidArgument`]
    /// for a window that is misaligned, empty or wider than the backend
    /// can translate.
    pub fn new(
        pool: &'static dyn PageAllocator,
        base: VirtualAddress,
        size: usize,
        class: SpaceClass,
    ) -> Result<Self, MmuError> {
        if class == SpaceClass::User && !A::SUPPORTS_USER_ASPACES {
            log::debug!("{}: user address spaces not supported", A::NAME);
            return Err(MmuError::NotSupported);
        }
        if !base.is_page_aligned() || size == 0 || size % PAGE_SIZE != 0 {
            return Err(MmuError::InvalidArgument);
        }
        let last = base
            .as_usize()
            .checked_add(size - 1)
            .ok_or(MmuError::InvalidArgument)?;
        if !translatable::<A>(base.as_usize(), last) {
            return Err(MmuError::InvalidArgument);
        }

        let mut tables = TableAllocator::new(pool);
        let root = tables.alloc_table::<A>(root_level::<A>())?.phys();
        log::debug!("{}: init {class:?} address space {base}..={last:#x}, root {root}", A::NAME);
        Ok(Self {
            root,
            base,
            size,
            class,
            tables,
            extension: A::extension(root, class),
        })
    }

    pub fn root(&self) -> PhysicalAddress {
        self.root
    }

    pub fn base(&self) -> VirtualAddress {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn class(&self) -> SpaceClass {
        self.class
    }

    /// Tables currently owned by this space, root included.
    pub fn tables_in_use(&self) -> usize {
        self.tables.outstanding()
    }

    pub const fn supports_user_aspaces() -> bool {
        A::SUPPORTS_USER_ASPACES
    }

    pub const fn supports_nx_mappings() -> bool {
        A::SUPPORTS_NX
    }

    pub const fn supports_ns_mappings() -> bool {
        A::SUPPORTS_NS
    }

    /// Sends future table allocations to `pool`. Only one switch is allowed.
    pub(crate) fn switch_pool(
        &mut self,
        pool: &'static dyn PageAllocator,
    ) -> Result<(), MmuError> {
        self.tables.switch_pool(pool)
    }

    fn contains(&self, vaddr: VirtualAddress, len: usize) -> bool {
        match vaddr.as_usize().checked_sub(self.base.as_usize()) {
            Some(offset) => offset <= self.size && len <= self.size - offset,
            None => false,
        }
    }

    /// Checks that `count` pages from `vaddr` lie inside the window and
    /// returns their length in bytes.
    pub(crate) fn check_pages(
        &self,
        vaddr: VirtualAddress,
        count: usize,
    ) -> Result<usize, MmuError> {
        if !vaddr.is_page_aligned() {
            return Err(MmuError::InvalidArgument);
        }
        let len = count
            .checked_mul(PAGE_SIZE)
            .ok_or(MmuError::InvalidArgument)?;
        if len == 0 {
            return Ok(0);
        }
        let last = vaddr.as_usize() + (len - 1);
        if !self.contains(vaddr, len) || !translatable::<A>(vaddr.as_usize(), last) {
            return Err(MmuError::InvalidArgument);
        }
        Ok(len)
    }

    fn check_flags(flags: MappingFlags) -> Result<(), MmuError> {
        if !MappingFlags::all().contains(flags) || flags.cache_policy().is_none() {
            return Err(MmuError::InvalidArgument);
        }
        if flags.contains(MappingFlags::NO_EXECUTE) && !A::SUPPORTS_NX {
            return Err(MmuError::NotSupported);
        }
        if flags.contains(MappingFlags::NON_SECURE) && !A::SUPPORTS_NS {
            return Err(MmuError::InvalidArgument);
        }
        Ok(())
    }

    /// Maps `count` pages starting at `vaddr` to consecutive frames
    /// starting at `paddr`.
    ///
    /// Existing mappings in the range are overwritten. If table allocation
    /// fails part way, every page this call wrote is unmapped again before
    /// [`MmuError::OutOfMemory`] is returned; pages it had overwritten are
    /// left unmapped rather than restored.
    pub fn map(
        &mut self,
        vaddr: VirtualAddress,
        paddr: PhysicalAddress,
        count: usize,
        flags: MappingFlags,
    ) -> Result<(), MmuError> {
        if count == 0 {
            return Ok(());
        }
        Self::check_flags(flags)?;
        if !paddr.is_page_aligned() {
            return Err(MmuError::InvalidArgument);
        }
        let len = self.check_pages(vaddr, count)?;
        let phys_end = (paddr.as_usize() as u64)
            .checked_add(len as u64)
            .ok_or(MmuError::InvalidArgument)?;
        if phys_end > 1u64 << A::PHYS_BITS {
            return Err(MmuError::InvalidArgument);
        }

        log::trace!("{}: map {vaddr} -> {paddr} x{count} {flags:?}", A::NAME);
        for done in 0..count {
            let offset = done * PAGE_SIZE;
            let (va, pa) = (vaddr + offset, paddr + offset);
            if let Err(err) = walker::map_page::<A>(&mut self.tables, self.root, va, pa, flags) {
                log::warn!(
                    "{}: map of {count} pages at {vaddr} failed after {done}: {err}",
                    A::NAME
                );
                for page in 0..done {
                    walker::unmap_page::<A>(&mut self.tables, self.root, vaddr + page * PAGE_SIZE);
                }
                if done > 0 {
                    shootdown::remote_invalidate(vaddr, done);
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Maps every page of `range`.
    pub fn map_range(&mut self, range: &MapRange) -> Result<(), MmuError> {
        if range.size % PAGE_SIZE != 0 {
            return Err(MmuError::InvalidArgument);
        }
        self.map(range.vaddr, range.paddr, range.size / PAGE_SIZE, range.flags)
    }

    /// Removes `count` pages starting at `vaddr`.
    ///
    /// Pages that are not mapped are skipped silently, a whole missing
    /// table at a time. Tables left empty are freed. Each cleared page is
    /// invalidated on this CPU before returning, and the registered remote
    /// hook, if any, is told about the range once.
    pub fn unmap(&mut self, vaddr: VirtualAddress, count: usize) -> Result<(), MmuError> {
        if count == 0 {
            return Ok(());
        }
        self.check_pages(vaddr, count)?;

        log::trace!("{}: unmap {vaddr} x{count}", A::NAME);
        let mut cleared = 0;
        let mut done = 0;
        while done < count {
            let page = vaddr + done * PAGE_SIZE;
            match walker::unmap_page::<A>(&mut self.tables, self.root, page) {
                Unmapped::Page => {
                    cleared += 1;
                    done += 1;
                }
                Unmapped::Hole { level } => {
                    let span = A::LEVELS[level].span();
                    let skip = (span - (page.as_usize() & (span - 1))) / PAGE_SIZE;
                    done += skip.min(count - done);
                }
            }
        }

        if cleared > 0 {
            shootdown::remote_invalidate(vaddr, count);
        }
        Ok(())
    }

    /// Returns the frame and flags mapped at the page containing `vaddr`.
    pub fn query(
        &self,
        vaddr: VirtualAddress,
    ) -> Result<(PhysicalAddress, MappingFlags), MmuError> {
        let page = vaddr.align_down(PAGE_SIZE);
        if !self.contains(page, PAGE_SIZE) {
            return Err(MmuError::NotFound);
        }
        let leaf = walker::query_page::<A>(&self.tables, self.root, page)?;
        Ok((leaf.frame, leaf.flags))
    }

    /// Resolves `vaddr` to the physical byte it maps, page offset included.
    pub fn translate(&self, vaddr: VirtualAddress) -> Result<PhysicalAddress, MmuError> {
        let (frame, _) = self.query(vaddr)?;
        Ok(frame + vaddr.page_offset())
    }

    /// Succeeds only if `vaddr` maps exactly `paddr` with exactly `flags`.
    pub fn check_mapping(
        &self,
        vaddr: VirtualAddress,
        paddr: PhysicalAddress,
        flags: MappingFlags,
    ) -> Result<(), MmuError> {
        match self.query(vaddr) {
            Ok(found) if found == (paddr, flags) => Ok(()),
            _ => Err(MmuError::NotFound),
        }
    }

    /// Frees every table of this space, root included.
    ///
    /// Mapped frames are left alone; they belong to whoever mapped them.
    /// A root that was carved from a boot arena is not reclaimed.
    pub fn destroy(mut self) -> Result<(), MmuError> {
        log::debug!(
            "{}: destroy address space at root {} ({} tables)",
            A::NAME,
            self.root,
            self.tables.outstanding()
        );
        walker::teardown::<A>(&mut self.tables, self.root);
        self.tables.free_table::<A>(root_level::<A>(), self.root);
        A::invalidate_all();
        Ok(())
    }

    /// Makes this space the one the MMU translates through.
    ///
    /// # Safety
    ///
    /// The space must map everything the CPU executes and touches after the
    /// switch.
    ///
    /// # Panics
    ///
    /// Panics when switching to a user space on a backend that has none.
    pub unsafe fn context_switch(&self) {
        assert!(
            self.class == SpaceClass::Kernel || A::SUPPORTS_USER_ASPACES,
            "{}: cannot switch to a user address space",
            A::NAME
        );
        log::trace!("{}: switching to root {}", A::NAME, self.root);
        // SAFETY: forwarded to the caller.
        unsafe { A::activate(self.root, &self.extension) };
    }
}

impl<A: ArchMmu> core::fmt::Debug for AddressSpace<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("arch", &A::NAME)
            .field("root", &self.root)
            .field("base", &self.base)
            .field("size", &self.size)
            .field("class", &self.class)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::software::{self, EmulatedMemory};
    use crate::arch::{M68k040, X86};
    #[cfg(target_pointer_width = "64")]
    use crate::arch::X86_64;

    const MIB: usize = 1024 * 1024;

    fn kernel_space<A: ArchMmu>(pages: usize) -> (&'static EmulatedMemory, AddressSpace<A>) {
        let pool = EmulatedMemory::new(pages).leak();
        let space = AddressSpace::<A>::new(
            pool,
            VirtualAddress::new(0),
            0x8000_0000,
            SpaceClass::Kernel,
        )
        .unwrap();
        (pool, space)
    }

    fn va(addr: usize) -> VirtualAddress {
        VirtualAddress::new(addr)
    }

    fn pa(addr: usize) -> PhysicalAddress {
        PhysicalAddress::new(addr)
    }

    mod lifecycle {
        use super::*;

        fn user_space_refused<A: ArchMmu>() {
            let pool = EmulatedMemory::new(8).leak();
            let user = AddressSpace::<A>::new(pool, va(0), 0x4000_0000, SpaceClass::User);
            assert!(matches!(user, Err(MmuError::NotSupported)));
            assert_eq!(pool.outstanding(), 0);

            // The kernel space is unaffected.
            let mut kernel =
                AddressSpace::<A>::new(pool, va(0), 0x4000_0000, SpaceClass::Kernel).unwrap();
            kernel.map(va(0x1000), pa(0x1000), 1, MappingFlags::empty()).unwrap();
            assert_eq!(kernel.query(va(0x1000)), Ok((pa(0x1000), MappingFlags::empty())));
        }

        #[test]
        fn user_space_refused_x86() {
            user_space_refused::<X86>();
        }

        #[test]
        fn user_space_refused_m68k() {
            user_space_refused::<M68k040>();
        }

        #[test]
        #[cfg(target_pointer_width = "64")]
        fn user_space_refused_x86_64() {
            user_space_refused::<X86_64>();
        }

        #[test]
        fn window_validation() {
            let pool = EmulatedMemory::new(8).leak();
            let new = |base, size| AddressSpace::<X86>::new(pool, va(base), size, SpaceClass::Kernel);
            assert!(matches!(new(0x1800, 0x1000), Err(MmuError::InvalidArgument)));
            assert!(matches!(new(0x1000, 0), Err(MmuError::InvalidArgument)));
            assert!(matches!(new(0x1000, 0x1800), Err(MmuError::InvalidArgument)));
            assert!(matches!(new(usize::MAX & !0xFFF, 0x2000), Err(MmuError::InvalidArgument)));
            assert!(new(0xC000_0000, 0x4000_0000).is_ok());
        }

        #[test]
        #[cfg(target_pointer_width = "64")]
        fn window_wider_than_backend() {
            let pool = EmulatedMemory::new(8).leak();
            let space =
                AddressSpace::<M68k040>::new(pool, va(0xF000_0000), 0x2000_0000, SpaceClass::Kernel);
            assert!(matches!(space, Err(MmuError::InvalidArgument)));
        }

        #[test]
        #[cfg(target_pointer_width = "64")]
        fn x86_64_windows_must_be_canonical() {
            let pool = EmulatedMemory::new(8).leak();
            let new =
                |base, size| AddressSpace::<X86_64>::new(pool, va(base), size, SpaceClass::Kernel);
            // Past the 48-bit lower half.
            assert!(matches!(new(0, 1 << 49), Err(MmuError::InvalidArgument)));
            // Straddles the hole between the halves.
            assert!(matches!(new(0x0000_7FFF_FFFF_F000, 0x2000), Err(MmuError::InvalidArgument)));
            // Non-canonical base.
            assert!(matches!(new(0x0001_0000_0000_0000, 0x1000), Err(MmuError::InvalidArgument)));
            assert_eq!(pool.outstanding(), 0);

            assert!(new(0, 1 << 47).is_ok());
            assert!(new(0xFFFF_8000_0000_0000, 1 << 47).is_ok());
        }

        #[test]
        #[cfg(target_pointer_width = "64")]
        fn x86_64_halves_do_not_alias() {
            let pool = EmulatedMemory::new(16).leak();
            let none = MappingFlags::empty();
            let mut lower =
                AddressSpace::<X86_64>::new(pool, va(0), 1 << 47, SpaceClass::Kernel).unwrap();
            lower.map(va(0), pa(0x1000), 1, none).unwrap();
            assert_eq!(lower.map(va(1 << 48), pa(0x2000), 1, none), Err(MmuError::InvalidArgument));
            assert_eq!(lower.query(va(0)), Ok((pa(0x1000), none)));

            let top = (1usize << 47) - PAGE_SIZE;
            lower.map(va(top), pa(0x2000), 1, none).unwrap();
            assert_eq!(lower.query(va(0)), Ok((pa(0x1000), none)));
            assert_eq!(lower.query(va(top)), Ok((pa(0x2000), none)));
            assert_eq!(lower.unmap(va(top), 2), Err(MmuError::InvalidArgument));
        }

        #[test]
        fn capabilities() {
            assert!(!AddressSpace::<X86>::supports_nx_mappings());
            assert!(!AddressSpace::<X86>::supports_user_aspaces());
            assert!(!AddressSpace::<M68k040>::supports_ns_mappings());
            assert!(!AddressSpace::<M68k040>::supports_user_aspaces());
        }

        #[test]
        #[cfg(target_pointer_width = "64")]
        fn capabilities_x86_64() {
            assert!(AddressSpace::<X86_64>::supports_nx_mappings());
            assert!(!AddressSpace::<X86_64>::supports_ns_mappings());
        }

        #[test]
        fn destroy_frees_everything() {
            let (pool, mut space) = kernel_space::<M68k040>(32);
            space.map(va(0), pa(0), 2048, MappingFlags::empty()).unwrap();
            space.map(va(0x3000_0000), pa(0x1000), 1, MappingFlags::empty()).unwrap();
            assert!(pool.outstanding() > 1);

            space.destroy().unwrap();
            assert_eq!(pool.outstanding(), 0);
        }

        #[test]
        fn context_switch_loads_root() {
            let (_pool, space) = kernel_space::<M68k040>(4);
            software::reset();
            unsafe { space.context_switch() };
            assert_eq!(software::snapshot().active_root, Some(space.root()));
        }
    }

    mod map {
        use super::*;

        fn scenario_one<A: ArchMmu>() {
            let (_pool, mut space) = kernel_space::<A>(8);
            space.map(va(0x1000), pa(0x1000), 1, MappingFlags::empty()).unwrap();
            assert_eq!(space.query(va(0x1000)), Ok((pa(0x1000), MappingFlags::empty())));
        }

        #[test]
        fn single_page_x86() {
            scenario_one::<X86>();
        }

        #[test]
        fn single_page_m68k() {
            scenario_one::<M68k040>();
        }

        #[test]
        #[cfg(target_pointer_width = "64")]
        fn single_page_x86_64() {
            scenario_one::<X86_64>();
        }

        fn flags_round_trip<A: ArchMmu>(extra: MappingFlags) {
            let (_pool, mut space) = kernel_space::<A>(8);
            let combos = [
                MappingFlags::empty(),
                MappingFlags::READ_ONLY,
                MappingFlags::USER,
                MappingFlags::USER | MappingFlags::READ_ONLY,
                MappingFlags::UNCACHED,
                MappingFlags::UNCACHED_DEVICE | MappingFlags::READ_ONLY,
                MappingFlags::USER | MappingFlags::UNCACHED_DEVICE,
            ];
            for (i, flags) in combos.into_iter().enumerate() {
                let flags = flags | extra;
                let vaddr = va(0x0040_0000 + i * PAGE_SIZE);
                let paddr = pa(0x0123_4000 + i * PAGE_SIZE);
                space.map(vaddr, paddr, 1, flags).unwrap();
                assert_eq!(space.query(vaddr), Ok((paddr, flags)), "{flags:?}");
            }
        }

        #[test]
        fn flags_round_trip_x86() {
            flags_round_trip::<X86>(MappingFlags::empty());
        }

        #[test]
        fn flags_round_trip_m68k() {
            flags_round_trip::<M68k040>(MappingFlags::empty());
        }

        #[test]
        #[cfg(target_pointer_width = "64")]
        fn flags_round_trip_x86_64() {
            flags_round_trip::<X86_64>(MappingFlags::empty());
            flags_round_trip::<X86_64>(MappingFlags::NO_EXECUTE);
        }

        #[test]
        fn zero_pages_is_a_no_op() {
            let (pool, mut space) = kernel_space::<X86>(4);
            space.map(va(0x1000), pa(0x1000), 0, MappingFlags::empty()).unwrap();
            space.unmap(va(0x1000), 0).unwrap();
            assert_eq!(pool.outstanding(), 1);
            // Even arguments that would otherwise be rejected.
            space.map(va(0x1001), pa(0x1000), 0, MappingFlags::CACHE_MASK).unwrap();
        }

        #[test]
        fn rejects_bad_arguments() {
            let (pool, mut space) = kernel_space::<X86>(4);
            let none = MappingFlags::empty();
            assert_eq!(space.map(va(0x1001), pa(0x1000), 1, none), Err(MmuError::InvalidArgument));
            assert_eq!(space.map(va(0x1000), pa(0x1010), 1, none), Err(MmuError::InvalidArgument));
            assert_eq!(
                space.map(va(0x1000), pa(0x1000), 1, MappingFlags::CACHE_MASK),
                Err(MmuError::InvalidArgument)
            );
            assert_eq!(
                space.map(va(0x1000), pa(0x1000), 1, MappingFlags::NO_EXECUTE),
                Err(MmuError::NotSupported)
            );
            assert_eq!(
                space.map(va(0x1000), pa(0x1000), 1, MappingFlags::NON_SECURE),
                Err(MmuError::InvalidArgument)
            );
            assert_eq!(
                space.map(va(0x1000), pa(0x1000), 1, MappingFlags::from_bits_retain(1 << 9)),
                Err(MmuError::InvalidArgument)
            );
            // Outside the window.
            assert_eq!(space.map(va(0x8000_0000), pa(0x1000), 1, none), Err(MmuError::InvalidArgument));
            assert_eq!(space.map(va(0x7FFF_F000), pa(0x1000), 2, none), Err(MmuError::InvalidArgument));
            assert_eq!(space.map(va(0), pa(0), usize::MAX, none), Err(MmuError::InvalidArgument));
            // Beyond 32-bit physical.
            assert_eq!(space.map(va(0x1000), pa(0xFFFF_F000), 2, none), Err(MmuError::InvalidArgument));
            assert_eq!(space.unmap(va(0x1800), 1), Err(MmuError::InvalidArgument));

            assert_eq!(pool.outstanding(), 1);
        }

        #[test]
        fn m68k_rejects_nx() {
            let (_pool, mut space) = kernel_space::<M68k040>(4);
            assert_eq!(
                space.map(va(0x1000), pa(0x1000), 1, MappingFlags::NO_EXECUTE),
                Err(MmuError::NotSupported)
            );
        }

        #[test]
        fn overwrite_last_write_wins() {
            let (pool, mut space) = kernel_space::<M68k040>(8);
            space.map(va(0x5000), pa(0x1000), 1, MappingFlags::empty()).unwrap();
            let tables = pool.outstanding();
            space.map(va(0x5000), pa(0x9000), 1, MappingFlags::READ_ONLY).unwrap();
            assert_eq!(space.query(va(0x5000)), Ok((pa(0x9000), MappingFlags::READ_ONLY)));
            assert_eq!(pool.outstanding(), tables);
        }

        fn last_page_of_window<A: ArchMmu>() {
            let pool = EmulatedMemory::new(8).leak();
            let mut space =
                AddressSpace::<A>::new(pool, va(0xC000_0000), 0x4000_0000, SpaceClass::Kernel).unwrap();
            let last = va(0xFFFF_F000);
            space.map(last, pa(0x00AB_C000), 1, MappingFlags::empty()).unwrap();
            assert_eq!(space.query(last), Ok((pa(0x00AB_C000), MappingFlags::empty())));
            assert_eq!(space.query(va(0xFFFF_E000)), Err(MmuError::NotFound));
            space.unmap(last, 1).unwrap();
            assert_eq!(pool.outstanding(), 1);
        }

        #[test]
        fn last_page_of_window_x86() {
            last_page_of_window::<X86>();
        }

        #[test]
        fn last_page_of_window_m68k() {
            last_page_of_window::<M68k040>();
        }

        #[test]
        fn disjoint_across_repeat_groups() {
            let (_pool, mut space) = kernel_space::<M68k040>(16);
            let pairs = [
                // Adjacent logical level 1 entries.
                (0x003F_F000, 0x0040_0000),
                // Adjacent logical root entries.
                (0x0FFF_F000, 0x1000_0000),
                // Same hardware page table position, different group slot.
                (0x0000_0000, 0x0004_0000),
            ];
            for (i, (a, b)) in pairs.into_iter().enumerate() {
                let pa_a = pa(0x0100_0000 + i * 0x2000);
                let pa_b = pa_a + PAGE_SIZE;
                space.map(va(a), pa_a, 1, MappingFlags::empty()).unwrap();
                space.map(va(b), pa_b, 1, MappingFlags::empty()).unwrap();
                assert_eq!(space.query(va(a)).unwrap().0, pa_a);
                assert_eq!(space.query(va(b)).unwrap().0, pa_b);
            }
        }

        #[test]
        fn repeat_group_slots_decode_to_their_own_offsets() {
            let (_pool, mut space) = kernel_space::<M68k040>(8);
            let vaddr = va(0x2345_6000);
            space.map(vaddr, pa(0x7000), 1, MappingFlags::empty()).unwrap();

            let root = space.tables.table::<M68k040>(space.root());
            let root_base = M68k040::LEVELS[2].raw_base(vaddr);
            let l1 = M68k040::decode_table(2, root.read(root_base)).table;
            for i in 0..8 {
                let raw = root.read(root_base + i);
                assert_eq!(M68k040::decode_table(2, raw).table, l1 + i * 512);
                assert_eq!(raw & 0x1FF, root.read(root_base) & 0x1FF);
            }

            let l1_table = space.tables.table::<M68k040>(l1);
            let l1_base = M68k040::LEVELS[1].raw_base(vaddr);
            let leaf = M68k040::decode_table(1, l1_table.read(l1_base)).table;
            for i in 0..16 {
                let raw = l1_table.read(l1_base + i);
                assert_eq!(M68k040::decode_table(1, raw).table, leaf + i * 256);
                assert_eq!(raw & 0xFF, l1_table.read(l1_base) & 0xFF);
            }
        }

        #[test]
        fn out_of_memory_rolls_back_the_call() {
            let (pool, mut space) = kernel_space::<X86>(8);
            // Root plus one page table.
            pool.set_limit(Some(2));
            // The second page needs a second page table.
            assert_eq!(
                space.map(va(0x003F_F000), pa(0x1000), 2, MappingFlags::empty()),
                Err(MmuError::OutOfMemory)
            );
            assert_eq!(space.query(va(0x003F_F000)), Err(MmuError::NotFound));
            assert_eq!(pool.outstanding(), 1);
            assert_eq!(space.tables_in_use(), 1);

            pool.set_limit(None);
            space.map(va(0x003F_F000), pa(0x1000), 2, MappingFlags::empty()).unwrap();
        }

        fn identity_64_mib<A: ArchMmu>() {
            let (pool, mut space) = kernel_space::<A>(64);
            let pages = 64 * MIB / PAGE_SIZE;
            space.map(va(0), pa(0), pages, MappingFlags::empty()).unwrap();

            for addr in [0, 32 * MIB, 64 * MIB - PAGE_SIZE] {
                assert_eq!(space.query(va(addr)).unwrap().0, pa(addr));
            }

            space.unmap(va(0), pages).unwrap();
            for addr in [0, PAGE_SIZE, 32 * MIB, 64 * MIB - PAGE_SIZE] {
                assert_eq!(space.query(va(addr)), Err(MmuError::NotFound));
            }
            assert_eq!(pool.outstanding(), 1);
        }

        #[test]
        fn identity_64_mib_x86() {
            identity_64_mib::<X86>();
        }

        #[test]
        fn identity_64_mib_m68k() {
            identity_64_mib::<M68k040>();
        }

        #[test]
        #[cfg(target_pointer_width = "64")]
        fn identity_64_mib_x86_64() {
            identity_64_mib::<X86_64>();
        }

        #[test]
        fn map_range_requires_whole_pages() {
            let (_pool, mut space) = kernel_space::<X86>(4);
            let range = MapRange::identity(pa(0x2000), 0x1800, MappingFlags::empty());
            assert_eq!(space.map_range(&range), Err(MmuError::InvalidArgument));
            let range = MapRange::identity(pa(0x2000), 0x2000, MappingFlags::empty());
            space.map_range(&range).unwrap();
            assert_eq!(space.query(va(0x3000)).unwrap().0, pa(0x3000));
        }
    }

    mod unmap {
        use super::*;
        use std::cell::RefCell;
        use std::vec::Vec;

        #[test]
        fn idempotent() {
            let (pool, mut space) = kernel_space::<M68k040>(8);
            space.map(va(0x1000), pa(0x5000), 1, MappingFlags::empty()).unwrap();
            space.map(va(0x2000), pa(0x6000), 1, MappingFlags::empty()).unwrap();
            let tables = pool.outstanding();

            space.unmap(va(0x1000), 1).unwrap();
            space.unmap(va(0x1000), 1).unwrap();
            assert_eq!(space.query(va(0x1000)), Err(MmuError::NotFound));
            assert_eq!(space.query(va(0x2000)), Ok((pa(0x6000), MappingFlags::empty())));
            assert_eq!(pool.outstanding(), tables);
        }

        fn no_leakage<A: ArchMmu>() {
            let (pool, mut space) = kernel_space::<A>(64);
            let before = pool.outstanding();
            let scattered = [0x0000_0000, 0x0000_1000, 0x003F_F000, 0x0040_0000, 0x1000_0000, 0x7FFF_F000];
            for (i, addr) in scattered.into_iter().enumerate() {
                space.map(va(addr), pa(i * PAGE_SIZE), 1, MappingFlags::empty()).unwrap();
            }
            assert!(pool.outstanding() > before);
            for addr in scattered {
                space.unmap(va(addr), 1).unwrap();
            }
            assert_eq!(pool.outstanding(), before);
            assert_eq!(space.tables_in_use(), 1);
        }

        #[test]
        fn no_leakage_x86() {
            no_leakage::<X86>();
        }

        #[test]
        fn no_leakage_m68k() {
            no_leakage::<M68k040>();
        }

        #[test]
        #[cfg(target_pointer_width = "64")]
        fn no_leakage_x86_64() {
            no_leakage::<X86_64>();
        }

        #[test]
        fn invalidates_each_cleared_page_locally() {
            let (_pool, mut space) = kernel_space::<X86>(8);
            space.map(va(0x1000), pa(0x1000), 3, MappingFlags::empty()).unwrap();
            software::reset();
            space.unmap(va(0x2000), 1).unwrap();
            assert_eq!(software::snapshot().invalidated, [va(0x2000)]);
        }

        #[test]
        fn skips_missing_tables() {
            let pool = EmulatedMemory::new(4).leak();
            let mut space =
                AddressSpace::<X86>::new(pool, va(0xC000_0000), 0x4000_0000, SpaceClass::Kernel).unwrap();
            space.map(va(0xC080_0000), pa(0x1000), 1, MappingFlags::empty()).unwrap();
            software::reset();
            space.unmap(va(0xC000_0000), 0x4_0000).unwrap();
            assert_eq!(space.query(va(0xC080_0000)), Err(MmuError::NotFound));
            // Leaf, then the directory entry.
            assert_eq!(software::snapshot().invalidated.len(), 2);
            assert_eq!(pool.outstanding(), 1);
        }

        std::thread_local! {
            static REMOTE_CALLS: RefCell<Vec<(VirtualAddress, usize)>> = const { RefCell::new(Vec::new()) };
        }

        fn record_remote(vaddr: VirtualAddress, pages: usize) {
            REMOTE_CALLS.with(|calls| calls.borrow_mut().push((vaddr, pages)));
        }

        #[test]
        fn remote_hook_sees_each_unmap_once() {
            assert!(shootdown::register(record_remote));
            assert!(!shootdown::register(record_remote));

            let (_pool, mut space) = kernel_space::<M68k040>(8);
            space.map(va(0x4000), pa(0x4000), 4, MappingFlags::empty()).unwrap();
            space.unmap(va(0x4000), 4).unwrap();
            // Nothing left to clear, so nobody else needs telling.
            space.unmap(va(0x4000), 4).unwrap();

            REMOTE_CALLS.with(|calls| assert_eq!(*calls.borrow(), [(va(0x4000), 4)]));
        }
    }

    mod translate {
        use super::*;

        #[test]
        fn preserves_page_offset() {
            let (_pool, mut space) = kernel_space::<X86>(4);
            space.map(va(0x0010_0000), pa(0x0020_0000), 1, MappingFlags::empty()).unwrap();
            assert_eq!(space.translate(va(0x0010_0ABC)), Ok(pa(0x0020_0ABC)));
            assert_eq!(space.translate(va(0x0010_1000)), Err(MmuError::NotFound));
            assert_eq!(space.translate(va(0x9000_0000)), Err(MmuError::NotFound));
        }

        #[test]
        fn check_mapping_is_exact() {
            let (_pool, mut space) = kernel_space::<M68k040>(8);
            space.map(va(0x3000), pa(0x8000), 1, MappingFlags::READ_ONLY).unwrap();
            assert_eq!(space.check_mapping(va(0x3000), pa(0x8000), MappingFlags::READ_ONLY), Ok(()));
            assert_eq!(
                space.check_mapping(va(0x3000), pa(0x8000), MappingFlags::empty()),
                Err(MmuError::NotFound)
            );
            assert_eq!(
                space.check_mapping(va(0x3000), pa(0x9000), MappingFlags::READ_ONLY),
                Err(MmuError::NotFound)
            );
            assert_eq!(
                space.check_mapping(va(0x4000), pa(0x8000), MappingFlags::READ_ONLY),
                Err(MmuError::NotFound)
            );
        }
    }
}
