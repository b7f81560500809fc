//! Software emulation of the translation hardware.
//!
//! Tests and hosted builds cannot execute `invlpg`, `movec` or `mov cr3`.
//! Instead the backends record what they would have done in a per-thread
//! [`HardwareLog`], and page-table storage comes from an [`EmulatedMemory`]
//! pool with a fake physical address range.

use std::cell::RefCell;
use std::vec::Vec;

use crate::{PhysicalAddress, VirtualAddress};

mod memory;

pub use memory::EmulatedMemory;

/// Everything the emulated CPU has been asked to do on this thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HardwareLog {
    /// Root most recently handed to `activate`.
    pub active_root: Option<PhysicalAddress>,
    /// Single-page invalidations, in order.
    pub invalidated: Vec<VirtualAddress>,
    /// Full TLB flushes.
    pub full_flushes: usize,
    /// Cache write-back barriers issued by `publish_tables`.
    pub barriers: usize,
}

std::thread_local! {
    static HARDWARE: RefCell<HardwareLog> = RefCell::new(HardwareLog::default());
}

pub(crate) fn record_invalidate(vaddr: VirtualAddress) {
    HARDWARE.with(|hw| hw.borrow_mut().invalidated.push(vaddr));
}

pub(crate) fn record_invalidate_all() {
    HARDWARE.with(|hw| hw.borrow_mut().full_flushes += 1);
}

pub(crate) fn record_activate(root: PhysicalAddress) {
    HARDWARE.with(|hw| hw.borrow_mut().active_root = Some(root));
}

pub(crate) fn record_barrier() {
    HARDWARE.with(|hw| hw.borrow_mut().barriers += 1);
}

/// Returns a copy of this thread's hardware log.
pub fn snapshot() -> HardwareLog {
    HARDWARE.with(|hw| hw.borrow().clone())
}

/// Clears this thread's hardware log.
pub fn reset() {
    HARDWARE.with(|hw| *hw.borrow_mut() = HardwareLog::default());
}
