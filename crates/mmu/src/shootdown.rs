//! Cross-CPU translation invalidation.
//!
//! `unmap` always invalidates the local TLB itself. On multiprocessor
//! systems the kernel registers a hook here once, and every unmap that
//! removed at least one page calls it afterwards so other CPUs can drop
//! their copies of the range.

use spin::Once;

use crate::VirtualAddress;

/// Called with the first address and the page count of an unmapped range.
pub type RemoteInvalidate = fn(VirtualAddress, usize);

static REMOTE: Once<RemoteInvalidate> = Once::new();

/// Installs the remote invalidation hook.
///
/// Returns `false` if a hook was already installed; the first one stays.
pub fn register(hook: RemoteInvalidate) -> bool {
    let mut installed = false;
    REMOTE.call_once(|| {
        installed = true;
        hook
    });
    if installed {
        log::debug!("remote TLB invalidation hook registered");
    }
    installed
}

pub(crate) fn remote_invalidate(vaddr: VirtualAddress, pages: usize) {
    if let Some(hook) = REMOTE.get() {
        hook(vaddr, pages);
    }
}
