//! Memory barriers for DMA descriptor hand-off.

/// Data Memory Barrier
///
/// All memory accesses before the barrier are observed before any access
/// after it. Used after filling a descriptor and before flipping its
/// ownership bit or kicking the DMA engine.
#[inline]
pub fn dmb() {
    #[cfg(target_arch = "aarch64")]
    // SAFETY: `dmb sy` only orders memory accesses; no registers or memory
    // are modified
    unsafe {
        core::arch::asm!("dmb sy", options(nostack, preserves_flags));
    }

    #[cfg(not(target_arch = "aarch64"))]
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}
