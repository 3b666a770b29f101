use std::sync::atomic::compiler_fence;
use std::sync::atomic::fence;
use std::sync::atomic::Ordering;

/// Full memory barrier between host stores to a DMA buffer and the MMIO
/// write that lets the AFU read it (and between observing DONE and reading
/// results).
#[inline(always)]
pub fn dmb() {
    compiler_fence(Ordering::SeqCst);
    fence(Ordering::SeqCst);
    compiler_fence(Ordering::SeqCst);
}
