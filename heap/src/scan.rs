//! Raw word reads for conservative scanning.
//!
//! This is the only place that reads root or heap memory as `usize` values.
//! Callers hand in spans that were validated when they were built: root
//! regions check alignment on construction, heap payloads are unit aligned
//! because every grant is.

use std::ptr;

use crate::{RootRegion, block::Block};

/// Calls `f` with every word of `region`.
pub(crate) fn root_words(region: RootRegion<'_>, f: impl FnMut(usize)) {
    // SAFETY: a RootRegion is aligned and readable for its lifetime, which
    // covers this call
    unsafe { read_words(region.start(), region.len(), f) }
}

/// Calls `f` with every payload word of `block`.
///
/// # Safety
/// `block` must lie in memory granted by the heap's host, and the host must
/// still be alive.
pub(crate) unsafe fn payload_words(block: &Block, f: impl FnMut(usize)) {
    let start = ptr::with_exposed_provenance::<usize>(block.payload());
    let words = (block.end() - block.payload()) / size_of::<usize>();
    // SAFETY: the payload is inside a live grant whose provenance was exposed
    // when it was minted
    unsafe { read_words(start, words, f) }
}

/// # Safety
/// `start..start + words` must be readable, initialized memory.
unsafe fn read_words(start: *const usize, words: usize, mut f: impl FnMut(usize)) {
    assert!(start.is_aligned(), "scan span at {start:p} is not word aligned");
    for offset in 0..words {
        // SAFETY: in bounds by contract, alignment checked above
        f(unsafe { start.add(offset).read() });
    }
}
