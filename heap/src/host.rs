//! Sources of raw memory for arena growth.

use std::ptr::NonNull;

use crate::system::{self, OS_PAGE_SIZE};

/// Grants raw memory to the heap.
///
/// Every grant must be disjoint from all earlier ones, aligned to at least
/// [`crate::UNIT`], and readable and writable as initialized bytes for as
/// long as the host lives. Memory is never handed back while the heap is
/// alive.
pub trait HostMemory {
    /// Returns `bytes` of fresh memory, or `None` if the request is refused.
    fn request_pages(&mut self, bytes: usize) -> Option<NonNull<u8>>;
}

/// One anonymous mapping per request, all released on drop.
#[derive(Debug, Default)]
pub struct SystemMemory {
    mappings: Vec<(NonNull<u8>, usize)>,
}

// SAFETY: the mappings are owned exclusively by this value
unsafe impl Send for SystemMemory {}

impl SystemMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HostMemory for SystemMemory {
    fn request_pages(&mut self, bytes: usize) -> Option<NonNull<u8>> {
        let ptr = system::map_memory(bytes)?;
        self.mappings.push((ptr, bytes));
        Some(ptr)
    }
}

impl Drop for SystemMemory {
    fn drop(&mut self) {
        for (ptr, len) in self.mappings.drain(..) {
            // SAFETY: each entry is a live mapping made by `request_pages`
            unsafe { system::unmap_memory(ptr, len) };
        }
    }
}

/// A fixed reservation handed out front to back, like a program break.
///
/// Consecutive grants are physically adjacent, and a request that does not
/// fit in the remaining capacity is refused.
#[derive(Debug)]
pub struct ReservedRegion {
    base: NonNull<u8>,
    capacity: usize,
    brk: usize,
}

// SAFETY: the reservation is owned exclusively by this value
unsafe impl Send for ReservedRegion {}

impl ReservedRegion {
    /// Reserves `capacity` bytes, rounded up to whole OS pages. Returns
    /// `None` if the reservation itself fails.
    pub fn new(capacity: usize) -> Option<Self> {
        let capacity = capacity.checked_next_multiple_of(OS_PAGE_SIZE)?;
        let base = system::map_memory(capacity)?;
        Some(Self {
            base,
            capacity,
            brk: 0,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes handed out so far.
    #[inline]
    pub fn used(&self) -> usize {
        self.brk
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity - self.brk
    }
}

impl HostMemory for ReservedRegion {
    fn request_pages(&mut self, bytes: usize) -> Option<NonNull<u8>> {
        if bytes == 0 || bytes > self.remaining() {
            return None;
        }
        // SAFETY: brk + bytes <= capacity, so the result stays inside the reservation
        let ptr = unsafe { self.base.add(self.brk) };
        self.brk += bytes;
        Some(ptr)
    }
}

impl Drop for ReservedRegion {
    fn drop(&mut self) {
        // SAFETY: base/capacity is the reservation made in `new`
        unsafe { system::unmap_memory(self.base, self.capacity) };
    }
}
