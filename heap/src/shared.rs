use std::{ptr::NonNull, sync::Arc};

use parking_lot::{Mutex, MutexGuard};

use crate::{Heap, HeapError, HeapStats, RootProvider, host::HostMemory, host::SystemMemory};

/// A heap shared between threads.
///
/// Every operation takes the heap lock, so allocation and collection are
/// serialized and a collection always runs to completion before the next
/// allocation starts. The lock is not reentrant: a [`RootProvider`] must not
/// call back into the same heap while it is being collected.
///
/// [`SharedHeap::allocate`] releases the lock before it returns. Until the
/// caller stores the pointer somewhere its roots cover, a `collect` from
/// another thread sees no reference to the new block and reclaims it. Hold
/// [`SharedHeap::lock`] across the allocation and the rooting step when
/// other threads may collect.
#[derive(Debug)]
pub struct SharedHeap<H: HostMemory = SystemMemory> {
    inner: Arc<Mutex<Heap<H>>>,
}

impl<H: HostMemory> Clone for SharedHeap<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: HostMemory> SharedHeap<H> {
    pub fn new(heap: Heap<H>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(heap)),
        }
    }

    /// Allocates under the lock. The block is unrooted once this returns.
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, HeapError> {
        self.inner.lock().allocate(size)
    }

    pub fn collect(&self, roots: &mut impl RootProvider) {
        self.inner.lock().collect(roots);
    }

    pub fn stats(&self) -> HeapStats {
        self.inner.lock().stats()
    }

    /// Exclusive access for a sequence of operations.
    pub fn lock(&self) -> MutexGuard<'_, Heap<H>> {
        self.inner.lock()
    }
}

impl<H: HostMemory> From<Heap<H>> for SharedHeap<H> {
    fn from(heap: Heap<H>) -> Self {
        Self::new(heap)
    }
}
