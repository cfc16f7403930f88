//! A free-list heap with a conservative mark-and-sweep garbage collector.
//!
//! Blocks are carved from memory granted by a [`HostMemory`] and never
//! released explicitly. [`Heap::collect`] scans the supplied
//! [`RootProvider`] regions and every reachable block word by word, treating
//! each word as a possible pointer, and returns the rest to the free list.

mod block;
mod collect;
mod error;
mod free_list;
mod heap;
mod host;
mod roots;
mod scan;
mod shared;
mod system;
mod used_list;

pub use block::{BlockInfo, UNIT};
pub use error::{HeapError, InvariantViolation};
pub use heap::{CollectionStats, Heap, HeapSettings, HeapStats};
pub use host::{HostMemory, ReservedRegion, SystemMemory};
pub use roots::{RootProvider, RootRegion, RootSet};
pub use shared::SharedHeap;
pub use system::{OS_PAGE_SIZE, map_memory, unmap_memory};
