//! Free-list heap with a conservative mark-and-sweep collector.
//!
//! Memory is obtained from a [`HostMemory`] in page sized chunks and carved
//! into blocks. Free blocks sit on an address-ordered free list that merges
//! physical neighbours; handed out blocks sit on the used list until a
//! collection finds no word in the roots or in a reachable block that points
//! into them. There is no explicit free.

use std::ptr::{self, NonNull};

use log::{debug, warn};

use crate::{
    HeapError, InvariantViolation,
    block::{BlockId, BlockInfo, BlockTable, Membership, UNIT},
    free_list::FreeList,
    host::{HostMemory, SystemMemory},
    used_list::UsedList,
};

// ── Heap settings ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HeapSettings {
    /// Minimum number of bytes requested from the host per growth step.
    /// Must be a multiple of [`UNIT`] and hold at least two units.
    pub page_size: usize,
    /// Pages requested eagerly by the constructor. Zero defers the first
    /// request to the first allocation.
    pub initial_pages: usize,
    /// Upper bound on the total bytes requested from the host.
    pub max_heap_size: Option<usize>,
}

impl Default for HeapSettings {
    fn default() -> Self {
        Self {
            page_size: 4096,
            initial_pages: 1,
            max_heap_size: None,
        }
    }
}

impl HeapSettings {
    #[inline]
    fn validate(&self) -> Result<(), &'static str> {
        if self.page_size == 0 {
            return Err("page_size must be > 0");
        }
        if !self.page_size.is_multiple_of(UNIT) {
            return Err("page_size must be a multiple of the block unit");
        }
        if self.page_size < 2 * UNIT {
            return Err("page_size must hold at least two units");
        }
        if let Some(limit) = self.max_heap_size {
            if limit < self.page_size {
                return Err("max_heap_size must allow at least one page");
            }
            if self.initial_pages.saturating_mul(self.page_size) > limit {
                return Err("initial_pages exceed max_heap_size");
            }
        }
        Ok(())
    }

    #[inline]
    pub fn page_units(&self) -> usize {
        self.page_size / UNIT
    }
}

// ── Statistics ────────────────────────────────────────────────────────

/// Counters of one collection cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CollectionStats {
    /// Root words inspected.
    pub root_words: usize,
    /// Blocks found reachable.
    pub marked: usize,
    /// Blocks left on the used list.
    pub survivors: usize,
    pub reclaimed_blocks: usize,
    pub reclaimed_units: usize,
}

impl CollectionStats {
    #[inline]
    pub fn reclaimed_bytes(&self) -> usize {
        self.reclaimed_units * UNIT
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Grants received from the host.
    pub chunks: usize,
    pub bytes_granted: usize,
    pub collections: usize,
    pub last_collection: CollectionStats,
}

// ── Heap ──────────────────────────────────────────────────────────────

/// A single heap instance. All list state is owned here, so independent
/// heaps never interfere.
#[derive(Debug)]
pub struct Heap<H: HostMemory = SystemMemory> {
    pub(crate) settings: HeapSettings,
    pub(crate) host: H,
    pub(crate) blocks: BlockTable,
    pub(crate) free: FreeList,
    pub(crate) used: UsedList,
    pub(crate) stats: HeapStats,
}

impl Heap<SystemMemory> {
    /// Heap backed by anonymous memory mappings.
    pub fn new(settings: HeapSettings) -> Result<Self, HeapError> {
        Self::with_host(settings, SystemMemory::new())
    }
}

impl<H: HostMemory> Heap<H> {
    pub fn with_host(settings: HeapSettings, host: H) -> Result<Self, HeapError> {
        settings.validate().map_err(HeapError::InvalidSettings)?;
        let mut heap = Self {
            settings,
            host,
            blocks: BlockTable::new(),
            free: FreeList::new(),
            used: UsedList::new(),
            stats: HeapStats::default(),
        };
        for _ in 0..heap.settings.initial_pages {
            heap.grow(heap.settings.page_units())?;
        }
        Ok(heap)
    }

    #[inline]
    pub fn settings(&self) -> &HeapSettings {
        &self.settings
    }

    #[inline]
    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    #[inline]
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Allocates at least `size` bytes and returns a pointer to them.
    ///
    /// The memory is not zeroed and is aligned to [`UNIT`]. It stays valid
    /// until a collection finds no pointer into it.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        let oom = HeapError::OutOfMemory { requested: size };
        let units = units_for(size).ok_or(oom)?;

        let id = loop {
            if let Some(id) = self.free.take(&mut self.blocks, units) {
                break id;
            }
            self.grow(units).map_err(|_| oom)?;
        };
        self.used.push(&mut self.blocks, id);

        let payload = ptr::with_exposed_provenance_mut::<u8>(self.blocks[id].payload());
        // SAFETY: payloads start one unit past a block address inside a
        // non-null host grant
        Ok(unsafe { NonNull::new_unchecked(payload) })
    }

    /// Requests `max(min_units, page)` units from the host and adds them to
    /// the free list, coalescing with a free block that ends where the new
    /// memory starts.
    fn grow(&mut self, min_units: usize) -> Result<(), HeapError> {
        let units = min_units.max(self.settings.page_units());
        let bytes = units
            .checked_mul(UNIT)
            .ok_or(HeapError::OutOfMemory { requested: usize::MAX })?;
        let oom = HeapError::OutOfMemory { requested: bytes };

        if let Some(limit) = self.settings.max_heap_size {
            if self.stats.bytes_granted.saturating_add(bytes) > limit {
                warn!(
                    "heap limit of {limit} bytes reached, refusing to grow by {bytes} bytes"
                );
                return Err(oom);
            }
        }

        if !self.blocks.has_room() {
            warn!("block table is full, refusing to grow by {bytes} bytes");
            return Err(oom);
        }

        let Some(base) = self.host.request_pages(bytes) else {
            warn!(
                "host refused {bytes} bytes after granting {} bytes",
                self.stats.bytes_granted
            );
            return Err(oom);
        };
        let base = base.as_ptr();
        assert!(
            base.addr().is_multiple_of(UNIT),
            "host granted misaligned memory at {base:p}"
        );

        let addr = base.expose_provenance();
        let id = self.blocks.mint(addr, units, Membership::Free).ok_or(oom)?;
        self.free.insert(&mut self.blocks, id);

        self.stats.chunks += 1;
        self.stats.bytes_granted += bytes;
        debug!(
            "arena grew by {bytes} bytes at {addr:#x}, {} bytes in {} chunks",
            self.stats.bytes_granted, self.stats.chunks
        );
        Ok(())
    }

    // ── Introspection ────────────────────────────────────────────────

    /// Free blocks in address order.
    pub fn free_blocks(&self) -> Vec<BlockInfo> {
        self.free
            .iter(&self.blocks)
            .map(|id| BlockInfo::from(&self.blocks[id]))
            .collect()
    }

    /// Used blocks in list order.
    pub fn used_blocks(&self) -> Vec<BlockInfo> {
        self.used
            .iter(&self.blocks)
            .map(|id| BlockInfo::from(&self.blocks[id]))
            .collect()
    }

    /// Bytes held by used blocks, headers included.
    pub fn used_bytes(&self) -> usize {
        self.used
            .iter(&self.blocks)
            .map(|id| self.blocks[id].units * UNIT)
            .sum()
    }

    /// The used block a word holding `ptr` would keep alive, if any.
    pub fn block_of(&self, ptr: *const u8) -> Option<BlockInfo> {
        let word = ptr.addr();
        self.used
            .iter(&self.blocks)
            .map(|id| &self.blocks[id])
            .find(|block| points_into(block.addr, block.units, word))
            .map(BlockInfo::from)
    }

    /// Checks the structural invariants of both lists and the arena
    /// accounting, reporting the first violation found.
    pub fn verify(&self) -> Result<(), InvariantViolation> {
        let fail = |msg: String| Err(InvariantViolation(msg));

        let mut owned: Vec<(BlockId, bool)> = Vec::new();
        let mut previous: Option<BlockInfo> = None;
        for id in self.free.iter(&self.blocks) {
            let block = &self.blocks[id];
            if block.state != Membership::Free {
                return fail(format!("{id:?} on the free list is {:?}", block.state));
            }
            if block.units == 0 {
                return fail(format!("free block {id:?} is empty"));
            }
            let info = BlockInfo::from(block);
            if let Some(prev) = previous {
                if prev.addr >= info.addr {
                    return fail(format!(
                        "free list out of order at {:#x} -> {:#x}",
                        prev.addr, info.addr
                    ));
                }
                if prev.end() == info.addr {
                    return fail(format!(
                        "free blocks at {:#x} and {:#x} are adjacent",
                        prev.addr, info.addr
                    ));
                }
            }
            previous = Some(info);
            owned.push((id, true));
        }

        for id in self.used.iter(&self.blocks) {
            match self.blocks[id].state {
                Membership::Used { marked: false } => owned.push((id, false)),
                state => return fail(format!("{id:?} on the used list is {state:?}")),
            }
        }

        owned.sort_unstable_by_key(|(id, _)| *id);
        if let Some(pair) = owned.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            return fail(format!("{:?} is owned by both lists", pair[0].0));
        }
        let live = self.blocks.live().count();
        if live != owned.len() {
            return fail(format!(
                "{} blocks are live but {} are on a list",
                live,
                owned.len()
            ));
        }

        let mut spans: Vec<BlockInfo> = self.blocks.live().map(|(_, b)| b.into()).collect();
        spans.sort_unstable_by_key(|info| info.addr);
        if let Some(pair) = spans.windows(2).find(|pair| pair[0].end() > pair[1].addr) {
            return fail(format!(
                "blocks at {:#x} and {:#x} overlap",
                pair[0].addr, pair[1].addr
            ));
        }
        let accounted: usize = spans.iter().map(BlockInfo::bytes).sum();
        if accounted != self.stats.bytes_granted {
            return fail(format!(
                "blocks cover {accounted} bytes but {} were granted",
                self.stats.bytes_granted
            ));
        }
        Ok(())
    }
}

/// Units needed for a `size` byte payload plus its header.
#[inline]
pub(crate) fn units_for(size: usize) -> Option<usize> {
    Some(size.checked_add(UNIT - 1)? / UNIT + 1)
}

/// Whether `word` lands in the block at `addr` when read as a pointer.
///
/// The range starts past the header and runs `units` whole units, so it
/// also covers a pointer one past the end of the payload, which is the only
/// pointer a zero-sized allocation has.
#[inline]
pub(crate) fn points_into(addr: usize, units: usize, word: usize) -> bool {
    let start = addr + UNIT;
    word >= start && word < start + units * UNIT
}
