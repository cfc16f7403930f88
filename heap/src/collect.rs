//! Conservative mark and sweep.
//!
//! Every aligned word of the roots, and then of every reachable payload, is
//! treated as a possible pointer. A word that lands inside a used block
//! marks it; marked blocks are scanned once each until nothing new is
//! found. The sweep then hands every unmarked block to the free list.

use std::collections::VecDeque;

use log::{debug, trace};

use crate::{
    CollectionStats, Heap, RootProvider,
    block::{BlockId, BlockTable, Membership, UNIT},
    heap::points_into,
    host::HostMemory,
    scan,
    used_list::UsedList,
};

/// Used blocks sorted by address, built once per cycle for pointer lookup.
struct UsedIndex {
    spans: Vec<(usize, usize, BlockId)>,
}

impl UsedIndex {
    fn new(table: &BlockTable, used: &UsedList) -> Self {
        let mut spans: Vec<_> = used
            .iter(table)
            .map(|id| (table[id].addr, table[id].units, id))
            .collect();
        spans.sort_unstable_by_key(|&(addr, _, _)| addr);
        Self { spans }
    }

    /// The block whose conservative range contains `word`. Ranges of
    /// distinct blocks never overlap, so the only candidate is the highest
    /// block whose range starts at or below `word`.
    fn find(&self, word: usize) -> Option<BlockId> {
        let below = self
            .spans
            .partition_point(|&(addr, _, _)| addr + UNIT <= word);
        let &(addr, units, id) = self.spans[..below].last()?;
        points_into(addr, units, word).then_some(id)
    }
}

/// Sets the mark on `id`. Returns whether it was newly marked.
fn set_mark(table: &mut BlockTable, id: BlockId) -> bool {
    match &mut table[id].state {
        Membership::Used { marked } if !*marked => {
            *marked = true;
            true
        }
        _ => false,
    }
}

impl<H: HostMemory> Heap<H> {
    /// Reclaims every used block not reachable from `roots`.
    ///
    /// Runs the full cycle before returning. A heap without used blocks is
    /// left untouched.
    pub fn collect(&mut self, roots: &mut impl RootProvider) {
        if self.used.is_empty() {
            debug!("collection skipped, no used blocks");
            return;
        }

        let mut cycle = CollectionStats::default();
        self.mark(roots, &mut cycle);
        self.sweep(&mut cycle);

        self.stats.collections += 1;
        self.stats.last_collection = cycle;
        debug!(
            "collection {} done: {} marked, {} reclaimed ({} bytes), {} root words",
            self.stats.collections,
            cycle.marked,
            cycle.reclaimed_blocks,
            cycle.reclaimed_bytes(),
            cycle.root_words
        );
    }

    fn mark(&mut self, roots: &mut impl RootProvider, cycle: &mut CollectionStats) {
        let index = UsedIndex::new(&self.blocks, &self.used);
        let blocks = &mut self.blocks;
        let mut pending = VecDeque::new();

        roots.visit_roots(&mut |region| {
            scan::root_words(region, |word| {
                cycle.root_words += 1;
                if let Some(id) = index.find(word) {
                    if set_mark(blocks, id) {
                        pending.push_back(id);
                    }
                }
            });
        });

        while let Some(current) = pending.pop_front() {
            cycle.marked += 1;
            let block = blocks[current];
            // SAFETY: used blocks lie in memory granted by our host, which
            // outlives this call
            unsafe {
                scan::payload_words(&block, |word| {
                    if let Some(id) = index.find(word) {
                        if id != current && set_mark(blocks, id) {
                            pending.push_back(id);
                        }
                    }
                });
            }
        }
    }

    fn sweep(&mut self, cycle: &mut CollectionStats) {
        let members = self.used.take_all(&self.blocks);
        let mut survivors = Vec::with_capacity(members.len());

        for id in members {
            match self.blocks[id].state {
                Membership::Used { marked: true } => {
                    self.blocks[id].state = Membership::Used { marked: false };
                    survivors.push(id);
                }
                Membership::Used { marked: false } => {
                    let block = &self.blocks[id];
                    trace!("reclaiming {} units at {:#x}", block.units, block.addr);
                    cycle.reclaimed_blocks += 1;
                    cycle.reclaimed_units += block.units;
                    self.free.insert(&mut self.blocks, id);
                }
                state => panic!("{id:?} on the used list is {state:?}"),
            }
        }

        cycle.survivors = survivors.len();
        self.used.relink(&mut self.blocks, &survivors);
    }
}
