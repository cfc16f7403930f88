//! Address-ordered circular free list with coalescing and a next-fit cursor.

use crate::block::{BlockId, BlockTable, Membership, UNIT};

/// Free blocks linked in ascending address order through the table.
///
/// The zero-unit sentinel at address 0 is always a member, so a walk can
/// wrap around without a null check and no real block ever coalesces with
/// it. `cursor` is the block the last search or insertion stopped at.
#[derive(Debug)]
pub struct FreeList {
    cursor: BlockId,
}

impl Default for FreeList {
    fn default() -> Self {
        Self::new()
    }
}

impl FreeList {
    pub fn new() -> Self {
        Self {
            cursor: BlockId::SENTINEL,
        }
    }

    #[inline]
    #[cfg(test)]
    pub fn cursor(&self) -> BlockId {
        self.cursor
    }

    /// Links `id` in at its address position and merges it with the
    /// physically adjacent successor, then predecessor. Leaves the cursor
    /// on the block preceding the insertion point.
    pub fn insert(&mut self, table: &mut BlockTable, id: BlockId) {
        table[id].state = Membership::Free;
        let addr = table[id].addr;

        let mut p = self.cursor;
        let mut steps = 0;
        loop {
            let here = table[p].addr;
            let there = table[table[p].next].addr;
            if addr > here && addr < there {
                break;
            }
            // p is the highest block: the new one goes past the end or
            // before the first block.
            if here >= there && (addr > here || addr < there) {
                break;
            }
            p = table[p].next;
            steps += 1;
            assert!(
                steps <= table.capacity(),
                "free list is corrupted: no slot for block at {addr:#x}"
            );
        }

        let next = table[p].next;
        if next != BlockId::SENTINEL && table[id].end() == table[next].addr {
            table[id].units += table[next].units;
            table[id].next = table[next].next;
            table.retire(next);
        } else {
            table[id].next = next;
        }

        if p != BlockId::SENTINEL && table[p].end() == addr {
            table[p].units += table[id].units;
            table[p].next = table[id].next;
            table.retire(id);
        } else {
            table[p].next = id;
        }

        self.cursor = p;
    }

    /// Next-fit search for a block of at least `units`, starting after the
    /// cursor and ending with the cursor itself.
    ///
    /// An exact fit is unlinked whole. A larger block keeps its address and
    /// shrinks; the returned block is carved off its tail. Either way the
    /// result is detached from the list and marked as an unmarked used
    /// block. `None` means a full lap found nothing. While the table has no
    /// slot for a tail, only exact fits are taken.
    pub fn take(&mut self, table: &mut BlockTable, units: usize) -> Option<BlockId> {
        debug_assert!(units > 0);
        let start = self.cursor;
        let mut prev = start;
        let mut steps = 0;
        loop {
            let p = table[prev].next;
            let size = table[p].units;
            if size == units {
                table[prev].next = table[p].next;
                table[p].state = Membership::Used { marked: false };
                self.cursor = prev;
                return Some(p);
            }
            if size > units {
                let tail = table[p].end() - units * UNIT;
                if let Some(id) = table.mint(tail, units, Membership::Used { marked: false }) {
                    table[p].units -= units;
                    self.cursor = prev;
                    return Some(id);
                }
            }
            if p == start {
                return None;
            }
            prev = p;
            steps += 1;
            assert!(steps <= table.capacity(), "free list is corrupted");
        }
    }

    /// Members in address order, sentinel excluded.
    pub fn iter<'t>(&self, table: &'t BlockTable) -> impl Iterator<Item = BlockId> + 't {
        let mut current = table[BlockId::SENTINEL].next;
        let mut steps = 0;
        std::iter::from_fn(move || {
            if current == BlockId::SENTINEL {
                return None;
            }
            steps += 1;
            assert!(steps <= table.capacity(), "free list is corrupted");
            let id = current;
            current = table[id].next;
            Some(id)
        })
    }
}
