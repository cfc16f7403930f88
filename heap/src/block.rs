//! Block metadata table.
//!
//! Every block of the arena, free or used, is described by one [`Block`]
//! entry in a [`BlockTable`]. Lists link blocks by [`BlockId`] instead of by
//! address, so list surgery never touches the arena memory itself. The first
//! unit of each block stays reserved in memory as its header, which keeps
//! the unit accounting identical to a header-prefixed layout.

use std::{
    mem,
    ops::{Index, IndexMut},
};

/// Size of one allocation unit in bytes. A block header occupies exactly one
/// unit and block sizes are counted in units, header included.
pub const UNIT: usize = 2 * mem::size_of::<usize>();

/// Index of a block in the [`BlockTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);

impl BlockId {
    /// Zero-unit anchor of the free list, always at address 0.
    pub const SENTINEL: BlockId = BlockId(0);

    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Which list owns a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Free,
    Used { marked: bool },
    /// Absorbed by a neighbour during coalescing; the slot is up for reuse.
    Retired,
}

#[derive(Debug, Clone, Copy)]
pub struct Block {
    pub addr: usize,
    pub units: usize,
    pub next: BlockId,
    pub state: Membership,
}

impl Block {
    /// First address past the block.
    #[inline]
    pub fn end(&self) -> usize {
        self.addr + self.units * UNIT
    }

    /// First payload byte, directly after the header unit.
    #[inline]
    pub fn payload(&self) -> usize {
        self.addr + UNIT
    }

    #[cfg(test)]
    pub fn is_marked(&self) -> bool {
        matches!(self.state, Membership::Used { marked: true })
    }
}

/// Public snapshot of a block, as reported by heap introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockInfo {
    /// Address of the block header.
    pub addr: usize,
    /// Size in units, header included.
    pub units: usize,
}

impl BlockInfo {
    #[inline]
    pub fn bytes(&self) -> usize {
        self.units * UNIT
    }

    #[inline]
    pub fn payload(&self) -> usize {
        self.addr + UNIT
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.addr + self.bytes()
    }
}

impl From<&Block> for BlockInfo {
    fn from(block: &Block) -> Self {
        Self {
            addr: block.addr,
            units: block.units,
        }
    }
}

/// Most slots a table can hold, sentinel included. Every index fits a `u32`.
const MAX_SLOTS: usize = u32::MAX as usize;

#[derive(Debug)]
pub struct BlockTable {
    slots: Vec<Block>,
    vacant: Vec<BlockId>,
    limit: usize,
}

impl Default for BlockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockTable {
    pub fn new() -> Self {
        let sentinel = Block {
            addr: 0,
            units: 0,
            next: BlockId::SENTINEL,
            state: Membership::Free,
        };
        Self {
            slots: vec![sentinel],
            vacant: Vec::new(),
            limit: MAX_SLOTS,
        }
    }

    #[cfg(test)]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            ..Self::new()
        }
    }

    /// Whether [`BlockTable::mint`] would succeed.
    #[inline]
    pub fn has_room(&self) -> bool {
        !self.vacant.is_empty() || self.slots.len() < self.limit
    }

    /// Registers a block, reusing a retired slot when one is available.
    /// Returns `None` once every slot is taken.
    pub fn mint(&mut self, addr: usize, units: usize, state: Membership) -> Option<BlockId> {
        let block = Block {
            addr,
            units,
            next: BlockId::SENTINEL,
            state,
        };
        if let Some(id) = self.vacant.pop() {
            self.slots[id.index()] = block;
            return Some(id);
        }
        if self.slots.len() >= self.limit {
            return None;
        }
        let index = BlockId(self.slots.len() as u32);
        self.slots.push(block);
        Some(index)
    }

    pub fn retire(&mut self, id: BlockId) {
        debug_assert_ne!(id, BlockId::SENTINEL, "the sentinel is never retired");
        let block = &mut self[id];
        block.state = Membership::Retired;
        block.units = 0;
        self.vacant.push(id);
    }

    /// Number of slots, retired ones included. Any list walk longer than
    /// this has run into a cycle that does not pass its anchor.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn live(&self) -> impl Iterator<Item = (BlockId, &Block)> {
        self.slots
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, block)| block.state != Membership::Retired)
            .map(|(index, block)| (BlockId(index as u32), block))
    }
}

impl Index<BlockId> for BlockTable {
    type Output = Block;

    #[inline]
    fn index(&self, id: BlockId) -> &Block {
        &self.slots[id.index()]
    }
}

impl IndexMut<BlockId> for BlockTable {
    #[inline]
    fn index_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.slots[id.index()]
    }
}
