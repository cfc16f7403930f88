//! Circular list of allocated blocks.

use crate::block::{BlockId, BlockTable, Membership};

/// Every block handed out by the allocator and not yet reclaimed.
///
/// Unordered. A fresh list starts as a single self-linked block and later
/// blocks are spliced in directly after the anchor.
#[derive(Debug, Default)]
pub struct UsedList {
    anchor: Option<BlockId>,
}

impl UsedList {
    pub fn new() -> Self {
        Self { anchor: None }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.anchor.is_none()
    }

    pub fn push(&mut self, table: &mut BlockTable, id: BlockId) {
        table[id].state = Membership::Used { marked: false };
        match self.anchor {
            None => {
                table[id].next = id;
                self.anchor = Some(id);
            }
            Some(anchor) => {
                table[id].next = table[anchor].next;
                table[anchor].next = id;
            }
        }
    }

    /// Members in list order, starting at the anchor.
    pub fn iter<'t>(&self, table: &'t BlockTable) -> impl Iterator<Item = BlockId> + 't {
        let anchor = self.anchor;
        let mut current = anchor;
        let mut steps = 0;
        std::iter::from_fn(move || {
            let id = current?;
            steps += 1;
            assert!(steps <= table.capacity(), "used list is corrupted");
            let next = table[id].next;
            current = if Some(next) == anchor { None } else { Some(next) };
            Some(id)
        })
    }

    /// Unlinks every member and returns them in list order.
    pub fn take_all(&mut self, table: &BlockTable) -> Vec<BlockId> {
        let members = self.iter(table).collect();
        self.anchor = None;
        members
    }

    /// Rebuilds the list from `members`, keeping their order. An empty
    /// slice leaves the list empty.
    pub fn relink(&mut self, table: &mut BlockTable, members: &[BlockId]) {
        debug_assert!(self.is_empty());
        let (Some(&first), Some(&last)) = (members.first(), members.last()) else {
            return;
        };
        for pair in members.windows(2) {
            table[pair[0]].next = pair[1];
        }
        table[last].next = first;
        self.anchor = Some(first);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::UNIT;

    fn used(table: &mut BlockTable, list: &mut UsedList, addr: usize) -> BlockId {
        let id = table.mint(addr, 2, Membership::Free).unwrap();
        list.push(table, id);
        id
    }

    #[test]
    fn first_block_links_to_itself() {
        let mut table = BlockTable::new();
        let mut list = UsedList::new();
        assert!(list.is_empty());

        let a = used(&mut table, &mut list, 0x1000);
        assert_eq!(table[a].next, a);
        assert_eq!(table[a].state, Membership::Used { marked: false });
        assert_eq!(list.iter(&table).collect::<Vec<_>>(), vec![a]);
    }

    #[test]
    fn later_blocks_follow_the_anchor() {
        let mut table = BlockTable::new();
        let mut list = UsedList::new();
        let a = used(&mut table, &mut list, 0x1000);
        let b = used(&mut table, &mut list, 0x2000);
        let c = used(&mut table, &mut list, 0x3000);

        assert_eq!(list.iter(&table).collect::<Vec<_>>(), vec![a, c, b]);
    }

    #[test]
    fn take_all_then_relink_survivors() {
        let mut table = BlockTable::new();
        let mut list = UsedList::new();
        let ids: Vec<_> = (0..4)
            .map(|i| used(&mut table, &mut list, 0x1000 + i * 4 * UNIT))
            .collect();

        let members = list.take_all(&table);
        assert!(list.is_empty());
        assert_eq!(members.len(), 4);

        let survivors = [ids[1], ids[3]];
        list.relink(&mut table, &survivors);
        assert_eq!(list.iter(&table).collect::<Vec<_>>(), survivors.to_vec());

        let members = list.take_all(&table);
        list.relink(&mut table, &[]);
        assert!(list.is_empty());
        assert_eq!(members.len(), 2);
        assert_eq!(list.iter(&table).count(), 0);
    }
}
