use std::ptr::NonNull;

use heap::{BlockInfo, Heap, HeapSettings, ReservedRegion, RootRegion, RootSet, UNIT};
use proptest::prelude::*;

const PAGE: usize = 4096;

fn reserved_heap(capacity: usize) -> Heap<ReservedRegion> {
    let region = ReservedRegion::new(capacity).unwrap();
    Heap::with_host(HeapSettings::default(), region).unwrap()
}

fn addr(ptr: NonNull<u8>) -> usize {
    ptr.as_ptr().expose_provenance()
}

fn collect(heap: &mut Heap<ReservedRegion>, words: &[usize]) {
    heap.collect(&mut RootSet::new().with(RootRegion::from_words(words)));
    heap.verify().unwrap();
}

fn block(heap: &Heap<ReservedRegion>, ptr: NonNull<u8>) -> BlockInfo {
    heap.block_of(ptr.as_ptr()).unwrap()
}

fn free_block_covering(heap: &Heap<ReservedRegion>, span: BlockInfo) -> Option<BlockInfo> {
    heap.free_blocks()
        .into_iter()
        .find(|free| free.addr <= span.addr && span.end() <= free.end())
}

#[test]
fn three_allocations_outgrow_a_single_page() {
    let mut heap = reserved_heap(4 * PAGE);
    assert_eq!(heap.stats().bytes_granted, PAGE);

    let a = heap.allocate(16).unwrap();
    assert_eq!(heap.stats().chunks, 1);
    let b = heap.allocate(4080).unwrap();
    let c = heap.allocate(32).unwrap();

    let requested: usize = [16, 4080, 32].iter().map(|size| size + UNIT).sum();
    assert!(requested > PAGE);
    assert_eq!(heap.stats().chunks, 2);
    assert_eq!(heap.stats().bytes_granted, 2 * PAGE);

    let blocks = [block(&heap, a), block(&heap, b), block(&heap, c)];
    assert_eq!(blocks.map(|b| b.units), [2, 256, 3]);
    heap.verify().unwrap();
}

#[test]
fn only_the_rooted_block_survives() {
    let mut heap = reserved_heap(4 * PAGE);
    let first = heap.allocate(16).unwrap();
    let second = heap.allocate(16).unwrap();
    let third = heap.allocate(16).unwrap();
    let spans = [block(&heap, first), block(&heap, second), block(&heap, third)];

    collect(&mut heap, &[addr(second)]);

    assert_eq!(heap.used_blocks(), vec![spans[1]]);
    assert!(free_block_covering(&heap, spans[1]).is_none());

    // the third block sits right above the untouched remainder and merges
    // into it; the first is fenced off by the survivor
    let remainder = free_block_covering(&heap, spans[2]).unwrap();
    assert!(remainder.units > spans[2].units);
    assert_eq!(free_block_covering(&heap, spans[0]), Some(spans[0]));

    let free_units: usize = heap.free_blocks().iter().map(|b| b.units).sum();
    assert_eq!(free_units, PAGE / UNIT - spans[1].units);
}

#[test]
fn unreferenced_block_returns_to_the_free_list() {
    let mut heap = reserved_heap(4 * PAGE);
    let ptr = heap.allocate(100).unwrap();
    let span = block(&heap, ptr);

    collect(&mut heap, &[]);

    assert!(heap.used_blocks().is_empty());
    assert!(free_block_covering(&heap, span).is_some());
    assert_eq!(
        heap.free_blocks(),
        vec![BlockInfo { addr: span.addr - (PAGE - span.bytes()), units: PAGE / UNIT }]
    );
}

#[repr(C)]
struct Globals {
    generation: usize,
    current: *mut u8,
}

#[test]
fn pointer_held_in_a_struct_field_is_a_root() {
    let mut heap = reserved_heap(4 * PAGE);
    let kept = heap.allocate(64).unwrap();
    let dropped = heap.allocate(64).unwrap();
    let kept_span = block(&heap, kept);
    let globals = Globals {
        generation: 1,
        current: kept.as_ptr(),
    };

    heap.collect(&mut RootSet::new().with(RootRegion::from_ref(&globals)));
    heap.verify().unwrap();

    assert_eq!(heap.used_blocks(), vec![kept_span]);
    assert!(heap.block_of(dropped.as_ptr()).is_none());
    assert_eq!(heap.stats().last_collection.root_words, 2);
    assert_eq!(globals.generation, 1);
    assert_eq!(heap.block_of(globals.current), Some(kept_span));
}

#[test]
fn adjacent_dead_blocks_lose_no_header() {
    let mut heap = reserved_heap(4 * PAGE);
    // two blocks of 128 units fill the page exactly
    let a = heap.allocate(PAGE / 2 - UNIT).unwrap();
    let b = heap.allocate(PAGE / 2 - UNIT).unwrap();
    let (a, b) = (block(&heap, a), block(&heap, b));
    assert!(heap.free_blocks().is_empty());
    assert_eq!(b.end(), a.addr);

    collect(&mut heap, &[]);

    let free = heap.free_blocks();
    assert_eq!(free.len(), 1);
    assert_eq!(free[0].units, a.units + b.units);
    assert_eq!(free[0].addr, b.addr);
}

#[test]
fn linked_structure_survives_repeated_collections() {
    let mut heap = reserved_heap(64 * PAGE);
    let mut head = 0usize;
    for value in 0..50usize {
        let node = heap.allocate(2 * size_of::<usize>()).unwrap();
        let words = node.as_ptr().cast::<usize>();
        // SAFETY: two words were allocated
        unsafe {
            words.write(head);
            words.add(1).write(value * 2 + 1);
        }
        head = addr(node);
        heap.allocate(48).unwrap();
    }

    for _ in 0..3 {
        collect(&mut heap, &[head]);
        assert_eq!(heap.used_blocks().len(), 50);
    }

    let mut cursor = head;
    let mut seen = Vec::new();
    while cursor != 0 {
        let words = std::ptr::with_exposed_provenance::<usize>(cursor);
        // SAFETY: every node is still alive and two words long
        unsafe {
            seen.push(words.add(1).read());
            cursor = words.read();
        }
    }
    let expected: Vec<usize> = (0..50).rev().map(|v| v * 2 + 1).collect();
    assert_eq!(seen, expected);
}

#[test]
fn constant_working_set_stops_growing() {
    let mut heap = reserved_heap(256 * PAGE);
    let live: Vec<usize> = (0..32)
        .map(|i| addr(heap.allocate(24 + 8 * (i % 5)).unwrap()))
        .collect();

    let mut granted = Vec::new();
    for _ in 0..40 {
        for i in 0..200 {
            heap.allocate(16 + (i * 7) % 160).unwrap();
        }
        collect(&mut heap, &live);
        assert_eq!(heap.used_blocks().len(), live.len());
        granted.push(heap.stats().bytes_granted);
    }
    assert!(granted[39] <= granted[0] + PAGE);
    assert_eq!(granted[39], granted[20]);
}

#[test]
fn out_of_memory_leaves_heap_usable() {
    let mut heap = reserved_heap(3 * PAGE);
    let keep = heap.allocate(PAGE).unwrap();
    assert!(heap.allocate(PAGE).is_err());
    heap.verify().unwrap();

    collect(&mut heap, &[addr(keep)]);
    assert!(heap.allocate(PAGE / 2).is_ok());
    heap.verify().unwrap();
}

#[derive(Debug, Clone)]
enum Op {
    Allocate(usize),
    Collect(Vec<bool>),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0usize..300).prop_map(Op::Allocate),
        1 => prop::collection::vec(any::<bool>(), 0..64).prop_map(Op::Collect),
    ]
}

proptest! {
    #[test]
    fn rooted_blocks_are_never_reclaimed(ops in prop::collection::vec(op(), 1..120)) {
        let mut heap = reserved_heap(1024 * PAGE);
        // (payload address, tag written into the first word)
        let mut live: Vec<(usize, usize)> = Vec::new();
        let mut next_tag = 1usize;

        for op in ops {
            match op {
                Op::Allocate(size) => {
                    let ptr = heap.allocate(size.max(size_of::<usize>())).unwrap();
                    // SAFETY: at least one word was allocated
                    unsafe { ptr.as_ptr().cast::<usize>().write(next_tag) };
                    live.push((addr(ptr), next_tag));
                    next_tag += 2;
                }
                Op::Collect(keep) => {
                    let mut index = 0;
                    live.retain(|_| {
                        let kept = keep.get(index).copied().unwrap_or(false);
                        index += 1;
                        kept
                    });
                    let roots: Vec<usize> = live.iter().map(|&(addr, _)| addr).collect();
                    heap.collect(&mut RootSet::new().with(RootRegion::from_words(&roots)));
                    prop_assert_eq!(heap.used_blocks().len(), live.len());
                }
            }
            prop_assert!(heap.verify().is_ok());
        }

        for &(payload, tag) in &live {
            let block = heap.block_of(std::ptr::with_exposed_provenance(payload));
            prop_assert_eq!(block.map(|b| b.payload()), Some(payload));
            // SAFETY: the block is still on the used list
            let stored = unsafe { std::ptr::with_exposed_provenance::<usize>(payload).read() };
            prop_assert_eq!(stored, tag);
        }
    }
}
