use clap::Parser as ClapParser;
use std::process;

use heap::{BlockInfo, Heap, HeapError, HeapSettings, RootRegion, RootSet, UNIT};
use log::info;

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Bytes requested from the OS per growth step
    #[arg(long, default_value_t = 4096)]
    page_size: usize,

    /// Pages mapped when the heap is created
    #[arg(long, default_value_t = 1)]
    initial_pages: usize,

    /// Upper bound on bytes mapped from the OS
    #[arg(long)]
    max_heap_size: Option<usize>,

    /// Allocation/collection rounds to run
    #[arg(long, default_value_t = 10)]
    cycles: usize,

    /// Objects kept reachable through the root set
    #[arg(long, default_value_t = 64)]
    live: usize,

    /// Unreachable objects allocated per round
    #[arg(long, default_value_t = 1000)]
    garbage: usize,

    /// Payload size of every object in bytes
    #[arg(long, default_value_t = 48)]
    object_size: usize,

    /// Replay three allocations of 16, 4080 and 32 bytes and print the blocks
    #[arg(long, help = "Print block placement for a fixed allocation sequence")]
    walkthrough: bool,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let settings = HeapSettings {
        page_size: cli.page_size,
        initial_pages: cli.initial_pages,
        max_heap_size: cli.max_heap_size,
    };
    let mut heap = match Heap::new(settings) {
        Ok(heap) => heap,
        Err(err) => {
            eprintln!("Error creating heap: {}", err);
            process::exit(1);
        }
    };

    let result = if cli.walkthrough {
        walkthrough(&mut heap)
    } else {
        churn(&mut heap, &cli)
    };
    if let Err(err) = result {
        eprintln!("Error: {}", err);
        process::exit(1);
    }

    if let Err(violation) = heap.verify() {
        eprintln!("{}", violation);
        process::exit(2);
    }
}

fn print_block(label: &str, block: BlockInfo) {
    println!(
        "  {:<8} header {:#x}  payload {:#x}  {:>4} units ({} bytes)",
        label,
        block.addr,
        block.payload(),
        block.units,
        block.bytes()
    );
}

fn print_lists(heap: &Heap) {
    println!("used:");
    for block in heap.used_blocks() {
        print_block("", block);
    }
    println!("free:");
    for block in heap.free_blocks() {
        print_block("", block);
    }
    let stats = heap.stats();
    println!(
        "chunks {}  granted {} bytes  in use {} bytes",
        stats.chunks,
        stats.bytes_granted,
        heap.used_bytes()
    );
}

fn walkthrough(heap: &mut Heap) -> Result<(), HeapError> {
    println!("unit = {} bytes, page = {} bytes", UNIT, heap.settings().page_size);
    let mut payloads = Vec::new();
    for size in [16, 4080, 32] {
        let ptr = heap.allocate(size)?;
        println!("allocate({}):", size);
        if let Some(block) = heap.block_of(ptr.as_ptr()) {
            print_block("block", block);
        }
        payloads.push(ptr.as_ptr().expose_provenance());
    }
    print_lists(heap);

    println!("collect with only the second payload rooted:");
    let roots = [payloads[1]];
    heap.collect(&mut RootSet::new().with(RootRegion::from_words(&roots)));
    print_lists(heap);
    Ok(())
}

fn churn(heap: &mut Heap, cli: &Cli) -> Result<(), HeapError> {
    let size = cli.object_size.max(size_of::<usize>());
    let mut live = Vec::with_capacity(cli.live);
    for _ in 0..cli.live {
        live.push(heap.allocate(size)?.as_ptr().expose_provenance());
    }

    for round in 1..=cli.cycles {
        for _ in 0..cli.garbage {
            heap.allocate(size)?;
        }
        heap.collect(&mut RootSet::new().with(RootRegion::from_words(&live)));

        let stats = heap.stats();
        let cycle = stats.last_collection;
        info!("round {} finished", round);
        println!(
            "round {:>3}: marked {:>5}  reclaimed {:>6} blocks ({:>8} bytes)  granted {:>9} bytes in {} chunks",
            round,
            cycle.marked,
            cycle.reclaimed_blocks,
            cycle.reclaimed_bytes(),
            stats.bytes_granted,
            stats.chunks
        );
    }
    Ok(())
}
