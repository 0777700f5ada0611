//! Prints a live heap report for an in-memory runtime.
//!
//! A real runtime implements the collaborator traits over its own allocator metadata and
//! installs itself once at startup. Here the fake runtime from the `test-util` feature stands
//! in for it.
//!
//! Run with: `cargo run --example memory_profile_basic --features test-util`

use memory_profile::fake::FakeHeap;
use memory_profile::{ChunkRecord, install_runtime, print_memory_profile};

fn main() {
    let runtime = Box::leak(Box::new(
        FakeHeap::new()
            .allocated(4096, 1)
            .allocated(4096, 1)
            .allocated(1024, 2)
            .allocated(512, 3)
            .allocated(64, 0)
            .quarantined(256)
            .chunk(ChunkRecord::Other)
            .stack(
                1,
                "    #0 0x4a6f2d in load_index src/index.rs:41\n    #1 0x4a0c11 in main src/main.rs:9",
            )
            .stack(2, "    #0 0x4a1b07 in parse_config src/config.rs:12")
            .stack(3, "    #0 0x4a2e90 in open_log src/log.rs:77")
            .build(),
    ));

    // Reports go to standard error. Without an installed runtime, this does nothing.
    print_memory_profile(100, 10);

    install_runtime(runtime).expect("no runtime was installed before");

    eprintln!("Every site:");
    print_memory_profile(100, usize::MAX);

    eprintln!();
    eprintln!("Sites holding the first half of live bytes:");
    print_memory_profile(50, usize::MAX);

    eprintln!();
    eprintln!("Only the largest site:");
    print_memory_profile(100, 1);
}
