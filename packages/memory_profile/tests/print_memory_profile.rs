//! Process-wide entry point with an installed runtime.
//!
//! The installed runtime is global state, so everything that depends on it lives in one test.

use memory_profile::fake::{FakeHeap, FakeRuntime, RuntimeEvent};
use memory_profile::{Error, install_runtime, is_runtime_installed, print_memory_profile};

#[test]
fn installed_runtime_is_profiled_on_demand() {
    let runtime: &'static FakeRuntime = Box::leak(Box::new(
        FakeHeap::new()
            .allocated(700, 1)
            .allocated(100, 2)
            .allocated(100, 2)
            .allocated(100, 2)
            .quarantined(50)
            .other()
            .stack(1, "    #0 load_index")
            .stack(2, "    #0 parse_config")
            .accumulated_stats("Stats: 1M malloced (0M for red zones) by 4 calls")
            .verbose()
            .build(),
    ));

    install_runtime(runtime).unwrap();
    assert!(is_runtime_installed());

    print_memory_profile(100, 10);
    print_memory_profile(50, 1);

    // Each call took its own snapshot, locking and unlocking around it.
    let walks = runtime
        .events()
        .iter()
        .filter(|event| matches!(event, RuntimeEvent::ChunksWalked { chunks: 6 }))
        .count();
    assert_eq!(walks, 2);

    // The runtime is verbose, so every report ended with its accumulated statistics.
    let stats_written = runtime
        .events()
        .iter()
        .filter(|event| matches!(event, RuntimeEvent::AccumulatedStatsWritten))
        .count();
    assert_eq!(stats_written, 2);
    assert!(!runtime.is_allocator_locked());
    assert!(!runtime.is_thread_registry_locked());

    let second: &'static FakeRuntime = Box::leak(Box::new(FakeHeap::new().build()));
    assert!(matches!(
        install_runtime(second),
        Err(Error::RuntimeAlreadyInstalled)
    ));
}
