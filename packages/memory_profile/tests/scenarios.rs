//! End-to-end reports on fake heaps, taken with the strategy the build target uses.

use memory_profile::fake::{FakeHeap, FakeRuntime, RuntimeEvent};
use memory_profile::{MemoryProfiler, ProfileOptions, RenderOutcome};

const X: u32 = 1;
const Y: u32 = 2;

/// Site X: 3 chunks totaling 300 bytes. Site Y: 1 chunk of 700 bytes.
fn scenario_a() -> FakeHeap {
    FakeHeap::new()
        .allocated(100, X)
        .allocated(700, Y)
        .allocated(150, X)
        .allocated(50, X)
        .stack(X, "    #0 x_frame\n")
        .stack(Y, "    #0 y_frame\n")
}

fn report(
    runtime: &FakeRuntime,
    top_percent: u64,
    max_contexts: usize,
) -> (RenderOutcome, String) {
    let options = ProfileOptions::builder()
        .top_percent(top_percent)
        .max_contexts(max_contexts)
        .build();

    let mut out = Vec::new();
    let outcome = MemoryProfiler::new(runtime)
        .write_report(&options, &mut out)
        .unwrap();

    (outcome, String::from_utf8(out).unwrap())
}

#[test]
fn scenario_a_ranks_by_bytes() {
    let runtime = scenario_a().build();

    let (outcome, text) = report(&runtime, 100, 10);

    assert_eq!(outcome, RenderOutcome::Rendered { sites_shown: 2 });
    assert_eq!(
        text.lines().collect::<Vec<_>>(),
        [
            "Live Heap Allocations: 1000 bytes in 4 chunks; quarantined: 0 bytes in 0 chunks; \
             0 other chunks; total chunks: 4; showing top 100% (at most 10 unique contexts)",
            "700 byte(s) (70%) in 1 allocation(s)",
            "    #0 y_frame",
            "300 byte(s) (30%) in 3 allocation(s)",
            "    #0 x_frame",
        ]
    );
}

#[test]
fn scenario_b_counts_every_chunk_state() {
    let runtime = scenario_a().quarantined(50).other().other().build();

    let (outcome, text) = report(&runtime, 100, 10);

    assert_eq!(outcome, RenderOutcome::Rendered { sites_shown: 2 });
    assert!(text.starts_with(
        "Live Heap Allocations: 1000 bytes in 4 chunks; quarantined: 50 bytes in 1 chunks; \
         2 other chunks; total chunks: 7;"
    ));
    assert!(text.contains("700 byte(s) (70%) in 1 allocation(s)"));
    assert!(text.contains("300 byte(s) (30%) in 3 allocation(s)"));
}

#[test]
fn scenario_c_top_percent_cuts_the_list() {
    let runtime = scenario_a().build();

    let (outcome, text) = report(&runtime, 50, 10);

    assert_eq!(outcome, RenderOutcome::Rendered { sites_shown: 1 });
    assert!(text.contains("y_frame"));
    assert!(!text.contains("x_frame"));
}

#[test]
fn scenario_d_max_contexts_cuts_the_list() {
    let runtime = scenario_a().build();

    let (outcome, text) = report(&runtime, 100, 1);

    assert_eq!(outcome, RenderOutcome::Rendered { sites_shown: 1 });
    assert!(text.contains("y_frame"));
    assert!(!text.contains("x_frame"));
}

#[test]
fn scenario_e_nothing_allocated_is_reported_not_aborted() {
    let runtime = FakeHeap::new().quarantined(64).other().build();

    let (outcome, text) = report(&runtime, 100, 10);

    assert_eq!(outcome, RenderOutcome::Empty);
    assert_eq!(
        text,
        "Live Heap Allocations: 0 bytes in 0 chunks; nothing to report (2 chunks observed)\n"
    );

    // The snapshot protocol still ran to completion.
    assert_eq!(runtime.events().last(), Some(&RuntimeEvent::AllocatorUnlocked));
}

#[test]
fn site_lines_never_exceed_max_contexts() {
    let mut heap = FakeHeap::new();
    for site in 1..=50_u32 {
        heap = heap.allocated(u64::from(site), site);
    }
    let runtime = heap.build();

    for max_contexts in [0, 1, 7, 50, 100] {
        let (outcome, _) = report(&runtime, 100, max_contexts);

        let RenderOutcome::Rendered { sites_shown } = outcome else {
            panic!("heap with allocations must render a report");
        };
        assert!(sites_shown <= max_contexts);
        assert_eq!(sites_shown, max_contexts.min(50));
    }
}
