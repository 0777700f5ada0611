#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! On-demand reports of a running program's live heap, ranked by allocation site.
//!
//! A report answers "what is holding on to memory right now?". It summarizes the whole heap
//! (bytes and chunks that are allocated, quarantined or otherwise in use) and lists the call
//! stacks responsible for the most live bytes, largest first.
//!
//! The package does not own an allocator. The runtime whose heap is profiled provides its
//! allocator metadata, thread suspension and stack store through the traits bundled by
//! [`HeapRuntime`]. What this package adds is the part that is easy to get wrong:
//!
//! - [`MemoryProfiler`] takes a consistent snapshot by suspending every other thread while the
//!   heap is walked, acquiring the runtime's registry locks in a fixed order and, where the
//!   platform requires it, entering from inside a loaded module iteration callback so the
//!   dynamic loader lock cannot deadlock the suspension. See [`FreezeStrategy`].
//! - [`SiteAggregator`] folds the walked chunks into whole-heap [`SnapshotTotals`] and
//!   per-site [`AllocationSite`] statistics.
//! - [`HeapProfile::write_report()`] ranks the sites and writes the report.
//!
//! This package is read-only with respect to the heap and keeps no state between reports.
//!
//! # Printing a report
//!
//! The runtime installs itself once, after which any code can ask for a report on standard
//! error. Without an installed runtime, [`print_memory_profile()`] does nothing.
//!
//! ```
//! use memory_profile::fake::FakeHeap;
//! use memory_profile::{install_runtime, print_memory_profile};
//!
//! // A real runtime would implement the collaborator traits over its own allocator.
//! let runtime = Box::leak(Box::new(
//!     FakeHeap::new()
//!         .allocated(700, 1)
//!         .allocated(300, 2)
//!         .build(),
//! ));
//!
//! install_runtime(runtime).unwrap();
//!
//! // Sites holding the first 90% of live bytes, at most 10 of them.
//! print_memory_profile(90, 10);
//! ```
//!
//! # Report format
//!
//! ```text
//! Live Heap Allocations: 1000 bytes in 4 chunks; quarantined: 50 bytes in 1 chunks; 2 other chunks; total chunks: 7; showing top 100% (at most 10 unique contexts)
//! 700 byte(s) (70%) in 1 allocation(s)
//!     #0 0x4a6f2d in load_index src/index.rs:41
//! 300 byte(s) (30%) in 3 allocation(s)
//!     #0 0x4a1b07 in parse_config src/config.rs:12
//! ```
//!
//! Percentages are of all allocated bytes, including allocations whose site is unknown, and are
//! truncated towards zero. Sites with equal sizes are listed by ascending [`SiteId`].
//!
//! # Logging
//!
//! The snapshot protocol emits `tracing` events. It logs at `debug` level just before the world
//! is stopped, once it has resumed, and when the snapshot is complete (with the totals as fields).
//! Lock transitions are logged at `trace` level. A runtime primitive that skips its callback is
//! logged at `warn` level. Nothing is logged while other threads are suspended, as a suspended
//! thread may hold a lock the subscriber needs. No subscriber is installed by this package.

mod aggregator;
mod chunk;
mod coordinator;
mod error;
mod options;
mod pal;
mod profiler;
mod report;
mod runtime;
mod strategy;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

pub use aggregator::*;
pub use chunk::*;
pub use error::*;
pub use options::*;
pub use profiler::*;
pub use report::*;
pub use runtime::*;
pub use strategy::*;

#[cfg(any(test, feature = "test-util"))]
pub(crate) const ERR_POISONED_LOCK: &str =
    "encountered poisoned lock - program validity cannot be guaranteed";
