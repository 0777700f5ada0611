//! Fake heap runtime for testing.
//!
//! [`FakeRuntime`] implements every collaborator trait over an in-memory list of chunks and
//! records what the snapshot protocol did to it, so tests can check lock order and that the heap
//! was only walked while the world was stopped.
//!
//! Only available when the `test-util` feature is enabled.
//!
//! # Example
//!
//! ```
//! use memory_profile::fake::{FakeHeap, RuntimeEvent};
//! use memory_profile::{FreezeStrategy, MemoryProfiler, ProfileOptions};
//!
//! let runtime = FakeHeap::new()
//!     .allocated(300, 1)
//!     .allocated(700, 2)
//!     .quarantined(50)
//!     .stack(1, "    #0 parse_config")
//!     .stack(2, "    #0 load_index")
//!     .build();
//!
//! let profiler = MemoryProfiler::new(&runtime).strategy(FreezeStrategy::Direct);
//!
//! let mut out = Vec::new();
//! profiler
//!     .write_report(&ProfileOptions::default(), &mut out)
//!     .unwrap();
//!
//! let report = String::from_utf8(out).unwrap();
//! assert!(report.starts_with("Live Heap Allocations: 1000 bytes in 2 chunks"));
//! assert_eq!(runtime.events().first(), Some(&RuntimeEvent::AllocatorLocked));
//! ```

use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use foldhash::{HashMap, HashMapExt};

use crate::{
    ChunkEnumerator, ChunkRecord, ERR_POISONED_LOCK, RegistryLocks, SiteId, SymbolStore,
    WorldFreezer,
};

/// Something the snapshot protocol did to a [`FakeRuntime`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum RuntimeEvent {
    /// The allocator lock was acquired.
    AllocatorLocked,

    /// The allocator lock was released.
    AllocatorUnlocked,

    /// The thread registry lock was acquired.
    ThreadRegistryLocked,

    /// The thread registry lock was released.
    ThreadRegistryUnlocked,

    /// All other threads were suspended.
    WorldStopped,

    /// Every chunk of the heap was handed to the snapshot.
    ChunksWalked {
        /// Number of chunks visited.
        chunks: usize,
    },

    /// Suspended threads were resumed.
    WorldResumed,

    /// The accumulated allocator statistics were requested.
    AccumulatedStatsWritten,
}

/// Builder for a [`FakeRuntime`].
///
/// Chunks are reported by the runtime in the order they are added.
#[derive(Clone, Debug, Default)]
pub struct FakeHeap {
    chunks: Vec<ChunkRecord>,
    stacks: HashMap<SiteId, String>,
    accumulated_stats: Option<String>,
    verbose: bool,
    fail_stop_the_world: bool,
    skip_stop_the_world_callback: bool,
    panic_during_walk: bool,
}

impl FakeHeap {
    /// Creates a builder for a runtime with an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self {
            chunks: Vec::new(),
            stacks: HashMap::new(),
            accumulated_stats: None,
            verbose: false,
            fail_stop_the_world: false,
            skip_stop_the_world_callback: false,
            panic_during_walk: false,
        }
    }

    /// Adds a chunk in any state.
    #[must_use]
    pub fn chunk(mut self, record: ChunkRecord) -> Self {
        self.chunks.push(record);
        self
    }

    /// Adds a live chunk of `size` bytes allocated from `site` (0 for an unknown site).
    #[must_use]
    pub fn allocated(self, size: u64, site: u32) -> Self {
        self.chunk(ChunkRecord::Allocated {
            size,
            site: SiteId::new(site),
        })
    }

    /// Adds a freed chunk of `size` bytes that is held in quarantine.
    #[must_use]
    pub fn quarantined(self, size: u64) -> Self {
        self.chunk(ChunkRecord::Quarantined { size })
    }

    /// Adds a chunk that is neither allocated nor quarantined.
    #[must_use]
    pub fn other(self) -> Self {
        self.chunk(ChunkRecord::Other)
    }

    /// Sets the call stack text rendered for `site`.
    #[must_use]
    pub fn stack(mut self, site: u32, text: impl Into<String>) -> Self {
        self.stacks.insert(SiteId::new(site), text.into());
        self
    }

    /// Sets the allocator statistics written at the end of verbose reports.
    #[must_use]
    pub fn accumulated_stats(self, text: impl Into<String>) -> Self {
        Self {
            accumulated_stats: Some(text.into()),
            ..self
        }
    }

    /// Marks the runtime as configured for verbose output.
    #[must_use]
    pub fn verbose(self) -> Self {
        Self {
            verbose: true,
            ..self
        }
    }

    /// Makes stopping the world fail with an I/O error.
    #[must_use]
    pub fn fail_stop_the_world(self) -> Self {
        Self {
            fail_stop_the_world: true,
            ..self
        }
    }

    /// Makes stopping the world report success without invoking the callback.
    #[must_use]
    pub fn skip_stop_the_world_callback(self) -> Self {
        Self {
            skip_stop_the_world_callback: true,
            ..self
        }
    }

    /// Makes the chunk walk panic after visiting the chunks.
    #[must_use]
    pub fn panic_during_walk(self) -> Self {
        Self {
            panic_during_walk: true,
            ..self
        }
    }

    /// Creates the runtime.
    #[must_use]
    pub fn build(self) -> FakeRuntime {
        FakeRuntime {
            heap: self,
            events: Mutex::new(Vec::new()),
            allocator_locked: AtomicBool::new(false),
            thread_registry_locked: AtomicBool::new(false),
            world_stopped: AtomicBool::new(false),
        }
    }
}

/// In-memory heap runtime that records the snapshot protocol.
///
/// Created via [`FakeHeap::build()`]. Misuse of the protocol, such as taking a lock twice or
/// walking chunks without stopping the world, panics.
#[derive(Debug)]
pub struct FakeRuntime {
    heap: FakeHeap,
    events: Mutex<Vec<RuntimeEvent>>,
    allocator_locked: AtomicBool,
    thread_registry_locked: AtomicBool,
    world_stopped: AtomicBool,
}

impl FakeRuntime {
    /// Everything the snapshot protocol did so far, in order.
    #[must_use]
    pub fn events(&self) -> Vec<RuntimeEvent> {
        self.events.lock().expect(ERR_POISONED_LOCK).clone()
    }

    /// Whether the allocator lock is currently held.
    #[must_use]
    pub fn is_allocator_locked(&self) -> bool {
        self.allocator_locked.load(Ordering::Acquire)
    }

    /// Whether the thread registry lock is currently held.
    #[must_use]
    pub fn is_thread_registry_locked(&self) -> bool {
        self.thread_registry_locked.load(Ordering::Acquire)
    }

    /// Whether other threads are currently suspended.
    #[must_use]
    pub fn is_world_stopped(&self) -> bool {
        self.world_stopped.load(Ordering::Acquire)
    }

    fn record(&self, event: RuntimeEvent) {
        self.events.lock().expect(ERR_POISONED_LOCK).push(event);
    }
}

impl RegistryLocks for FakeRuntime {
    fn lock_allocator(&self) {
        assert!(
            !self.allocator_locked.swap(true, Ordering::AcqRel),
            "allocator lock acquired twice"
        );
        self.record(RuntimeEvent::AllocatorLocked);
    }

    fn unlock_allocator(&self) {
        assert!(
            self.allocator_locked.swap(false, Ordering::AcqRel),
            "allocator lock released without being held"
        );
        self.record(RuntimeEvent::AllocatorUnlocked);
    }

    fn lock_thread_registry(&self) {
        assert!(
            !self.thread_registry_locked.swap(true, Ordering::AcqRel),
            "thread registry lock acquired twice"
        );
        self.record(RuntimeEvent::ThreadRegistryLocked);
    }

    fn unlock_thread_registry(&self) {
        assert!(
            self.thread_registry_locked.swap(false, Ordering::AcqRel),
            "thread registry lock released without being held"
        );
        self.record(RuntimeEvent::ThreadRegistryUnlocked);
    }
}

impl WorldFreezer for FakeRuntime {
    fn stop_the_world(&self, callback: &mut dyn FnMut()) -> io::Result<()> {
        if self.heap.fail_stop_the_world {
            return Err(io::Error::other("fake runtime refused to stop the world"));
        }

        self.world_stopped.store(true, Ordering::Release);
        self.record(RuntimeEvent::WorldStopped);

        if !self.heap.skip_stop_the_world_callback {
            callback();
        }

        self.world_stopped.store(false, Ordering::Release);
        self.record(RuntimeEvent::WorldResumed);

        Ok(())
    }
}

impl ChunkEnumerator for FakeRuntime {
    fn for_each_chunk(&self, visitor: &mut dyn FnMut(ChunkRecord)) {
        assert!(
            self.world_stopped.load(Ordering::Acquire),
            "heap walked without stopping the world"
        );
        assert!(
            self.is_allocator_locked() && self.is_thread_registry_locked(),
            "heap walked without holding the registry locks"
        );

        for chunk in &self.heap.chunks {
            visitor(*chunk);
        }

        assert!(
            !self.heap.panic_during_walk,
            "fake runtime failed during the heap walk"
        );

        self.record(RuntimeEvent::ChunksWalked {
            chunks: self.heap.chunks.len(),
        });
    }

    fn is_verbose(&self) -> bool {
        self.heap.verbose
    }

    fn write_accumulated_stats(&self, out: &mut dyn io::Write) -> io::Result<()> {
        self.record(RuntimeEvent::AccumulatedStatsWritten);

        if let Some(stats) = &self.heap.accumulated_stats {
            writeln!(out, "{stats}")?;
        }

        Ok(())
    }
}

impl SymbolStore for FakeRuntime {
    fn render_stack(&self, site: SiteId) -> String {
        self.heap
            .stacks
            .get(&site)
            .cloned()
            .unwrap_or_else(|| format!("    <no stack captured for {site}>"))
    }
}
