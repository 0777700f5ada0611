//! Interfaces to the runtime whose heap is being profiled.
//!
//! The allocator, the thread registry, the stop-the-world machinery and the stack store all
//! belong to the runtime embedding this package. They are consumed through the traits here and
//! bundled together by [`HeapRuntime`], which is implemented automatically for any type that
//! implements all of them.

use std::io;

use crate::{ChunkRecord, SiteId};

/// Walks the allocator's metadata.
pub trait ChunkEnumerator {
    /// Calls `visitor` once for every chunk known to the allocator.
    ///
    /// This is only called while the world is stopped and both registry locks are held, so the
    /// set of chunks cannot change during the walk. The order of chunks is up to the
    /// implementation.
    fn for_each_chunk(&self, visitor: &mut dyn FnMut(ChunkRecord));

    /// Whether the runtime was configured for verbose output.
    ///
    /// Reports printed by [`print_memory_profile()`][crate::print_memory_profile] append the
    /// accumulated statistics when this is set. The default implementation returns `false`.
    fn is_verbose(&self) -> bool {
        false
    }

    /// Writes the allocator's accumulated statistics, appended to verbose reports.
    ///
    /// The default implementation writes nothing.
    fn write_accumulated_stats(&self, _out: &mut dyn io::Write) -> io::Result<()> {
        Ok(())
    }
}

/// Suspends every other thread of the process.
pub trait WorldFreezer {
    /// Suspends all other threads at a safe point, calls `callback` exactly once and resumes the
    /// threads after it returns.
    ///
    /// The callback must never observe a partially suspended process. An error means the process
    /// could not be brought into a consistent state and the snapshot is abandoned.
    fn stop_the_world(&self, callback: &mut dyn FnMut()) -> io::Result<()>;
}

/// The two process-wide locks guarding allocator and thread state.
///
/// They are always acquired in the order allocator, then thread registry, and released in
/// reverse. Failure to acquire either lock is a broken process invariant; implementations are
/// expected to panic or abort rather than return.
pub trait RegistryLocks {
    /// Acquires the lock guarding the directory of live chunks and thread-local caches.
    ///
    /// The snapshot keeps allocating from the calling thread while this lock is held: the
    /// per-site statistics grow through the Rust global allocator during the heap walk. The
    /// profiled allocator must therefore not serve the calling thread's Rust allocations, or it
    /// must serve them without taking this lock.
    fn lock_allocator(&self);

    /// Releases the lock acquired by [`lock_allocator()`][Self::lock_allocator].
    fn unlock_allocator(&self);

    /// Acquires the lock guarding the set of live threads.
    fn lock_thread_registry(&self);

    /// Releases the lock acquired by [`lock_thread_registry()`][Self::lock_thread_registry].
    fn unlock_thread_registry(&self);
}

/// Resolves allocation sites to human-readable call stacks.
#[cfg_attr(test, mockall::automock)]
pub trait SymbolStore {
    /// Renders the call stack captured for `site`, one frame per line.
    fn render_stack(&self, site: SiteId) -> String;
}

/// Everything this package needs from the runtime whose heap is profiled.
///
/// Implemented automatically for types that implement all the collaborator traits.
///
/// The heap being profiled must not be the one backing the Rust global allocator of the thread
/// that takes the snapshot, unless that allocator can serve requests while
/// [`lock_allocator()`][RegistryLocks::lock_allocator] is held. Per-site statistics are
/// collected in ordinary `Vec` and `HashMap` storage while the world is stopped.
pub trait HeapRuntime:
    ChunkEnumerator + WorldFreezer + RegistryLocks + SymbolStore + Send + Sync
{
}

impl<T> HeapRuntime for T where
    T: ChunkEnumerator + WorldFreezer + RegistryLocks + SymbolStore + Send + Sync + ?Sized
{
}
