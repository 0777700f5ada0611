use std::fmt;
use std::io;
use std::sync::OnceLock;

use crate::coordinator::SnapshotCoordinator;
use crate::{
    Error, FreezeStrategy, HeapProfile, HeapRuntime, ProfileOptions, RenderOutcome, Result,
};

/// The runtime used by [`print_memory_profile()`], if the embedding runtime provided one.
static INSTALLED_RUNTIME: OnceLock<InstalledRuntime> = OnceLock::new();

struct InstalledRuntime {
    runtime: &'static dyn HeapRuntime,
    strategy: FreezeStrategy,
}

/// Takes heap snapshots of a runtime and reports on them.
///
/// Each call to [`capture()`][Self::capture] or [`write_report()`][Self::write_report] takes a
/// fresh, consistent snapshot: every other thread is suspended while the heap is walked, so the
/// snapshot reflects a single point in time. Nothing is kept between calls.
///
/// # Example
///
/// ```
/// use memory_profile::fake::FakeHeap;
/// use memory_profile::MemoryProfiler;
///
/// let runtime = FakeHeap::new()
///     .allocated(128, 1)
///     .allocated(64, 0)
///     .build();
///
/// let profile = MemoryProfiler::new(&runtime).capture().unwrap();
///
/// assert_eq!(profile.totals().allocated_bytes(), 192);
/// assert_eq!(profile.sites().len(), 1);
/// ```
pub struct MemoryProfiler<'r> {
    runtime: &'r dyn HeapRuntime,
    strategy: FreezeStrategy,
}

impl<'r> MemoryProfiler<'r> {
    /// Creates a profiler for `runtime`, entering snapshots with
    /// [`FreezeStrategy::for_build_target()`].
    #[must_use]
    pub fn new(runtime: &'r dyn HeapRuntime) -> Self {
        Self {
            runtime,
            strategy: FreezeStrategy::for_build_target(),
        }
    }

    /// Overrides how snapshots enter the stopped-world state.
    #[must_use]
    pub fn strategy(self, strategy: FreezeStrategy) -> Self {
        Self { strategy, ..self }
    }

    /// Takes one snapshot of the runtime's heap.
    ///
    /// # Errors
    ///
    /// Returns an error if the world could not be stopped or a runtime primitive skipped the
    /// snapshot callback. In either case no partial profile is produced. Treat this as fatal:
    /// the runtime's allocator and thread state can no longer be relied upon.
    pub fn capture(&self) -> Result<HeapProfile> {
        SnapshotCoordinator::new(self.runtime, self.strategy).capture()
    }

    /// Takes one snapshot and writes the report on it to `out`.
    ///
    /// See [`HeapProfile::write_report()`] for the report format. If `options` request verbose
    /// output, the runtime's accumulated allocator statistics are written after the report.
    ///
    /// The snapshot is taken while the caller holds `out`. If obtaining the writer takes a lock
    /// that threads holding the runtime's registry locks may wait for, such as the lock of
    /// [`io::stderr()`], use [`write_report_with()`][Self::write_report_with] instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot could not be taken (see [`capture()`][Self::capture])
    /// or writing to `out` fails.
    pub fn write_report<W>(&self, options: &ProfileOptions, out: &mut W) -> Result<RenderOutcome>
    where
        W: io::Write,
    {
        let profile = self.capture()?;
        self.render(&profile, options, out)
    }

    /// Takes one snapshot and writes the report on it to the writer returned by `open_output`.
    ///
    /// `open_output` is only called once the snapshot is complete, the world has resumed and
    /// the runtime's registry locks have been released. If the snapshot fails, it is not called.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot could not be taken (see [`capture()`][Self::capture])
    /// or writing the report fails.
    pub fn write_report_with<F, W>(
        &self,
        options: &ProfileOptions,
        open_output: F,
    ) -> Result<RenderOutcome>
    where
        F: FnOnce() -> W,
        W: io::Write,
    {
        let profile = self.capture()?;
        self.render(&profile, options, &mut open_output())
    }

    fn render<W>(
        &self,
        profile: &HeapProfile,
        options: &ProfileOptions,
        out: &mut W,
    ) -> Result<RenderOutcome>
    where
        W: io::Write,
    {
        let outcome = profile.write_report(options, self.runtime, out)?;

        if options.verbose() {
            self.runtime.write_accumulated_stats(out)?;
        }

        Ok(outcome)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))] // No API contract to test.
impl fmt::Debug for MemoryProfiler<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryProfiler")
            .field("runtime", &"<runtime>")
            .field("strategy", &self.strategy)
            .finish()
    }
}

/// Installs the runtime used by [`print_memory_profile()`].
///
/// Snapshots use [`FreezeStrategy::for_build_target()`]. A runtime can be installed only once
/// per process and stays installed for the rest of it.
///
/// # Errors
///
/// Returns [`Error::RuntimeAlreadyInstalled`] if a runtime was installed before.
pub fn install_runtime(runtime: &'static dyn HeapRuntime) -> Result<()> {
    install_runtime_with_strategy(runtime, FreezeStrategy::for_build_target())
}

/// Installs the runtime used by [`print_memory_profile()`], with an explicit freeze strategy.
///
/// # Errors
///
/// Returns [`Error::RuntimeAlreadyInstalled`] if a runtime was installed before.
pub fn install_runtime_with_strategy(
    runtime: &'static dyn HeapRuntime,
    strategy: FreezeStrategy,
) -> Result<()> {
    if INSTALLED_RUNTIME
        .set(InstalledRuntime { runtime, strategy })
        .is_err()
    {
        return Err(Error::RuntimeAlreadyInstalled);
    }

    Ok(())
}

/// Whether a runtime has been installed, making [`print_memory_profile()`] functional.
#[must_use]
pub fn is_runtime_installed() -> bool {
    INSTALLED_RUNTIME.get().is_some()
}

/// Prints a report of live heap usage to standard error.
///
/// The report lists the allocation sites holding the most live bytes, largest first. Listing
/// stops once the listed sites account for more than `top_percent` percent of allocated bytes,
/// or after `max_number_of_contexts` sites, whichever comes first.
///
/// If no runtime has been installed via [`install_runtime()`], this does nothing. If the
/// installed runtime [is verbose][crate::ChunkEnumerator::is_verbose], its accumulated
/// allocator statistics are printed after the report.
///
/// Standard error is locked only after the snapshot is complete and the runtime's registry
/// locks are released.
///
/// # Panics
///
/// Panics if the snapshot cannot be taken or the report cannot be written. A failed snapshot
/// leaves the runtime's allocator and thread state in an unknown condition, so there is no
/// meaningful way to continue.
#[cfg_attr(test, mutants::skip)] // Too difficult to test stderr output reliably - manually tested.
pub fn print_memory_profile(top_percent: u64, max_number_of_contexts: usize) {
    let Some(installed) = INSTALLED_RUNTIME.get() else {
        return;
    };

    if let Err(error) =
        installed.write_report(top_percent, max_number_of_contexts, || io::stderr().lock())
    {
        panic!("memory profile could not be produced: {error}");
    }
}

impl InstalledRuntime {
    fn write_report<F, W>(
        &self,
        top_percent: u64,
        max_number_of_contexts: usize,
        open_output: F,
    ) -> Result<RenderOutcome>
    where
        F: FnOnce() -> W,
        W: io::Write,
    {
        let options = ProfileOptions::builder()
            .top_percent(top_percent)
            .max_contexts(max_number_of_contexts)
            .verbose(self.runtime.is_verbose())
            .build();

        MemoryProfiler::new(self.runtime)
            .strategy(self.strategy)
            .write_report_with(&options, open_output)
    }
}
