//! Stop-the-world snapshot protocol.
//!
//! The order of operations is fixed:
//!
//! 1. On platforms with the loader lock hazard, enter from inside a module iteration callback.
//! 2. Acquire the allocator lock, then the thread registry lock.
//! 3. Stop the world.
//! 4. While stopped, walk every chunk into a fresh [`SiteAggregator`] and do nothing else.
//! 5. After the world has resumed, release the thread registry lock, then the allocator lock.
//!
//! Locks are released on every exit path, including errors and panics.

use tracing::{debug, trace, warn};

#[cfg(all(target_os = "linux", not(miri)))]
use crate::pal::{self, BindingsFacade};
use crate::{Error, FreezeStrategy, HeapProfile, HeapRuntime, Result, SiteAggregator};

#[derive(Debug)]
pub(crate) struct SnapshotCoordinator<'r, R: ?Sized> {
    runtime: &'r R,
    strategy: FreezeStrategy,

    #[cfg(all(target_os = "linux", not(miri)))]
    bindings: BindingsFacade,
}

impl<'r, R> SnapshotCoordinator<'r, R>
where
    R: HeapRuntime + ?Sized,
{
    pub(crate) const fn new(runtime: &'r R, strategy: FreezeStrategy) -> Self {
        Self {
            runtime,
            strategy,
            #[cfg(all(target_os = "linux", not(miri)))]
            bindings: BindingsFacade::target(),
        }
    }

    #[cfg(all(test, target_os = "linux", not(miri)))]
    pub(crate) const fn with_bindings(runtime: &'r R, bindings: BindingsFacade) -> Self {
        Self {
            runtime,
            strategy: FreezeStrategy::ViaModuleIteration,
            bindings,
        }
    }

    /// Takes one consistent snapshot of the heap.
    pub(crate) fn capture(&self) -> Result<HeapProfile> {
        match self.strategy {
            FreezeStrategy::Direct => self.lock_and_stop_the_world(),
            #[cfg(all(target_os = "linux", not(miri)))]
            FreezeStrategy::ViaModuleIteration => self.capture_via_module_iteration(),
        }
    }

    #[cfg(all(target_os = "linux", not(miri)))]
    fn capture_via_module_iteration(&self) -> Result<HeapProfile> {
        let mut result = None;

        pal::with_loader_lock_held(&self.bindings, &mut || {
            result = Some(self.lock_and_stop_the_world());
        });

        result.unwrap_or_else(|| {
            warn!("module iteration did not invoke its callback, no heap snapshot taken");
            Err(Error::SnapshotNotTaken {
                stage: "module iteration",
            })
        })
    }

    fn lock_and_stop_the_world(&self) -> Result<HeapProfile> {
        let runtime = self.runtime;

        let walked = {
            runtime.lock_allocator();
            trace!("allocator lock acquired");
            let _allocator_lock = scopeguard::guard((), move |()| {
                runtime.unlock_allocator();
                trace!("allocator lock released");
            });

            runtime.lock_thread_registry();
            trace!("thread registry lock acquired");
            let _thread_registry_lock = scopeguard::guard((), move |()| {
                runtime.unlock_thread_registry();
                trace!("thread registry lock released");
            });

            let mut aggregator = SiteAggregator::new();
            let mut walked = false;

            debug!("stopping the world to walk heap chunks");

            // Only the walk itself may run while other threads are suspended. Anything that can
            // take a lock a suspended thread might hold, logging included, stays outside.
            runtime
                .stop_the_world(&mut || {
                    runtime.for_each_chunk(&mut |chunk| aggregator.observe(chunk));
                    walked = true;
                })
                .map_err(Error::StopTheWorld)?;

            debug!("world resumed");
            walked.then_some(aggregator)
        };

        let Some(aggregator) = walked else {
            warn!("stop the world did not invoke its callback, no heap snapshot taken");
            return Err(Error::SnapshotNotTaken {
                stage: "stop the world",
            });
        };

        let profile = aggregator.finalize();
        let totals = profile.totals();

        debug!(
            allocated_bytes = totals.allocated_bytes(),
            allocated_count = totals.allocated_count(),
            quarantined_bytes = totals.quarantined_bytes(),
            quarantined_count = totals.quarantined_count(),
            other_count = totals.other_count(),
            distinct_sites = profile.sites().len(),
            "heap snapshot complete"
        );

        Ok(profile)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tracing::subscriber::Interest;
    use tracing::{Event, Metadata, Subscriber, span};

    use super::*;
    use crate::fake::{FakeHeap, FakeRuntime, RuntimeEvent};

    fn scenario_heap() -> FakeHeap {
        FakeHeap::new()
            .allocated(100, 1)
            .allocated(700, 2)
            .allocated(200, 1)
            .quarantined(50)
            .other()
    }

    fn full_protocol(chunks: usize) -> Vec<RuntimeEvent> {
        vec![
            RuntimeEvent::AllocatorLocked,
            RuntimeEvent::ThreadRegistryLocked,
            RuntimeEvent::WorldStopped,
            RuntimeEvent::ChunksWalked { chunks },
            RuntimeEvent::WorldResumed,
            RuntimeEvent::ThreadRegistryUnlocked,
            RuntimeEvent::AllocatorUnlocked,
        ]
    }

    fn assert_unlocked(runtime: &FakeRuntime) {
        assert!(!runtime.is_allocator_locked());
        assert!(!runtime.is_thread_registry_locked());
    }

    #[test]
    fn direct_follows_lock_order() {
        let runtime = scenario_heap().build();

        let profile = SnapshotCoordinator::new(&runtime, FreezeStrategy::Direct)
            .capture()
            .unwrap();

        assert_eq!(runtime.events(), full_protocol(5));
        assert_unlocked(&runtime);

        assert_eq!(profile.totals().allocated_bytes(), 1000);
        assert_eq!(profile.totals().allocated_count(), 3);
        assert_eq!(profile.totals().quarantined_count(), 1);
        assert_eq!(profile.totals().other_count(), 1);
        assert_eq!(profile.sites().len(), 2);
    }

    #[test]
    fn empty_heap_is_still_a_snapshot() {
        let runtime = FakeHeap::new().build();

        let profile = SnapshotCoordinator::new(&runtime, FreezeStrategy::Direct)
            .capture()
            .unwrap();

        assert!(profile.is_empty());
        assert_eq!(runtime.events(), full_protocol(0));
    }

    #[test]
    fn stop_the_world_failure_releases_locks() {
        let runtime = scenario_heap().fail_stop_the_world().build();

        let result = SnapshotCoordinator::new(&runtime, FreezeStrategy::Direct).capture();

        assert!(matches!(result, Err(Error::StopTheWorld(_))));
        assert_eq!(
            runtime.events(),
            [
                RuntimeEvent::AllocatorLocked,
                RuntimeEvent::ThreadRegistryLocked,
                RuntimeEvent::ThreadRegistryUnlocked,
                RuntimeEvent::AllocatorUnlocked,
            ]
        );
        assert_unlocked(&runtime);
    }

    #[test]
    fn skipped_callback_is_not_a_snapshot() {
        let runtime = scenario_heap().skip_stop_the_world_callback().build();

        let result = SnapshotCoordinator::new(&runtime, FreezeStrategy::Direct).capture();

        assert!(matches!(
            result,
            Err(Error::SnapshotNotTaken {
                stage: "stop the world"
            })
        ));
        assert_unlocked(&runtime);
    }

    #[test]
    fn panic_during_walk_releases_locks() {
        let runtime = scenario_heap().panic_during_walk().build();

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            SnapshotCoordinator::new(&runtime, FreezeStrategy::Direct).capture()
        }));

        result.expect_err("a panic during the walk must propagate to the caller");
        assert_unlocked(&runtime);
        assert_eq!(
            runtime.events().last(),
            Some(&RuntimeEvent::AllocatorUnlocked)
        );
    }

    /// Subscriber that counts how often it is called while the world is stopped.
    struct StoppedWorldWatcher {
        runtime: Arc<FakeRuntime>,
        calls: Arc<AtomicUsize>,
        calls_while_stopped: Arc<AtomicUsize>,
    }

    impl StoppedWorldWatcher {
        fn observe(&self) {
            self.calls.fetch_add(1, Ordering::Relaxed);

            if self.runtime.is_world_stopped() {
                self.calls_while_stopped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    impl Subscriber for StoppedWorldWatcher {
        // Callsite registration may be driven by other threads, so it is not observed.
        fn register_callsite(&self, _metadata: &'static Metadata<'static>) -> Interest {
            Interest::always()
        }

        fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
            self.observe();
            true
        }

        fn new_span(&self, _span: &span::Attributes<'_>) -> span::Id {
            self.observe();
            span::Id::from_u64(1)
        }

        fn record(&self, _span: &span::Id, _values: &span::Record<'_>) {
            self.observe();
        }

        fn record_follows_from(&self, _span: &span::Id, _follows: &span::Id) {
            self.observe();
        }

        fn event(&self, _event: &Event<'_>) {
            self.observe();
        }

        fn enter(&self, _span: &span::Id) {
            self.observe();
        }

        fn exit(&self, _span: &span::Id) {
            self.observe();
        }
    }

    #[test]
    fn nothing_is_logged_while_world_is_stopped() {
        let runtime = Arc::new(scenario_heap().build());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_while_stopped = Arc::new(AtomicUsize::new(0));

        let watcher = StoppedWorldWatcher {
            runtime: Arc::clone(&runtime),
            calls: Arc::clone(&calls),
            calls_while_stopped: Arc::clone(&calls_while_stopped),
        };

        tracing::subscriber::with_default(watcher, || {
            SnapshotCoordinator::new(&*runtime, FreezeStrategy::Direct)
                .capture()
                .unwrap();
        });

        assert_eq!(runtime.events(), full_protocol(5));
        assert!(calls.load(Ordering::Relaxed) > 0);
        assert_eq!(calls_while_stopped.load(Ordering::Relaxed), 0);
    }

    #[cfg(all(target_os = "linux", not(miri)))]
    mod module_iteration {
        use std::ptr;

        use super::*;
        use crate::pal::MockBindings;

        #[test]
        fn locks_are_taken_inside_module_callback() {
            let runtime = Arc::new(scenario_heap().build());

            let mut bindings = MockBindings::new();
            bindings.expect_dl_iterate_phdr().times(1).returning({
                let runtime = Arc::clone(&runtime);

                move |callback, data| {
                    // Nothing may happen before the loader lock is held.
                    assert!(runtime.events().is_empty());

                    let callback = callback.expect("a callback is always provided");
                    // SAFETY: The callback ignores module info; `data` is passed through as is.
                    let result = unsafe { callback(ptr::null_mut(), 0, data) };

                    // The whole protocol completes before the loader lock is released.
                    assert_eq!(runtime.events(), full_protocol(5));
                    result
                }
            });

            let profile =
                SnapshotCoordinator::with_bindings(&*runtime, BindingsFacade::from_mock(bindings))
                    .capture()
                    .unwrap();

            assert_eq!(profile.totals().allocated_bytes(), 1000);
            assert_unlocked(&runtime);
        }

        #[test]
        fn no_modules_is_not_a_snapshot() {
            let runtime = scenario_heap().build();

            let mut bindings = MockBindings::new();
            bindings
                .expect_dl_iterate_phdr()
                .times(1)
                .returning(|_, _| 0);

            let result =
                SnapshotCoordinator::with_bindings(&runtime, BindingsFacade::from_mock(bindings))
                    .capture();

            assert!(matches!(
                result,
                Err(Error::SnapshotNotTaken {
                    stage: "module iteration"
                })
            ));
            assert!(runtime.events().is_empty());
        }

        #[test]
        fn real_loader_completes_protocol() {
            let runtime = scenario_heap().build();

            let profile = SnapshotCoordinator::new(&runtime, FreezeStrategy::ViaModuleIteration)
                .capture()
                .unwrap();

            assert_eq!(profile.totals().total_count(), 5);
            assert_eq!(runtime.events(), full_protocol(5));
        }
    }
}
