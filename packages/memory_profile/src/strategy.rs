/// How a snapshot enters the stopped-world state.
///
/// The machinery that suspends threads may need to resolve symbols, which on some platforms
/// takes the dynamic loader lock. If a thread is suspended while holding that lock, the
/// snapshot deadlocks. Where this hazard exists, the snapshot is entered from inside a loaded
/// module iteration callback, so the current thread already owns the loader lock before any
/// other thread is suspended.
///
/// The strategy is chosen once, usually via [`FreezeStrategy::for_build_target()`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum FreezeStrategy {
    /// Acquire the registry locks and stop the world right away.
    Direct,

    /// Acquire the registry locks and stop the world from inside the first callback of
    /// `dl_iterate_phdr()`, while the dynamic loader lock is held.
    #[cfg(all(target_os = "linux", not(miri)))]
    ViaModuleIteration,
}

impl FreezeStrategy {
    /// The strategy that avoids the loader lock hazard on the platform the build targets.
    #[cfg(all(target_os = "linux", not(miri)))]
    #[must_use]
    pub const fn for_build_target() -> Self {
        Self::ViaModuleIteration
    }

    /// The strategy that avoids the loader lock hazard on the platform the build targets.
    #[cfg(not(all(target_os = "linux", not(miri))))]
    #[must_use]
    pub const fn for_build_target() -> Self {
        Self::Direct
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    #[cfg(all(target_os = "linux", not(miri)))]
    fn linux_enters_via_module_iteration() {
        assert_eq!(
            FreezeStrategy::for_build_target(),
            FreezeStrategy::ViaModuleIteration
        );
    }

    #[test]
    #[cfg(not(all(target_os = "linux", not(miri))))]
    fn other_platforms_freeze_directly() {
        assert_eq!(FreezeStrategy::for_build_target(), FreezeStrategy::Direct);
    }
}
