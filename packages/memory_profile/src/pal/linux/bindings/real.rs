use std::ffi::{c_int, c_void};
use std::fmt::Debug;

use crate::pal::linux::{Bindings, PhdrCallback};

/// FFI bindings that target the real operating system that the build is targeting.
///
/// You would only use different bindings in PAL unit tests that need to use mock bindings.
/// Even then, whenever possible, unit tests should use real bindings for maximum realism.
#[derive(Debug, Default)]
pub(crate) struct BuildTargetBindings;

#[cfg_attr(coverage_nightly, coverage(off))] // Exercised via the real module iteration tests.
impl Bindings for BuildTargetBindings {
    fn dl_iterate_phdr(&self, callback: Option<PhdrCallback>, data: *mut c_void) -> c_int {
        // SAFETY: The callback contract (including what `data` points to) is upheld by the
        // caller, who owns both. The loader only passes `data` through to the callback.
        unsafe { libc::dl_iterate_phdr(callback, data) }
    }
}
