use std::any::Any;
use std::ffi::{c_int, c_void};
use std::panic::{self, AssertUnwindSafe};

use tracing::trace;

use crate::pal::linux::{Bindings, BindingsFacade};

struct IterationState<'a> {
    body: &'a mut dyn FnMut(),
    invoked: bool,
    panic_payload: Option<Box<dyn Any + Send>>,
}

/// Runs `body` from inside the first callback of `dl_iterate_phdr()`.
///
/// While the callback runs, the current thread holds the dynamic loader lock. Suspending other
/// threads from here means none of them can be frozen while holding that lock, so symbolization
/// done by the stop-the-world machinery cannot deadlock against a suspended thread.
///
/// `body` runs at most once; it does not run at all if the loader reports no modules. A panic
/// in `body` is carried across the FFI boundary and resumed once the loader has returned.
pub(crate) fn with_loader_lock_held(bindings: &BindingsFacade, body: &mut dyn FnMut()) {
    let mut state = IterationState {
        body,
        invoked: false,
        panic_payload: None,
    };

    trace!("iterating loaded modules to acquire the loader lock");

    // The return value is whatever our callback last returned; it carries no information.
    bindings.dl_iterate_phdr(Some(first_module_callback), (&raw mut state).cast());

    if let Some(payload) = state.panic_payload {
        panic::resume_unwind(payload);
    }
}

unsafe extern "C" fn first_module_callback(
    _info: *mut libc::dl_phdr_info,
    _size: libc::size_t,
    data: *mut c_void,
) -> c_int {
    // SAFETY: `data` is the `IterationState` owned by `with_loader_lock_held()`, which outlives
    // the `dl_iterate_phdr()` call and is not otherwise accessed while the call is in progress.
    let state = unsafe { &mut *data.cast::<IterationState<'_>>() };

    if !state.invoked {
        state.invoked = true;

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| (state.body)())) {
            state.panic_payload = Some(payload);
        }
    }

    // Non-zero stops the iteration after the first module.
    1
}
