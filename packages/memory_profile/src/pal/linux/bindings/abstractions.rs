#![cfg_attr(
    test,
    expect(
        clippy::struct_field_names,
        reason = "false positive from automock generated code"
    )
)]

use std::ffi::{c_int, c_void};
use std::fmt::Debug;

/// Signature of the per-module callback accepted by `dl_iterate_phdr()`.
pub(crate) type PhdrCallback =
    unsafe extern "C" fn(*mut libc::dl_phdr_info, libc::size_t, *mut c_void) -> c_int;

/// Bindings for FFI calls into external libraries (either provided by operating system or not).
///
/// All PAL FFI calls must go through this trait, enabling them to be mocked.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait Bindings: Debug + Send + Sync + 'static {
    // dl_iterate_phdr(), which holds the dynamic loader lock while calling `callback` once per
    // loaded module until the callback returns non-zero.
    fn dl_iterate_phdr(&self, callback: Option<PhdrCallback>, data: *mut c_void) -> c_int;
}
