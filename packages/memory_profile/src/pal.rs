//! Platform Abstraction Layer (PAL). This is private API.
//!
//! Only Linux needs platform bindings: there, the snapshot is entered from inside a module
//! iteration callback so the dynamic loader lock is held before any thread is suspended. Other
//! platforms stop the world directly and need nothing from this layer.

#[cfg(all(target_os = "linux", not(miri)))]
mod linux;
#[cfg(all(target_os = "linux", not(miri)))]
pub(crate) use linux::*;
