mod bindings;
pub(crate) use bindings::*;

mod modules;
pub(crate) use modules::*;
