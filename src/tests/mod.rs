#[cfg(loom)]
mod loom_stack;
#[cfg(loom)]
pub(crate) mod util;
