//! Built-in data-processing plugins.

pub mod sched;
