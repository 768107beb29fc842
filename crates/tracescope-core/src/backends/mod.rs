//! Built-in readout backends.

pub mod bintrace;

use std::sync::Arc;

use crate::readout::ReadoutInterface;

/// All readouts compiled into the engine. Probed after the registered
/// inputs when a file is opened.
pub fn builtin_inputs() -> Vec<Arc<dyn ReadoutInterface>> {
    vec![Arc::new(bintrace::BintraceInput)]
}
