//! # tracescope-core
//!
//! **The data engine behind trace visualization.**
//!
//! `tracescope-core` ingests multi-buffer kernel trace files, normalizes
//! their records into a uniform entry representation, merges any number
//! of per-buffer streams into one globally time-ordered sequence,
//! applies a layered filtering model and persists the whole state as a
//! structured session document.
//!
//! ## Quick Start
//!
//! ```no_run
//! use tracescope_core::Context;
//!
//! let mut ctx = Context::new();
//!
//! // Open a trace file; every per-buffer stream gets a stable id.
//! let sd = ctx.open("trace.dat").unwrap();
//!
//! // Load and merge everything that is open.
//! let entries = ctx.load_all_entries().unwrap();
//! println!("{} entries from stream {}", entries.len(), sd);
//! ```
//!
//! ## Architecture
//!
//! Files → readout interfaces → streams → entries → merge → search
//!
//! Two extension points plug into the flow: *readout* interfaces teach
//! the engine new file formats, and *data-processing* interfaces hang
//! per-stream event hooks into the load path. Sessions round-trip
//! streams, filters, plugins and calibration through typed JSON
//! documents.

pub mod backends;
pub mod collection;
pub mod container;
pub mod context;
pub mod entry;
pub mod error;
pub mod filter;
pub mod hashid;
pub mod load;
pub mod plugin;
pub mod plugins;
pub mod readout;
pub mod registry;
pub mod search;
pub mod session;
pub mod stream;

pub use container::{DataContainer, DataFieldInt64};
pub use context::{Context, PluginRecord};
pub use entry::{
    EMPTY_BIN, EVENT_OVERFLOW, EVENT_VIEW_MASK, Entry, FILTERED_BIN,
    GRAPH_VIEW_MASK, PLUGIN_UNTOUCHED_MASK, TEXT_VIEW_MASK, convert_nano,
};
pub use error::{Error, Result};
pub use filter::FilterKind;
pub use hashid::HashIdSet;
pub use plugin::{
    PLUGIN_ENABLED, PLUGIN_FAILED, PLUGIN_LOADED, PluginAction, ProcessInterface,
    handle_all_plugins, handle_plugin,
};
pub use readout::{FieldFormat, ReadoutInterface, StreamInterface};
pub use search::{
    EntryMatch, EntryRequest, TimePos, find_entry_by_time, get_entry_back,
    get_entry_front, match_cpu, match_event_and_cpu, match_event_and_pid,
    match_event_id, match_pid,
};
pub use session::{ConfigDoc, ConfigFormat, export_session, import_session};
pub use stream::DataStream;

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
