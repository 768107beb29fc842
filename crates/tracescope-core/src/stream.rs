//! One stream of trace data: a per-buffer view of a trace file.

use std::path::{Path, PathBuf};

use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::filter::{self, StreamFilters};
use crate::hashid::{HashIdSet, TASK_HASH_NBITS};
use crate::plugin::{DrawHandler, EventHandler, PluginAttachment};
use crate::readout::{
    DATA_FORMAT_SIZE, FieldFormat, INVALID_DATA_FORMAT, StreamInterface,
};

/// Non-printable name marking a stream whose buffer name is to be ignored
/// (the top-level buffer of its file).
pub const UNNAMED: &str = "\u{1b}";

/// Timestamp calibration function: transforms a timestamp in place, using
/// an array of stream-level constants.
pub type TimeCalibFn = fn(&mut i64, &[i64]);

/// The canonical calibration: shift by a constant offset in nanoseconds.
pub fn offset_calib(ts: &mut i64, argv: &[i64]) {
    *ts += argv[0];
}

/// A stream of trace data.
///
/// Created by the context when a file (or one buffer of a file) is opened;
/// mutated only through its interface and filters; slots in the registry
/// are reused after close.
pub struct DataStream {
    /// Stream identifier, stable until the stream is closed.
    pub stream_id: i16,

    /// Number of CPUs presented in this data stream.
    pub n_cpus: i32,

    /// Number of distinct event types presented in this data stream.
    pub n_events: i32,

    /// Process Id of the idle task.
    pub idle_pid: i32,

    /// Trace data file pathname.
    pub file: PathBuf,

    /// Buffer name. [`UNNAMED`] for the top-level buffer.
    pub name: String,

    /// Data format identifier of the readout that claimed this stream.
    pub data_format: String,

    /// Pids of all tasks observed while loading.
    pub tasks: HashIdSet,

    /// CPUs that produced no records.
    pub idle_cpus: HashIdSet,

    /// The six Id filters of this stream.
    pub filters: StreamFilters,

    /// System clock calibration function.
    pub calib: Option<TimeCalibFn>,

    /// Calibration constants consumed by `calib`.
    pub calib_array: Vec<i64>,

    /// Data-processing plugins attached to this stream.
    pub plugins: Vec<PluginAttachment>,

    /// Plugin-provided per-event actions, executed during load.
    pub event_handlers: Vec<EventHandler>,

    /// Plugin-provided draw actions. Stored only; invoked by the GUI
    /// collaborator.
    pub draw_handlers: Vec<DrawHandler>,

    /// The method table of the readout backend serving this stream.
    /// `None` until a readout claims the stream. Backend state is
    /// released when the boxed interface is dropped.
    pub interface: Option<Box<dyn StreamInterface>>,
}

impl DataStream {
    /// A fresh, unclaimed stream.
    pub fn new() -> Self {
        Self {
            stream_id: 0,
            n_cpus: 0,
            n_events: 0,
            idle_pid: 0,
            file: PathBuf::new(),
            name: String::from(UNNAMED),
            data_format: String::from(INVALID_DATA_FORMAT),
            tasks: HashIdSet::with_bits(TASK_HASH_NBITS),
            idle_cpus: HashIdSet::with_bits(TASK_HASH_NBITS),
            filters: StreamFilters::new(),
            calib: None,
            calib_array: Vec::new(),
            plugins: Vec::new(),
            event_handlers: Vec::new(),
            draw_handlers: Vec::new(),
            interface: None,
        }
    }

    /// Set the data format tag, truncated to [`DATA_FORMAT_SIZE`] bytes.
    pub fn set_data_format(&mut self, format: &str) {
        let end = format
            .char_indices()
            .take_while(|(i, c)| i + c.len_utf8() <= DATA_FORMAT_SIZE)
            .map(|(i, c)| i + c.len_utf8())
            .last()
            .unwrap_or(0);

        self.data_format = format[..end].to_string();
    }

    /// The attached interface, or a bad-handle error.
    pub fn interface(&self) -> Result<&dyn StreamInterface> {
        self.interface
            .as_deref()
            .ok_or(Error::BadHandle(self.stream_id))
    }

    /// Apply the stream's calibration to one entry, in place.
    pub fn calib_entry(&self, entry: &mut Entry) {
        if let Some(calib) = self.calib {
            calib(&mut entry.ts, &self.calib_array);
        }
    }

    /// Set the `visible` field of one entry according to this stream's Id
    /// filters, consuming bits selected by `filter_mask`.
    pub fn apply_filters(&self, filter_mask: u8, entry: &mut Entry) {
        filter::apply_filters(filter_mask, &self.filters, entry);
    }

    /// True if at least one Id filter of this stream is set.
    pub fn filter_is_set(&self) -> bool {
        self.filters.is_set()
    }

    /// True if this stream is the top-level buffer of its file.
    pub fn is_top(&self) -> bool {
        self.name == UNNAMED
    }

    /* Interface passthroughs. Every method is optional on the backend
     * side; absence surfaces as None. */

    /// Name of the entry's event.
    pub fn event_name(&self, entry: &Entry) -> Option<String> {
        self.interface.as_deref()?.get_event_name(self, entry)
    }

    /// Name of the entry's task.
    pub fn task(&self, entry: &Entry) -> Option<String> {
        self.interface.as_deref()?.get_task(self, entry)
    }

    /// The info text of the entry.
    pub fn info(&self, entry: &Entry) -> Option<String> {
        self.interface.as_deref()?.get_info(self, entry)
    }

    /// Auxiliary info of the entry's raw record.
    pub fn aux_info(&self, entry: &Entry) -> Option<String> {
        self.interface.as_deref()?.aux_info(self, entry)
    }

    /// Event Id corresponding to an event name.
    pub fn find_event_id(&self, name: &str) -> Option<i32> {
        self.interface.as_deref()?.find_event_id(self, name)
    }

    /// Ids of all event kinds of this stream.
    pub fn all_event_ids(&self) -> Option<Vec<i32>> {
        self.interface.as_deref()?.all_event_ids(self)
    }

    /// One-line summary of the entry.
    pub fn dump_entry(&self, entry: &Entry) -> Option<String> {
        self.interface.as_deref()?.dump_entry(self, entry)
    }

    /// Names of all data fields of the entry's event.
    pub fn all_event_field_names(&self, entry: &Entry) -> Option<Vec<String>> {
        self.interface.as_deref()?.all_event_field_names(self, entry)
    }

    /// Value type of one data field of the entry's event.
    pub fn event_field_type(&self, entry: &Entry, field: &str) -> FieldFormat {
        match self.interface.as_deref() {
            Some(iface) => iface.event_field_type(self, entry, field),
            None => FieldFormat::Invalid,
        }
    }

    /// Read an integer field of the entry's event.
    pub fn read_event_field_i64(&self, entry: &Entry, field: &str) -> Option<i64> {
        self.interface
            .as_deref()?
            .read_event_field_i64(self, entry, field)
    }

    /// Pids of all tasks observed in this stream, sorted ascending.
    pub fn task_pids(&self) -> Vec<i32> {
        self.tasks.ids()
    }
}

impl Default for DataStream {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DataStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStream")
            .field("stream_id", &self.stream_id)
            .field("file", &self.file)
            .field("name", &self.name)
            .field("data_format", &self.data_format)
            .field("n_cpus", &self.n_cpus)
            .field("n_events", &self.n_events)
            .finish_non_exhaustive()
    }
}

/// Modification time of a file, in whole seconds since the epoch.
pub fn file_mtime(path: &Path) -> Result<i64> {
    let meta = std::fs::metadata(path)
        .map_err(|_| Error::NotFound(path.display().to_string()))?;
    let mtime = meta
        .modified()?
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    Ok(mtime)
}
